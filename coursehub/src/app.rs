//! Application state and initialization
//!
//! Builds the storage backend named by `StoreConfig`, brings stored
//! records up to the current shape and wires every service to one
//! shared repository.

use crate::config::{BackendKind, StoreConfig};
use crate::database::Repository;
use crate::error::{AppError, Result};
use crate::services::{CoursesService, EngagementService, NotificationsService, SessionService};
use crate::storage::{KeyValueStore, MemoryStore, SqliteStore};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `default_filter`. Calling this again once a
/// subscriber is installed does nothing.
pub fn init_logging(default_filter: &str) {
    let result = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if result.is_ok() {
        tracing::debug!("Logging initialized");
    }
}

/// Central state holding all services
#[derive(Clone)]
pub struct AppState {
    pub config: StoreConfig,
    pub repo: Repository,
    pub session: SessionService,
    pub courses: CoursesService,
    pub engagement: EngagementService,
    pub notifications: NotificationsService,
}

impl AppState {
    /// Open the configured backend and build the services on top of it
    pub async fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        tracing::info!("Opening course store ({:?} backend)", config.backend);

        let store: Arc<dyn KeyValueStore> = match config.backend {
            BackendKind::Memory => Arc::new(MemoryStore::new()),
            BackendKind::Sqlite => {
                let path = config.database_path.as_deref().ok_or_else(|| {
                    AppError::Config("sqlite backend requires databasePath".to_string())
                })?;
                Arc::new(SqliteStore::open(path).await?)
            }
        };

        Self::with_store(config, store).await
    }

    /// Build the services over an existing backend
    pub async fn with_store(config: StoreConfig, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let repo = Repository::new(store).with_notification_limit(config.notification_limit);

        // Rewrite records left by older clients before anything reads them
        if repo.migrate_legacy_shapes().await? {
            tracing::info!("Stored records migrated to the current shape");
        }

        let notifications = NotificationsService::new(repo.clone());
        let state = Self {
            session: SessionService::new(repo.clone()),
            courses: CoursesService::new(repo.clone(), config.orphan_policy),
            engagement: EngagementService::new(repo.clone()),
            notifications,
            repo,
            config,
        };

        tracing::info!("Course store ready");
        Ok(state)
    }
}
