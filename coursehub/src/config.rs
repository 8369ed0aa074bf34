//! Store configuration
//!
//! Collection keys, record limits and the `StoreConfig` that selects a
//! storage backend. The config file is plain JSON; every field has a
//! default so a partial file is accepted.

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

// ===== Collection Keys =====

/// Sequence of registered users
pub const USERS_KEY: &str = "users";
/// The single signed-in user for this client
pub const CURRENT_USER_KEY: &str = "currentUser";
/// Sequence of published courses
pub const COURSES_KEY: &str = "teacherCourses";
/// studentEmail -> enrollments
pub const ENROLLMENTS_KEY: &str = "studentCourses";
/// Sequence of comments across all courses
pub const COMMENTS_KEY: &str = "courseComments";
/// courseId -> studentEmail -> rating
pub const RATINGS_KEY: &str = "courseRatings";
/// teacherEmail -> notifications, newest first
pub const NOTIFICATIONS_KEY: &str = "teacherNotifications";

// ===== Record Limits =====

/// Notifications kept per teacher; older entries are dropped on insert
pub const MAX_NOTIFICATIONS_PER_TEACHER: usize = 50;

/// Lowest accepted course rating
pub const MIN_RATING: u8 = 1;
/// Highest accepted course rating
pub const MAX_RATING: u8 = 5;

/// Number of random base-36 characters appended to generated ids
pub const ID_RANDOM_SUFFIX_LEN: usize = 5;

/// Subject recorded on a course when the teacher has none
pub const DEFAULT_COURSE_SUBJECT: &str = "General";

/// Longest document name kept after sanitizing
pub const MAX_ATTACHMENT_NAME_LEN: usize = 255;

// ===== Runtime Configuration =====

/// Which key-value backend the store runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Sqlite,
}

/// What happens to comments, ratings, enrollments and notifications
/// when their course is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrphanPolicy {
    /// Leave dependent records in place; readers skip them
    #[default]
    Keep,
    /// Remove every record that references the deleted course
    Cascade,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: BackendKind,
    /// SQLite file, required when `backend` is `sqlite`
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_notification_limit")]
    pub notification_limit: usize,
    #[serde(default)]
    pub orphan_policy: OrphanPolicy,
}

fn default_backend() -> BackendKind {
    BackendKind::Memory
}

fn default_notification_limit() -> usize {
    MAX_NOTIFICATIONS_PER_TEACHER
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            database_path: None,
            notification_limit: default_notification_limit(),
            orphan_policy: OrphanPolicy::default(),
        }
    }
}

impl StoreConfig {
    /// In-memory store, mostly useful for tests
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// SQLite-backed store at `path`
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendKind::Sqlite,
            database_path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Load config from disk, writing defaults if the file does not exist
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("Config file not found at {:?}, writing defaults", path);
            let config = Self::default();
            config.save(path).await?;
            return Ok(config);
        }

        let content = fs::read_to_string(path).await?;
        let config: StoreConfig = serde_json::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse {:?}: {}", path, e)))?;

        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).await?;
        tracing::debug!("Config saved to {:?}", path);

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.notification_limit == 0 {
            return Err(AppError::Config(
                "notificationLimit must be at least 1".to_string(),
            ));
        }

        if self.backend == BackendKind::Sqlite && self.database_path.is_none() {
            return Err(AppError::Config(
                "sqlite backend requires databasePath".to_string(),
            ));
        }

        Ok(())
    }
}
