//! Storage module
//!
//! Key-value backends that hold the serialized collections, plus the
//! encoder that turns attachment files into self-contained data URIs.

pub mod embed;
pub mod memory;
pub mod sqlite;

pub use embed::{FileSource, PendingFile};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use async_trait::async_trait;

/// A flat string-to-string namespace, one entry per collection.
///
/// `set` must replace the whole value in a single write.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removing a missing key is not an error
    async fn remove(&self, key: &str) -> Result<()>;
}
