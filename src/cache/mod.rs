//! Named cache partitions.
//!
//! A [`CacheStorage`] holds any number of named partitions, each mapping a
//! [`RequestKey`] to a full response snapshot. The worker only ever uses two
//! of them per cache version, but storage itself knows nothing about versions:
//! eviction is done by deleting whole partitions by name.

mod disk;
mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::http::{RequestKey, ShellResponse};

pub use disk::DiskCacheStorage;
pub use memory::MemoryCacheStorage;

/// Abstraction over the platform's cache storage.
///
/// Implementations serialize concurrent access to the same partition
/// themselves; callers never lock around these calls.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Opens a partition, creating it empty if it does not exist.
    async fn open(&self, name: &str) -> Result<()>;

    /// Returns true if a partition with this name exists.
    async fn has(&self, name: &str) -> Result<bool>;

    /// Lists partition names in creation order.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Deletes a partition and all of its entries. Returns false if it did not exist.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// Stores a response under `key`, opening the partition if needed.
    async fn put(&self, name: &str, key: &RequestKey, response: &ShellResponse) -> Result<()>;

    /// Looks up `key` in a single partition.
    async fn match_in(&self, name: &str, key: &RequestKey) -> Result<Option<ShellResponse>>;

    /// Lists the request keys stored in a partition (empty if it does not exist).
    async fn requests(&self, name: &str) -> Result<Vec<RequestKey>>;

    /// Looks up `key` across all partitions, oldest partition first.
    async fn match_any(&self, key: &RequestKey) -> Result<Option<ShellResponse>> {
        for name in self.keys().await? {
            if let Some(response) = self.match_in(&name, key).await? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }

    /// Returns the number of entries in a partition (zero if it does not exist).
    async fn entry_count(&self, name: &str) -> Result<usize> {
        Ok(self.requests(name).await?.len())
    }
}
