//! In-process cache storage.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::CacheStorage;
use crate::error::Result;
use crate::http::{RequestKey, ShellResponse};

/// Cache storage kept entirely in memory. Partitions keep their creation order.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    partitions: RwLock<Vec<(String, HashMap<RequestKey, ShellResponse>)>>,
}

impl MemoryCacheStorage {
    /// Creates an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        let mut partitions = self.partitions.write().await;
        if !partitions.iter().any(|(n, _)| n == name) {
            partitions.push((name.to_string(), HashMap::new()));
        }
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.partitions.read().await.iter().any(|(n, _)| n == name))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self
            .partitions
            .read()
            .await
            .iter()
            .map(|(n, _)| n.clone())
            .collect())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let mut partitions = self.partitions.write().await;
        let before = partitions.len();
        partitions.retain(|(n, _)| n != name);
        Ok(partitions.len() != before)
    }

    async fn put(&self, name: &str, key: &RequestKey, response: &ShellResponse) -> Result<()> {
        let mut partitions = self.partitions.write().await;
        if let Some((_, entries)) = partitions.iter_mut().find(|(n, _)| n == name) {
            entries.insert(key.clone(), response.clone());
        } else {
            let entries = HashMap::from([(key.clone(), response.clone())]);
            partitions.push((name.to_string(), entries));
        }
        Ok(())
    }

    async fn match_in(&self, name: &str, key: &RequestKey) -> Result<Option<ShellResponse>> {
        Ok(self
            .partitions
            .read()
            .await
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, entries)| entries.get(key).cloned()))
    }

    async fn requests(&self, name: &str) -> Result<Vec<RequestKey>> {
        Ok(self
            .partitions
            .read()
            .await
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, entries)| entries.keys().cloned().collect())
            .unwrap_or_default())
    }
}
