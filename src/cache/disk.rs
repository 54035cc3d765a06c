//! Cache storage persisted on disk.
//!
//! Layout under the root directory:
//!
//! ```text
//! index.json                    partition names in creation order
//! p-<sha256(name)[..16]>/       one directory per partition
//!     <sha256(key)>.json        one file per entry
//! ```
//!
//! Every file is written to a temporary path and renamed into place, so a
//! reader never observes a half-written entry.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use super::CacheStorage;
use crate::error::{Error, Result};
use crate::http::{RequestKey, ShellResponse};

const INDEX_FILE: &str = "index.json";

/// A response snapshot as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    key: RequestKey,
    status: u16,
    /// Header names with base64-encoded raw values; values need not be UTF-8.
    headers: Vec<(String, String)>,
    /// Base64-encoded body.
    body: String,
    stored_at: DateTime<Utc>,
}

impl StoredEntry {
    fn from_response(key: &RequestKey, response: &ShellResponse) -> Self {
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), BASE64.encode(value.as_bytes())))
            .collect();
        Self {
            key: key.clone(),
            status: response.status().as_u16(),
            headers,
            body: BASE64.encode(response.body()),
            stored_at: Utc::now(),
        }
    }

    fn into_response(self) -> Result<ShellResponse> {
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| Error::Cache(format!("Corrupt entry for {}: {e}", self.key)))?;
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let corrupt = |e: &dyn std::fmt::Display| {
                Error::Cache(format!("Corrupt header {name} for {}: {e}", self.key))
            };
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| corrupt(&e))?;
            let raw = BASE64.decode(value).map_err(|e| corrupt(&e))?;
            let value = HeaderValue::from_bytes(&raw).map_err(|e| corrupt(&e))?;
            headers.append(name, value);
        }
        let body = BASE64
            .decode(&self.body)
            .map_err(|e| Error::Cache(format!("Corrupt body for {}: {e}", self.key)))?;
        Ok(ShellResponse::new(status, headers, Bytes::from(body)))
    }
}

fn digest_hex(input: &str) -> String {
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

/// Writes `contents` to `path` atomically (write tmp + rename).
async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, contents).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

/// Cache storage backed by a directory tree.
#[derive(Debug)]
pub struct DiskCacheStorage {
    root: PathBuf,
    index: RwLock<Vec<String>>,
}

impl DiskCacheStorage {
    /// Opens (or creates) a storage rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the root directory cannot be created or an existing
    /// index cannot be read.
    pub async fn open_at(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;

        let index_path = root.join(INDEX_FILE);
        let index = if tokio::fs::try_exists(&index_path).await? {
            let raw = tokio::fs::read(&index_path).await?;
            serde_json::from_slice(&raw)?
        } else {
            Vec::new()
        };
        log::debug!("Opened disk cache at {} ({} partitions)", root.display(), index.len());

        Ok(Self {
            root,
            index: RwLock::new(index),
        })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn partition_dir(&self, name: &str) -> PathBuf {
        self.root.join(format!("p-{}", &digest_hex(name)[..16]))
    }

    fn entry_path(&self, name: &str, key: &RequestKey) -> PathBuf {
        self.partition_dir(name)
            .join(format!("{}.json", digest_hex(&key.to_string())))
    }

    async fn save_index(&self, index: &[String]) -> Result<()> {
        let raw = serde_json::to_vec_pretty(index)?;
        write_atomic(&self.root.join(INDEX_FILE), &raw).await
    }

    /// Registers a partition in the index while the caller holds the write lock.
    async fn ensure_partition(&self, index: &mut Vec<String>, name: &str) -> Result<()> {
        tokio::fs::create_dir_all(self.partition_dir(name)).await?;
        if !index.iter().any(|n| n == name) {
            index.push(name.to_string());
            self.save_index(index).await?;
        }
        Ok(())
    }

    async fn read_entry(path: &Path) -> Result<Option<StoredEntry>> {
        match tokio::fs::read(path).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        let mut index = self.index.write().await;
        self.ensure_partition(&mut index, name).await
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.index.read().await.iter().any(|n| n == name))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.index.read().await.clone())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let mut index = self.index.write().await;
        let Some(pos) = index.iter().position(|n| n == name) else {
            return Ok(false);
        };
        index.remove(pos);
        self.save_index(&index).await?;

        match tokio::fs::remove_dir_all(self.partition_dir(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, name: &str, key: &RequestKey, response: &ShellResponse) -> Result<()> {
        // Held for the whole write so a concurrent delete cannot orphan the file.
        let mut index = self.index.write().await;
        self.ensure_partition(&mut index, name).await?;

        let entry = StoredEntry::from_response(key, response);
        let raw = serde_json::to_vec(&entry)?;
        write_atomic(&self.entry_path(name, key), &raw).await
    }

    async fn match_in(&self, name: &str, key: &RequestKey) -> Result<Option<ShellResponse>> {
        let index = self.index.read().await;
        if !index.iter().any(|n| n == name) {
            return Ok(None);
        }
        match Self::read_entry(&self.entry_path(name, key)).await? {
            // A digest collision would surface as a foreign key; treat it as a miss.
            Some(entry) if entry.key == *key => entry.into_response().map(Some),
            _ => Ok(None),
        }
    }

    async fn requests(&self, name: &str) -> Result<Vec<RequestKey>> {
        let index = self.index.read().await;
        if !index.iter().any(|n| n == name) {
            return Ok(Vec::new());
        }

        let mut dir = match tokio::fs::read_dir(self.partition_dir(name)).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stored) = Self::read_entry(&path).await? {
                    keys.push(stored.key);
                }
            }
        }
        Ok(keys)
    }
}
