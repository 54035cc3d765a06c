//! Offline cache worker: network-first fetch interception over two versioned
//! cache partitions.
//!
//! The hosting runtime drives the worker through four entry points:
//! [`on_install`](OfflineCacheWorker::on_install),
//! [`on_activate`](OfflineCacheWorker::on_activate),
//! [`on_fetch`](OfflineCacheWorker::on_fetch) and
//! [`on_message`](OfflineCacheWorker::on_message).

mod fetch;
mod message;

use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Url;
use serde::Serialize;

use crate::cache::CacheStorage;
use crate::config::WorkerConfig;
use crate::error::{Error, Result};
use crate::http::{RequestKey, ShellRequest};
use crate::network::Network;

pub use fetch::FetchOutcome;
pub use message::{ControlMessage, MessageEffect};

/// Tag identifying the current cache generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CacheVersion(String);

impl CacheVersion {
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the name of `partition` in this generation.
    #[must_use]
    pub fn partition_name(&self, partition: Partition) -> String {
        format!("{}-{}", partition.prefix(), self.0)
    }

    /// Returns true if a partition with this name belongs to this generation,
    /// i.e. the name ends in `-<tag>`. An empty tag owns nothing.
    #[must_use]
    pub fn owns(&self, partition_name: &str) -> bool {
        !self.0.is_empty()
            && partition_name
                .strip_suffix(self.0.as_str())
                .is_some_and(|rest| rest.ends_with('-'))
    }
}

impl fmt::Display for CacheVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The two partitions of a cache generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    /// App-shell resources, populated once at install.
    Static,
    /// Successful network responses, grown at runtime.
    Dynamic,
}

impl Partition {
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Dynamic => "dynamic",
        }
    }
}

/// Worker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Installing,
    /// Installed, waiting for older clients to go away or a skip-waiting request.
    Waiting,
    Activating,
    /// Controlling clients and intercepting fetches.
    Active,
    /// Replaced by a newer worker.
    Redundant,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Installing => "installing",
            Self::Waiting => "waiting",
            Self::Activating => "activating",
            Self::Active => "active",
            Self::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

/// Outcome of populating the static partition.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InstallReport {
    /// Manifest entries stored in the static partition.
    pub cached: Vec<String>,
    /// Manifest entries that could not be stored, with the reason.
    pub failed: Vec<(String, String)>,
    /// Whether the worker asked to skip the waiting phase.
    pub skip_waiting: bool,
}

impl InstallReport {
    /// True when at least one shell resource is missing from the static partition.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Outcome of an activation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActivationReport {
    /// Partitions deleted because they belong to another generation.
    pub purged: Vec<String>,
    /// Number of open clients brought under this worker's control.
    pub claimed: usize,
}

/// The set of pages a worker can take control of.
#[async_trait]
pub trait Clients: Send + Sync {
    /// Makes `version` the controller of every open client. Returns how many were claimed.
    async fn claim(&self, version: &CacheVersion) -> usize;
}

/// Network-first caching proxy for one cache generation.
pub struct OfflineCacheWorker {
    config: WorkerConfig,
    version: CacheVersion,
    scope: Url,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    state: Mutex<LifecycleState>,
    skip_waiting: AtomicBool,
}

impl fmt::Debug for OfflineCacheWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfflineCacheWorker")
            .field("version", &self.version)
            .field("scope", &self.scope.as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl OfflineCacheWorker {
    /// Creates a worker for `scope`. Manifest entries are resolved against it.
    #[must_use]
    pub fn new(
        config: WorkerConfig,
        scope: Url,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
    ) -> Self {
        let version = CacheVersion::new(config.version.clone());
        Self {
            config,
            version,
            scope,
            storage,
            network,
            state: Mutex::new(LifecycleState::Installing),
            skip_waiting: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub const fn version(&self) -> &CacheVersion {
        &self.version
    }

    #[must_use]
    pub const fn scope(&self) -> &Url {
        &self.scope
    }

    #[must_use]
    pub const fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub(crate) fn set_state(&self, state: LifecycleState) {
        let mut current = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if *current != state {
            log::debug!("Worker {}: {} -> {}", self.version, *current, state);
            *current = state;
        }
    }

    /// Requests promotion to active without waiting for older clients.
    pub fn skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::SeqCst);
    }

    /// Returns true once skip-waiting has been requested.
    #[must_use]
    pub fn wants_skip_waiting(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    /// Name of `partition` in this worker's generation.
    #[must_use]
    pub fn partition_name(&self, partition: Partition) -> String {
        self.version.partition_name(partition)
    }

    /// Resolves a scope-relative path to an absolute URL.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` cannot be joined onto the scope.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        Ok(self.scope.join(path)?)
    }

    /// Populates the static partition with the app-shell manifest.
    ///
    /// Each resource is fetched on its own. A failure is recorded in the report
    /// and never aborts the install.
    pub async fn on_install(&self) -> InstallReport {
        self.set_state(LifecycleState::Installing);
        log::info!("Installing worker {}", self.version);

        let static_name = self.partition_name(Partition::Static);
        let mut report = InstallReport::default();

        if let Err(e) = self.storage.open(&static_name).await {
            log::warn!("Could not open {static_name}: {e}");
        }

        let results = join_all(
            self.config
                .shell_manifest
                .iter()
                .map(|path| self.precache(&static_name, path)),
        )
        .await;

        for (path, result) in self.config.shell_manifest.iter().zip(results) {
            match result {
                Ok(()) => report.cached.push(path.clone()),
                Err(e) => {
                    log::warn!("Could not cache shell resource {path}: {e}");
                    report.failed.push((path.clone(), e.to_string()));
                }
            }
        }

        if report.is_degraded() {
            log::warn!(
                "Worker {} installed degraded: {}/{} shell resources cached",
                self.version,
                report.cached.len(),
                self.config.shell_manifest.len()
            );
        } else {
            log::info!("Cached {} shell resources", report.cached.len());
        }

        if self.config.skip_waiting {
            self.skip_waiting();
        }
        report.skip_waiting = self.wants_skip_waiting();

        self.set_state(LifecycleState::Waiting);
        report
    }

    async fn precache(&self, partition: &str, path: &str) -> Result<()> {
        let url = self.resolve(path)?;
        let request = ShellRequest::get(url);
        let response = self.network.fetch(&request).await?;
        if !response.is_cacheable() {
            return Err(Error::Network(format!("HTTP {}", response.status())));
        }
        self.storage.put(partition, &request.key(), &response).await
    }

    /// Purges every partition of another generation, then claims open clients.
    ///
    /// Running it twice leaves the same set of partitions behind.
    pub async fn on_activate(&self, clients: &dyn Clients) -> ActivationReport {
        self.set_state(LifecycleState::Activating);
        log::info!("Activating worker {}", self.version);

        let mut report = ActivationReport::default();
        match self.storage.keys().await {
            Ok(names) => {
                for name in names.into_iter().filter(|n| !self.version.owns(n)) {
                    match self.storage.delete(&name).await {
                        Ok(_) => {
                            log::info!("Removed stale cache {name}");
                            report.purged.push(name);
                        }
                        Err(e) => log::warn!("Could not remove stale cache {name}: {e}"),
                    }
                }
            }
            Err(e) => log::warn!("Could not enumerate caches: {e}"),
        }

        report.claimed = clients.claim(&self.version).await;
        self.set_state(LifecycleState::Active);
        report
    }

    /// Key of the root document used as the generic offline shell.
    fn root_document_key(&self) -> Option<RequestKey> {
        self.resolve(&self.config.root_document)
            .ok()
            .map(|url| RequestKey::get(&url))
    }
}
