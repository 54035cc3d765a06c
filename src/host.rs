//! Runtime hosting the offline cache worker.
//!
//! Owns the registration (an active and possibly a waiting worker), the set of
//! known clients, and routes fetches and control messages to the right worker.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::cache::CacheStorage;
use crate::http::{ShellRequest, ShellResponse};
use crate::network::Network;
use crate::worker::{
    ActivationReport, CacheVersion, Clients, ControlMessage, FetchOutcome, InstallReport,
    LifecycleState, MessageEffect, OfflineCacheWorker, Partition,
};

/// Identity of a page talking to the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random id.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Known clients and the cache version controlling each of them.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<ClientId, Option<CacheVersion>>>,
}

impl ClientRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ClientId, Option<CacheVersion>>> {
        self.clients.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Records `client` and returns its controller.
    ///
    /// A client first seen while a worker is active is controlled by it.
    /// Existing clients keep their controller until the next claim.
    pub fn touch(&self, client: &ClientId, active: Option<&CacheVersion>) -> Option<CacheVersion> {
        self.lock()
            .entry(client.clone())
            .or_insert_with(|| active.cloned())
            .clone()
    }

    /// Number of known clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of clients controlled by `version`.
    #[must_use]
    pub fn controlled_by(&self, version: &CacheVersion) -> usize {
        self.lock()
            .values()
            .filter(|controller| controller.as_ref() == Some(version))
            .count()
    }
}

#[async_trait]
impl Clients for ClientRegistry {
    async fn claim(&self, version: &CacheVersion) -> usize {
        let mut clients = self.lock();
        for controller in clients.values_mut() {
            *controller = Some(version.clone());
        }
        clients.len()
    }
}

/// What happened to a newly registered worker.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RegisterOutcome {
    /// The worker took over immediately.
    Activated {
        install: InstallReport,
        activation: ActivationReport,
    },
    /// Another worker is still active; this one waits for a skip-waiting request.
    Waiting { install: InstallReport },
}

/// Snapshot of a partition.
#[derive(Debug, Clone, Serialize)]
pub struct PartitionStatus {
    pub name: String,
    pub entries: usize,
}

/// Snapshot of a registered worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub version: CacheVersion,
    pub state: LifecycleState,
    pub partitions: Vec<PartitionStatus>,
}

/// Snapshot of the host.
#[derive(Debug, Clone, Serialize)]
pub struct HostStatus {
    pub active: Option<WorkerStatus>,
    pub waiting: Option<WorkerStatus>,
    pub clients: usize,
    pub controlled: usize,
}

#[derive(Debug, Default)]
struct Registration {
    active: Option<Arc<OfflineCacheWorker>>,
    waiting: Option<Arc<OfflineCacheWorker>>,
}

/// Hosts the worker lifecycle for one scope.
pub struct WorkerHost {
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    registration: RwLock<Registration>,
    clients: ClientRegistry,
}

impl fmt::Debug for WorkerHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHost")
            .field("clients", &self.clients)
            .finish_non_exhaustive()
    }
}

impl WorkerHost {
    /// Creates a host with no registered worker.
    ///
    /// `network` is used for pass-through requests; workers carry their own.
    #[must_use]
    pub fn new(storage: Arc<dyn CacheStorage>, network: Arc<dyn Network>) -> Self {
        Self {
            storage,
            network,
            registration: RwLock::new(Registration::default()),
            clients: ClientRegistry::new(),
        }
    }

    /// Returns the client registry.
    #[must_use]
    pub const fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    /// Returns the active worker, if any.
    pub async fn active(&self) -> Option<Arc<OfflineCacheWorker>> {
        self.registration.read().await.active.clone()
    }

    /// Returns the waiting worker, if any.
    pub async fn waiting(&self) -> Option<Arc<OfflineCacheWorker>> {
        self.registration.read().await.waiting.clone()
    }

    /// Installs `worker`, then activates it or parks it as waiting.
    pub async fn register(&self, worker: Arc<OfflineCacheWorker>) -> RegisterOutcome {
        let install = worker.on_install().await;

        let mut registration = self.registration.write().await;
        if registration.active.is_none() || worker.wants_skip_waiting() {
            let activation = self.promote(&mut registration, worker).await;
            return RegisterOutcome::Activated { install, activation };
        }

        if let Some(previous) = registration.waiting.replace(worker) {
            log::info!("Waiting worker {} replaced", previous.version());
            previous.set_state(LifecycleState::Redundant);
        }
        RegisterOutcome::Waiting { install }
    }

    async fn promote(
        &self,
        registration: &mut Registration,
        worker: Arc<OfflineCacheWorker>,
    ) -> ActivationReport {
        if registration
            .waiting
            .as_ref()
            .is_some_and(|waiting| Arc::ptr_eq(waiting, &worker))
        {
            registration.waiting = None;
        }

        let activation = worker.on_activate(&self.clients).await;
        if let Some(previous) = registration.active.replace(worker) {
            previous.set_state(LifecycleState::Redundant);
        }
        activation
    }

    /// Routes a raw control message to the waiting worker, else the active one.
    ///
    /// `SKIP_WAITING` on a waiting worker promotes it.
    pub async fn post_message(&self, raw: &str) -> MessageEffect {
        let message = ControlMessage::parse(raw);

        let mut registration = self.registration.write().await;
        let (target, is_waiting) = match (&registration.waiting, &registration.active) {
            (Some(waiting), _) => (Arc::clone(waiting), true),
            (None, Some(active)) => (Arc::clone(active), false),
            (None, None) => {
                log::debug!("No worker registered, message ignored");
                return MessageEffect::Ignored;
            }
        };

        let effect = target.on_message(&message).await;
        if is_waiting && effect == MessageEffect::SkipWaitingRequested {
            log::info!("Promoting waiting worker {}", target.version());
            self.promote(&mut registration, target).await;
        }
        effect
    }

    /// Handles a request from `client`.
    ///
    /// With an active worker controlling the client the worker decides;
    /// otherwise the request goes straight to the network.
    pub async fn fetch(&self, client: &ClientId, request: &ShellRequest) -> ShellResponse {
        let active = self.active().await;
        let controller = self.clients.touch(client, active.as_ref().map(|w| w.version()));

        if let Some(worker) = active.filter(|w| controller.as_ref() == Some(w.version())) {
            match worker.on_fetch(request).await {
                FetchOutcome::Respond(response) => return response,
                FetchOutcome::Bypass => {}
            }
        }
        self.pass_through(request).await
    }

    async fn pass_through(&self, request: &ShellRequest) -> ShellResponse {
        match self.network.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                log::warn!("Upstream unreachable for {} {}: {e}", request.method(), request.url());
                ShellResponse::upstream_unreachable()
            }
        }
    }

    /// Snapshot of registration, partitions and clients.
    pub async fn status(&self) -> HostStatus {
        let (active, waiting) = {
            let registration = self.registration.read().await;
            (registration.active.clone(), registration.waiting.clone())
        };

        let controlled = active
            .as_ref()
            .map_or(0, |w| self.clients.controlled_by(w.version()));

        HostStatus {
            active: match active {
                Some(worker) => Some(self.worker_status(&worker).await),
                None => None,
            },
            waiting: match waiting {
                Some(worker) => Some(self.worker_status(&worker).await),
                None => None,
            },
            clients: self.clients.len(),
            controlled,
        }
    }

    async fn worker_status(&self, worker: &OfflineCacheWorker) -> WorkerStatus {
        let mut partitions = Vec::new();
        for partition in [Partition::Static, Partition::Dynamic] {
            let name = worker.partition_name(partition);
            let entries = self.storage.entry_count(&name).await.unwrap_or_else(|e| {
                log::warn!("Could not count entries of {name}: {e}");
                0
            });
            partitions.push(PartitionStatus { name, entries });
        }
        WorkerStatus {
            version: worker.version().clone(),
            state: worker.state(),
            partitions,
        }
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::*;
    use crate::cache::MemoryCacheStorage;
    use crate::config::WorkerConfig;
    use crate::http::{RequestKey, UPSTREAM_UNREACHABLE_TEXT};
    use crate::testing::{ScriptedNetwork, scope};

    struct Fixture {
        storage: Arc<MemoryCacheStorage>,
        network: Arc<ScriptedNetwork>,
        host: WorkerHost,
    }

    fn fixture() -> Fixture {
        let storage = Arc::new(MemoryCacheStorage::new());
        let network = Arc::new(ScriptedNetwork::new());
        network.serve("/", ShellResponse::ok("home"));
        network.serve("/catalog/", ShellResponse::ok("catalog"));
        let host = WorkerHost::new(storage.clone(), network.clone());
        Fixture {
            storage,
            network,
            host,
        }
    }

    fn worker(f: &Fixture, version: &str, skip_waiting: bool) -> Arc<OfflineCacheWorker> {
        let config = WorkerConfig::default()
            .with_version(version)
            .with_skip_waiting(skip_waiting);
        Arc::new(OfflineCacheWorker::new(
            config,
            scope(),
            f.storage.clone(),
            f.network.clone(),
        ))
    }

    fn get(path: &str) -> ShellRequest {
        ShellRequest::get(scope().join(path).unwrap())
    }

    #[tokio::test]
    async fn first_worker_activates_and_claims_known_clients() {
        let f = fixture();
        let page = ClientId::new("page-1");
        f.host.fetch(&page, &get("/")).await;
        assert_eq!(f.host.clients().len(), 1);

        let outcome = f.host.register(worker(&f, "v1", false)).await;

        assert!(matches!(outcome, RegisterOutcome::Activated { ref activation, .. } if activation.claimed == 1));
        let status = f.host.status().await;
        assert_eq!(status.active.unwrap().state, LifecycleState::Active);
        assert_eq!(status.controlled, 1);
    }

    #[tokio::test]
    async fn second_worker_waits_until_skip_waiting() {
        let f = fixture();
        let v1 = worker(&f, "v1", false);
        f.host.register(Arc::clone(&v1)).await;
        f.host.fetch(&ClientId::new("page"), &get("/catalog/")).await;
        assert!(f.storage.has("dynamic-v1").await.unwrap());

        let v2 = worker(&f, "v2", false);
        let outcome = f.host.register(Arc::clone(&v2)).await;
        assert!(matches!(outcome, RegisterOutcome::Waiting { .. }));
        assert_eq!(v2.state(), LifecycleState::Waiting);
        assert!(f.storage.has("dynamic-v1").await.unwrap());

        let effect = f.host.post_message(r#"{"type":"SKIP_WAITING"}"#).await;

        assert_eq!(effect, MessageEffect::SkipWaitingRequested);
        assert_eq!(v1.state(), LifecycleState::Redundant);
        assert_eq!(v2.state(), LifecycleState::Active);
        assert!(f.host.waiting().await.is_none());
        assert!(!f.storage.has("dynamic-v1").await.unwrap());
        assert!(!f.storage.has("static-v1").await.unwrap());
        assert_eq!(f.host.clients().controlled_by(v2.version()), 1);
    }

    #[tokio::test]
    async fn skip_waiting_worker_replaces_active_immediately() {
        let f = fixture();
        let v1 = worker(&f, "v1", true);
        let v2 = worker(&f, "v2", true);
        f.host.register(Arc::clone(&v1)).await;

        let outcome = f.host.register(Arc::clone(&v2)).await;

        assert!(matches!(outcome, RegisterOutcome::Activated { .. }));
        assert_eq!(v1.state(), LifecycleState::Redundant);
        assert_eq!(f.storage.keys().await.unwrap(), vec!["static-v2"]);
    }

    #[tokio::test]
    async fn no_active_worker_passes_through_uncached() {
        let f = fixture();
        let response = f.host.fetch(&ClientId::random(), &get("/catalog/")).await;

        assert_eq!(response.body().as_ref(), b"catalog");
        assert!(f.storage.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pass_through_failure_is_502() {
        let f = fixture();
        f.network.set_offline(true);

        let response = f.host.fetch(&ClientId::random(), &get("/")).await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(response.body().as_ref(), UPSTREAM_UNREACHABLE_TEXT.as_bytes());
    }

    #[tokio::test]
    async fn active_worker_serves_offline_from_cache() {
        let f = fixture();
        f.host.register(worker(&f, "v2", true)).await;
        let page = ClientId::random();
        f.host.fetch(&page, &get("/catalog/")).await;
        f.network.set_offline(true);

        let response = f.host.fetch(&page, &get("/catalog/")).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body().as_ref(), b"catalog");
    }

    #[tokio::test]
    async fn bypassed_request_goes_to_network_without_caching() {
        let f = fixture();
        f.host.register(worker(&f, "v2", true)).await;
        let request = ShellRequest::get("https://cdn.retrogames.cc/embed/1".parse().unwrap());

        let response = f.host.fetch(&ClientId::random(), &request).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let key = RequestKey::get(request.url());
        assert!(f.storage.match_any(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_cache_goes_to_active_worker() {
        let f = fixture();
        f.host.register(worker(&f, "v2", true)).await;
        f.host.fetch(&ClientId::random(), &get("/catalog/")).await;

        let effect = f.host.post_message(r#"{"type":"CLEAR_CACHE"}"#).await;

        assert_eq!(
            effect,
            MessageEffect::CachesCleared {
                deleted: vec!["static-v2".to_string(), "dynamic-v2".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn message_without_worker_is_ignored() {
        let f = fixture();
        assert_eq!(f.host.post_message("{}").await, MessageEffect::Ignored);
        assert_eq!(
            f.host.post_message(r#"{"type":"SKIP_WAITING"}"#).await,
            MessageEffect::Ignored
        );
    }

    #[tokio::test]
    async fn status_reports_partition_counts() {
        let f = fixture();
        f.host.register(worker(&f, "v2", true)).await;
        f.host.fetch(&ClientId::random(), &get("/catalog/")).await;

        let status = f.host.status().await;
        let active = status.active.unwrap();

        assert_eq!(active.version, CacheVersion::new("v2"));
        assert_eq!(active.partitions[0].name, "static-v2");
        assert_eq!(active.partitions[0].entries, 2);
        assert_eq!(active.partitions[1].entries, 1);
        assert!(status.waiting.is_none());
        assert_eq!(status.clients, 1);
    }
}
