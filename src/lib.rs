//! retro-shell - offline shell and install gate for a retro games web app.
//!
//! Two independent pieces:
//!
//! - [`OfflineCacheWorker`], a network-first caching proxy over versioned
//!   cache partitions, hosted by a [`WorkerHost`] that drives its lifecycle
//!   and (with the `server` feature) exposed over HTTP in front of the app.
//! - [`InstallGate`], which offers the platform's install flow only to
//!   logged-in users, behind a custom button.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use retro_shell::{HttpNetwork, MemoryCacheStorage, OfflineCacheWorker, WorkerConfig, WorkerHost};
//!
//! # async fn example() -> retro_shell::Result<()> {
//! let storage = Arc::new(MemoryCacheStorage::new());
//! let network = Arc::new(HttpNetwork::new(None)?);
//! let scope = "http://127.0.0.1:8000/".parse()?;
//!
//! let host = WorkerHost::new(storage.clone(), network.clone());
//! let worker = OfflineCacheWorker::new(WorkerConfig::default(), scope, storage, network);
//! host.register(Arc::new(worker)).await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod cache;
pub mod config;
pub mod error;
pub mod host;
pub mod http;
pub mod install;
pub mod network;
#[cfg(feature = "server")]
pub mod server;
pub mod worker;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use cache::{CacheStorage, DiskCacheStorage, MemoryCacheStorage};
pub use config::{AppConfig, GateConfig, PathConfig, ServerConfig, WorkerConfig};
pub use error::{Error, Result};
pub use host::{ClientId, HostStatus, RegisterOutcome, WorkerHost};
pub use http::{RequestKey, ShellRequest, ShellResponse};
pub use install::{GateState, InstallGate, InstallOutcome, InstallPlatform, SignalDisposition};
pub use network::{HttpNetwork, Network};
pub use worker::{CacheVersion, ControlMessage, FetchOutcome, LifecycleState, MessageEffect, OfflineCacheWorker};
