//! Per-request decision procedure: network first, then cache, then a
//! synthesized offline response.

use reqwest::Method;

use super::{OfflineCacheWorker, Partition};
use crate::http::{ShellRequest, ShellResponse};

/// What the worker does with an intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Not intercepted: the request goes to the network untouched and uncached.
    Bypass,
    /// The worker answers with this response.
    Respond(ShellResponse),
}

impl OfflineCacheWorker {
    /// Returns true if the request's host matches a bypass entry.
    #[must_use]
    pub fn is_bypassed_host(&self, request: &ShellRequest) -> bool {
        request.url().host_str().is_some_and(|host| {
            self.config
                .bypass_hosts
                .iter()
                .any(|bypass| !bypass.is_empty() && host.contains(bypass.as_str()))
        })
    }

    /// Handles an intercepted request.
    ///
    /// Never fails: a network error falls back to the caches, and a cache miss
    /// becomes a well-formed `503`.
    pub async fn on_fetch(&self, request: &ShellRequest) -> FetchOutcome {
        if self.is_bypassed_host(request) {
            log::debug!("Bypassing {}", request.url());
            return FetchOutcome::Bypass;
        }
        if request.method() != Method::GET {
            return FetchOutcome::Bypass;
        }

        match self.network.fetch(request).await {
            Ok(response) => {
                if response.is_cacheable() {
                    let dynamic = self.partition_name(Partition::Dynamic);
                    if let Err(e) = self.storage.put(&dynamic, &request.key(), &response).await {
                        log::warn!("Could not cache {}: {e}", request.url());
                    }
                }
                FetchOutcome::Respond(response)
            }
            Err(e) => {
                log::debug!("Network failed for {}: {e}", request.url());
                FetchOutcome::Respond(self.offline_fallback(request).await)
            }
        }
    }

    async fn offline_fallback(&self, request: &ShellRequest) -> ShellResponse {
        match self.storage.match_any(&request.key()).await {
            Ok(Some(cached)) => {
                log::debug!("Serving {} from cache", request.url());
                return cached;
            }
            Ok(None) => {}
            Err(e) => log::warn!("Cache lookup failed for {}: {e}", request.url()),
        }

        if !request.accepts_html() {
            return ShellResponse::offline_resource();
        }

        let Some(root) = self.root_document_key() else {
            return ShellResponse::offline_page();
        };
        match self.storage.match_any(&root).await {
            Ok(Some(shell)) => {
                log::debug!("Serving offline shell for {}", request.url());
                shell
            }
            Ok(None) => ShellResponse::offline_page(),
            Err(e) => {
                log::warn!("Cache lookup failed for offline shell: {e}");
                ShellResponse::offline_page()
            }
        }
    }
}
