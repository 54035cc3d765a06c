//! Control messages posted by the controlling page.

use serde::{Deserialize, Serialize};

use super::{OfflineCacheWorker, Partition};

/// A command from the page. Anything unrecognized parses as [`ControlMessage::Unknown`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Promote a waiting worker to active immediately.
    SkipWaiting,
    /// Delete both partitions of the current generation.
    ClearCache,
    #[serde(other)]
    Unknown,
}

impl ControlMessage {
    /// Parses a raw JSON message. Malformed input is treated as unknown.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or(Self::Unknown)
    }
}

/// What handling a control message did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum MessageEffect {
    SkipWaitingRequested,
    /// Names of the partitions that existed and were deleted.
    CachesCleared { deleted: Vec<String> },
    Ignored,
}

impl OfflineCacheWorker {
    /// Handles a control message. Unknown messages are ignored silently.
    pub async fn on_message(&self, message: &ControlMessage) -> MessageEffect {
        match message {
            ControlMessage::SkipWaiting => {
                log::info!("Skip-waiting requested for worker {}", self.version);
                self.skip_waiting();
                MessageEffect::SkipWaitingRequested
            }
            ControlMessage::ClearCache => {
                let mut deleted = Vec::new();
                for partition in [Partition::Static, Partition::Dynamic] {
                    let name = self.partition_name(partition);
                    match self.storage.delete(&name).await {
                        Ok(true) => deleted.push(name),
                        Ok(false) => {}
                        Err(e) => log::warn!("Could not clear {name}: {e}"),
                    }
                }
                log::info!("Cleared caches: {deleted:?}");
                MessageEffect::CachesCleared { deleted }
            }
            ControlMessage::Unknown => MessageEffect::Ignored,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cache::{CacheStorage, MemoryCacheStorage};
    use crate::config::WorkerConfig;
    use crate::http::{RequestKey, ShellResponse};
    use crate::testing::{ScriptedNetwork, scope};

    #[test]
    fn parses_known_messages() {
        assert_eq!(ControlMessage::parse(r#"{"type":"SKIP_WAITING"}"#), ControlMessage::SkipWaiting);
        assert_eq!(ControlMessage::parse(r#"{"type":"CLEAR_CACHE"}"#), ControlMessage::ClearCache);
    }

    #[test]
    fn unknown_and_malformed_messages_are_unknown() {
        for raw in [
            r#"{"type":"REFRESH"}"#,
            r#"{"kind":"SKIP_WAITING"}"#,
            r#"{"type":42}"#,
            r#""SKIP_WAITING""#,
            "null",
            "{not json",
            "",
        ] {
            assert_eq!(ControlMessage::parse(raw), ControlMessage::Unknown, "{raw}");
        }
    }

    #[tokio::test]
    async fn clear_cache_empties_both_partitions_regardless_of_version() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let worker = OfflineCacheWorker::new(
            WorkerConfig::default(),
            scope(),
            storage.clone(),
            Arc::new(ScriptedNetwork::new()),
        );
        let key = RequestKey::get(&scope());
        storage.put("static-v2", &key, &ShellResponse::ok("shell")).await.unwrap();
        storage.put("dynamic-v2", &key, &ShellResponse::ok("page")).await.unwrap();

        let effect = worker.on_message(&ControlMessage::ClearCache).await;

        assert_eq!(
            effect,
            MessageEffect::CachesCleared {
                deleted: vec!["static-v2".to_string(), "dynamic-v2".to_string()]
            }
        );
        assert_eq!(storage.entry_count("static-v2").await.unwrap(), 0);
        assert_eq!(storage.entry_count("dynamic-v2").await.unwrap(), 0);
        assert!(storage.match_any(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn skip_waiting_and_unknown() {
        let worker = OfflineCacheWorker::new(
            WorkerConfig::default().with_skip_waiting(false),
            scope(),
            Arc::new(MemoryCacheStorage::new()),
            Arc::new(ScriptedNetwork::new()),
        );

        assert_eq!(worker.on_message(&ControlMessage::Unknown).await, MessageEffect::Ignored);
        assert!(!worker.wants_skip_waiting());
        assert_eq!(
            worker.on_message(&ControlMessage::SkipWaiting).await,
            MessageEffect::SkipWaitingRequested
        );
        assert!(worker.wants_skip_waiting());
    }
}
