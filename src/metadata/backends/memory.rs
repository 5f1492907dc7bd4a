use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::metadata::{KeyValue, MetadataStore, StoreError, WatchEvent, WatchSubscription};

const WATCH_BUFFER: usize = 1024;

/// Process-local store with the same prefix and watch semantics as the
/// distributed one. Used when no cluster is configured and in tests.
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
    events: broadcast::Sender<WatchEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_BUFFER);
        Self {
            entries: RwLock::new(BTreeMap::new()),
            events,
        }
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn publish(&self, event: WatchEvent) {
        // No receivers just means nobody is watching yet.
        let _ = self.events.send(event);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| KeyValue {
                key: key.clone(),
                value: value.clone(),
            })
            .collect())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        let mut entries = self.entries.write().await;
        let doomed: Vec<String> = entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &doomed {
            entries.remove(key);
            self.publish(WatchEvent::Delete { key: key.clone() });
        }

        Ok(doomed.len() as u64)
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), value.clone());
        self.publish(WatchEvent::Put {
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<WatchSubscription, StoreError> {
        let mut source = self.events.subscribe();
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let cancel = CancellationToken::new();
        let prefix = prefix.to_string();

        let token = cancel.clone();
        let forwarder = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = token.cancelled() => break,
                    received = source.recv() => received,
                };

                match event {
                    Ok(event) => {
                        let key = match &event {
                            WatchEvent::Put { key, .. } | WatchEvent::Delete { key } => key,
                        };
                        if key.starts_with(&prefix) && tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Watch on {} lagged, {} events dropped", prefix, missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Watch on {} closed", prefix);
        });

        Ok(WatchSubscription::new(rx, cancel, forwarder))
    }

    fn name(&self) -> &str {
        "In-memory metadata store"
    }
}
