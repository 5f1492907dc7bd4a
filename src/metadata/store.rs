use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
}

/// A live prefix watch. Events arrive in the order the store produced them.
/// Call [`WatchSubscription::cancel`] to unsubscribe before dropping it.
#[derive(Debug)]
pub struct WatchSubscription {
    events: mpsc::Receiver<WatchEvent>,
    cancel: CancellationToken,
    forwarder: Option<JoinHandle<()>>,
}

impl WatchSubscription {
    pub fn new(
        events: mpsc::Receiver<WatchEvent>,
        cancel: CancellationToken,
        forwarder: JoinHandle<()>,
    ) -> Self {
        Self {
            events,
            cancel,
            forwarder: Some(forwarder),
        }
    }

    /// Next event, or `None` once the backend closed the stream.
    pub async fn next(&mut self) -> Option<WatchEvent> {
        self.events.recv().await
    }

    /// Stop the backend watch and wait for it to release its handle.
    pub async fn cancel(mut self) {
        self.cancel.cancel();
        self.events.close();
        if let Some(forwarder) = self.forwarder.take()
            && let Err(e) = forwarder.await
        {
            tracing::warn!("Watch forwarder ended abnormally: {}", e);
        }
    }
}

impl Drop for WatchSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// The distributed key-value store holding tags and reactions.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Every key under `prefix`, in key order.
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError>;

    /// Delete every key under `prefix`, returning how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError>;

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    async fn watch_prefix(&self, prefix: &str) -> Result<WatchSubscription, StoreError>;

    fn name(&self) -> &str;
}

pub type DynMetadataStore = Arc<dyn MetadataStore>;
