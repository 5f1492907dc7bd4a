use async_trait::async_trait;
use etcd_client::{
    Client, ConnectOptions, DeleteOptions, EventType, GetOptions, WatchOptions,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::metadata::{
    EtcdConfig, KeyValue, MetadataStore, StoreError, WatchEvent, WatchSubscription,
};

const WATCH_BUFFER: usize = 1024;

pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    pub async fn connect(config: &EtcdConfig) -> Result<Self, StoreError> {
        if config.endpoints.is_empty() {
            return Err(StoreError::ConfigError(
                "etcd backend needs at least one endpoint".to_string(),
            ));
        }

        let mut options = ConnectOptions::new();
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options = options.with_user(username.clone(), password.clone());
        }

        let client = Client::connect(&config.endpoints, Some(options))
            .await
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;

        info!("Connected to etcd at {:?}", config.endpoints);
        Ok(Self { client })
    }
}

#[async_trait]
impl MetadataStore for EtcdStore {
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError> {
        let mut kv = self.client.kv_client();
        let response = kv
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await?;

        response
            .kvs()
            .iter()
            .map(|entry| {
                let key = entry
                    .key_str()
                    .map_err(|_| StoreError::InvalidKey(String::from_utf8_lossy(entry.key()).into_owned()))?;
                Ok(KeyValue {
                    key: key.to_string(),
                    value: entry.value().to_vec(),
                })
            })
            .collect()
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        let mut kv = self.client.kv_client();
        let response = kv
            .delete(prefix, Some(DeleteOptions::new().with_prefix()))
            .await?;
        Ok(response.deleted().max(0) as u64)
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let mut kv = self.client.kv_client();
        kv.put(key, value, None).await?;
        Ok(())
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<WatchSubscription, StoreError> {
        let mut watch_client = self.client.watch_client();
        let (mut watcher, mut stream) = watch_client
            .watch(prefix, Some(WatchOptions::new().with_prefix()))
            .await?;

        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let prefix = prefix.to_string();

        let forwarder = tokio::spawn(async move {
            'outer: loop {
                let message = tokio::select! {
                    _ = token.cancelled() => break,
                    message = stream.message() => message,
                };

                let response = match message {
                    Ok(Some(response)) => response,
                    Ok(None) => {
                        warn!("etcd watch on {} closed by server", prefix);
                        break;
                    }
                    Err(e) => {
                        error!("etcd watch on {} failed: {}", prefix, e);
                        break;
                    }
                };

                for event in response.events() {
                    let Some(entry) = event.kv() else {
                        continue;
                    };
                    let Ok(key) = entry.key_str() else {
                        warn!("Skipping non UTF-8 key under {}", prefix);
                        continue;
                    };

                    let forwarded = match event.event_type() {
                        EventType::Put => WatchEvent::Put {
                            key: key.to_string(),
                            value: entry.value().to_vec(),
                        },
                        EventType::Delete => WatchEvent::Delete {
                            key: key.to_string(),
                        },
                    };

                    if tx.send(forwarded).await.is_err() {
                        break 'outer;
                    }
                }
            }

            if let Err(e) = watcher.cancel().await {
                debug!("Cancelling etcd watch on {}: {}", prefix, e);
            }
        });

        Ok(WatchSubscription::new(rx, cancel, forwarder))
    }

    fn name(&self) -> &str {
        "etcd metadata store"
    }
}
