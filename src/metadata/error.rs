use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Metadata store configuration error: {0}")]
    ConfigError(String),

    #[error("Metadata store connection error: {0}")]
    ConnectionError(String),

    #[error("Metadata store backend error: {0}")]
    BackendError(String),

    #[error("Metadata key is not valid UTF-8: {0}")]
    InvalidKey(String),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[cfg(feature = "etcd")]
    #[error("etcd error: {0}")]
    EtcdError(#[from] etcd_client::Error),
}
