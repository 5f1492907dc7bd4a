pub mod backends;
pub mod config;
pub mod error;
pub mod keys;
pub mod store;
pub mod sync;

pub use config::*;
pub use error::*;
pub use keys::{MetadataField, MetadataKey, MetadataUpdate};
pub use store::*;
pub use sync::{ApplyOutcome, LoadReport, MetadataSync};

use std::sync::Arc;

pub async fn create_store(config: &StoreBackendConfig) -> Result<DynMetadataStore, StoreError> {
    match config {
        StoreBackendConfig::Memory => Ok(Arc::new(backends::memory::MemoryStore::new())),
        #[cfg(feature = "etcd")]
        StoreBackendConfig::Etcd(etcd_config) => Ok(Arc::new(
            backends::etcd::EtcdStore::connect(etcd_config).await?,
        )),
        #[cfg(not(feature = "etcd"))]
        StoreBackendConfig::Etcd(_) => Err(StoreError::ConfigError(
            "etcd backend requested but this build lacks the `etcd` feature".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests;
