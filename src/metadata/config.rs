use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// Root of every key this service reads or writes, without a trailing `/`.
    pub prefix: String,
    #[serde(flatten)]
    pub backend: StoreBackendConfig,
}

/// Selected by the `backend` key; a table without one uses the memory store.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(tag = "backend", rename_all = "lowercase", try_from = "BackendFields")]
pub enum StoreBackendConfig {
    #[default]
    Memory,
    Etcd(EtcdConfig),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EtcdConfig {
    pub endpoints: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum BackendKind {
    #[default]
    Memory,
    Etcd,
}

#[derive(Deserialize)]
struct BackendFields {
    #[serde(default)]
    backend: BackendKind,
    endpoints: Option<Vec<String>>,
    username: Option<String>,
    password: Option<String>,
}

impl TryFrom<BackendFields> for StoreBackendConfig {
    type Error = String;

    fn try_from(fields: BackendFields) -> Result<Self, Self::Error> {
        match fields.backend {
            BackendKind::Memory => Ok(StoreBackendConfig::Memory),
            BackendKind::Etcd => Ok(StoreBackendConfig::Etcd(EtcdConfig {
                endpoints: fields
                    .endpoints
                    .ok_or_else(|| "etcd backend requires `endpoints`".to_string())?,
                username: fields.username,
                password: fields.password,
            })),
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            prefix: "image-server".to_string(),
            backend: StoreBackendConfig::Memory,
        }
    }
}
