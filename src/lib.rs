use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub mod api;
pub mod catalog;
pub mod identity;
pub mod library;
pub mod metadata;
pub mod startup_checks;
pub mod watcher;

use library::SharedLibrary;
use metadata::MetadataConfig;
use watcher::WatcherSettings;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub name: String,
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Content root; every immediate subdirectory is a group.
    pub base_directory: PathBuf,
    pub watch: bool,
    pub max_concurrent_events: usize,
    /// How long a new file's size must hold still before it is hashed.
    pub settle_interval_ms: u64,
    pub shutdown_grace_seconds: u64,
}

impl CatalogConfig {
    pub fn watcher_settings(&self) -> WatcherSettings {
        WatcherSettings {
            max_concurrent_events: self.max_concurrent_events,
            settle_interval: Duration::from_millis(self.settle_interval_ms),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_seconds),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "image-server".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_directory: PathBuf::from("/image-server"),
            watch: true,
            max_concurrent_events: 64,
            settle_interval_ms: 250,
            shutdown_grace_seconds: 10,
        }
    }
}

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub library: SharedLibrary,
    pub config: Config,
}

pub fn create_app(config: Config, library: SharedLibrary) -> Router {
    let app_state = AppState { library, config };

    Router::new()
        .route("/api/groups", get(api::list_groups_handler))
        .route("/api/groups/{group}", get(api::list_images_handler))
        .route("/api/groups/{group}/random", get(api::random_image_handler))
        .route("/api/groups/{group}/{id}", get(api::get_image_handler))
        .route(
            "/api/groups/{group}/{id}/tags",
            axum::routing::post(api::add_tag_handler).put(api::replace_tags_handler),
        )
        .route(
            "/api/groups/{group}/{id}/tags/{tag}",
            axum::routing::delete(api::remove_tag_handler),
        )
        .route(
            "/api/groups/{group}/{id}/reactions/{reaction}",
            axum::routing::post(api::add_reaction_handler).put(api::replace_reactions_handler),
        )
        .route(
            "/api/groups/{group}/{id}/reactions/{reaction}/{key}",
            axum::routing::delete(api::remove_reaction_handler),
        )
        .route("/raw/{group}/{name}", get(api::raw_image_handler))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    let method = request.method();
                    let uri = request.uri();
                    let matched_path = request
                        .extensions()
                        .get::<axum::extract::MatchedPath>()
                        .map(|matched_path| matched_path.as_str());

                    tracing::info_span!(
                        "http_request",
                        method = %method,
                        uri = %uri,
                        matched_path,
                    )
                })
                .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
                    let user_agent = request
                        .headers()
                        .get("user-agent")
                        .and_then(|h| h.to_str().ok())
                        .unwrap_or("-");

                    tracing::info!(
                        target: "access_log",
                        method = %request.method(),
                        path = %request.uri().path(),
                        user_agent = %user_agent,
                        "request"
                    );
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     _span: &tracing::Span| {
                        tracing::info!(
                            target: "access_log",
                            status = %response.status(),
                            latency_ms = %latency.as_millis(),
                            "response"
                        );
                    },
                ),
        )
        .with_state(app_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::StoreBackendConfig;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml_edit::de::from_str("").unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.catalog.base_directory, PathBuf::from("/image-server"));
        assert!(config.catalog.watch);
        assert_eq!(config.metadata.prefix, "image-server");
        assert!(matches!(config.metadata.backend, StoreBackendConfig::Memory));
    }

    #[test]
    fn test_partial_catalog_section() {
        let config: Config = toml_edit::de::from_str(
            r#"
[catalog]
base_directory = "/srv/images"
settle_interval_ms = 50

[metadata]
prefix = "photos"
backend = "etcd"
endpoints = ["http://127.0.0.1:2379"]
"#,
        )
        .unwrap();

        assert_eq!(config.catalog.base_directory, PathBuf::from("/srv/images"));
        assert_eq!(config.catalog.max_concurrent_events, 64);
        assert_eq!(
            config.catalog.watcher_settings().settle_interval,
            Duration::from_millis(50)
        );
        assert_eq!(config.metadata.prefix, "photos");
        match config.metadata.backend {
            StoreBackendConfig::Etcd(etcd) => {
                assert_eq!(etcd.endpoints, vec!["http://127.0.0.1:2379"]);
                assert!(etcd.username.is_none());
            }
            other => panic!("expected etcd backend, got {:?}", other),
        }
    }

    #[test]
    fn test_metadata_section_without_backend_uses_memory() {
        let config: Config = toml_edit::de::from_str(
            r#"
[metadata]
prefix = "photos"
"#,
        )
        .unwrap();

        assert_eq!(config.metadata.prefix, "photos");
        assert!(matches!(config.metadata.backend, StoreBackendConfig::Memory));
    }

    #[test]
    fn test_etcd_backend_requires_endpoints() {
        let result = toml_edit::de::from_str::<Config>(
            r#"
[metadata]
backend = "etcd"
"#,
        );
        assert!(result.is_err());
    }
}
