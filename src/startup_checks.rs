use crate::Config;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum StartupCheckError {
    #[error("Base directory does not exist: {0:?}")]
    BaseDirectoryMissing(PathBuf),

    #[error("Base directory is not readable: {path:?}: {source}")]
    BaseDirectoryUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Base directory contains no group directories: {0:?}")]
    NoGroups(PathBuf),

    #[error("Invalid metadata prefix {0:?}: must be non-empty without a trailing '/'")]
    InvalidMetadataPrefix(String),
}

impl StartupCheckError {
    /// Critical failures stop the server from starting.
    pub fn is_critical(&self) -> bool {
        !matches!(self, StartupCheckError::NoGroups(_))
    }
}

pub async fn perform_startup_checks(config: &Config) -> Result<(), Vec<StartupCheckError>> {
    let mut errors = Vec::new();

    info!("Performing startup checks...");

    let base_dir = &config.catalog.base_directory;
    if !base_dir.is_dir() {
        error!("Base directory does not exist: {:?}", base_dir);
        errors.push(StartupCheckError::BaseDirectoryMissing(base_dir.clone()));
    } else {
        info!("Base directory exists: {:?}", base_dir);

        match tokio::fs::read_dir(base_dir).await {
            Ok(mut entries) => {
                let mut groups = 0usize;
                while let Ok(Some(entry)) = entries.next_entry().await {
                    if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                        groups += 1;
                    }
                }

                if groups == 0 {
                    warn!("Base directory has no group directories: {:?}", base_dir);
                    errors.push(StartupCheckError::NoGroups(base_dir.clone()));
                } else {
                    info!("Found {} group directories", groups);
                }
            }
            Err(e) => {
                error!("Base directory is not accessible: {}", e);
                errors.push(StartupCheckError::BaseDirectoryUnreadable {
                    path: base_dir.clone(),
                    source: e,
                });
            }
        }
    }

    let prefix = &config.metadata.prefix;
    if prefix.is_empty() || prefix.ends_with('/') {
        error!("Invalid metadata prefix: {:?}", prefix);
        errors.push(StartupCheckError::InvalidMetadataPrefix(prefix.clone()));
    }

    if errors.is_empty() {
        info!("All startup checks passed");
        Ok(())
    } else {
        error!("Startup checks failed with {} errors", errors.len());
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_for(base_directory: PathBuf) -> Config {
        let mut config = Config::default();
        config.catalog.base_directory = base_directory;
        config
    }

    #[tokio::test]
    async fn test_checks_pass_with_groups() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("pets")).unwrap();

        let result = perform_startup_checks(&config_for(temp_dir.path().to_path_buf())).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_missing_base_directory_is_critical() {
        let temp_dir = TempDir::new().unwrap();
        let errors = perform_startup_checks(&config_for(temp_dir.path().join("missing")))
            .await
            .unwrap_err();

        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], StartupCheckError::BaseDirectoryMissing(_)));
        assert!(errors[0].is_critical());
    }

    #[tokio::test]
    async fn test_empty_base_directory_is_warning() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("loose.png"), b"x").unwrap();

        let errors = perform_startup_checks(&config_for(temp_dir.path().to_path_buf()))
            .await
            .unwrap_err();

        assert!(matches!(errors[0], StartupCheckError::NoGroups(_)));
        assert!(!errors[0].is_critical());
    }

    #[tokio::test]
    async fn test_metadata_prefix_validation() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("pets")).unwrap();

        for prefix in ["", "image-server/"] {
            let mut config = config_for(temp_dir.path().to_path_buf());
            config.metadata.prefix = prefix.to_string();

            let errors = perform_startup_checks(&config).await.unwrap_err();
            assert!(matches!(errors[0], StartupCheckError::InvalidMetadataPrefix(_)));
            assert!(errors[0].is_critical());
        }
    }
}
