use crate::{Config, library::MetadataStore};
use std::path::Path;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum StartupCheckError {
    #[error("Failed to create image directory: {0}")]
    ImageDirectoryCreationFailed(std::io::Error),

    #[error("Failed to create data directory: {0}")]
    DataDirectoryCreationFailed(std::io::Error),

    #[error("Metadata store is unreadable: {0}")]
    MetadataStoreUnreadable(String),

    #[error("Invalid base_url: {0}")]
    InvalidBaseUrl(String),

    #[error("Static files directory does not exist")]
    StaticDirectoryMissing,
}

impl StartupCheckError {
    /// Whether the server cannot meaningfully start with this failure.
    pub fn is_critical(&self) -> bool {
        !matches!(self, StartupCheckError::StaticDirectoryMissing)
    }
}

pub async fn perform_startup_checks(config: &Config) -> Result<(), Vec<StartupCheckError>> {
    let mut errors = Vec::new();

    info!("Performing startup checks...");

    let image_dir = Path::new(&config.storage.image_directory);
    if !image_dir.exists() {
        info!("Image directory does not exist, creating: {:?}", image_dir);
        if let Err(e) = tokio::fs::create_dir_all(image_dir).await {
            error!("Failed to create image directory: {}", e);
            errors.push(StartupCheckError::ImageDirectoryCreationFailed(e));
        } else {
            info!("Image directory created successfully");
        }
    } else {
        info!("Image directory exists: {:?}", image_dir);
    }

    if let Some(data_dir) = config.storage.data_file.parent()
        && !data_dir.as_os_str().is_empty()
        && !data_dir.exists()
    {
        info!("Data directory does not exist, creating: {:?}", data_dir);
        if let Err(e) = tokio::fs::create_dir_all(data_dir).await {
            error!("Failed to create data directory: {}", e);
            errors.push(StartupCheckError::DataDirectoryCreationFailed(e));
        }
    }

    let store = MetadataStore::new(config.storage.data_file.clone());
    match store.load_all().await {
        Ok(records) => info!(
            "Metadata store {:?} holds {} records",
            config.storage.data_file,
            records.len()
        ),
        Err(e) => {
            error!("Metadata store {:?} is unreadable: {}", config.storage.data_file, e);
            errors.push(StartupCheckError::MetadataStoreUnreadable(e.to_string()));
        }
    }

    if let Some(base_url) = &config.app.base_url {
        match url::Url::parse(base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                info!("Image locators will use base URL {}", base_url);
            }
            _ => {
                error!("base_url is not an http(s) URL: {}", base_url);
                errors.push(StartupCheckError::InvalidBaseUrl(base_url.clone()));
            }
        }
    }

    let static_dir = Path::new(&config.static_files.directory);
    if !static_dir.exists() {
        warn!(
            "Static files directory does not exist, gallery client will not be served: {:?}",
            static_dir
        );
        errors.push(StartupCheckError::StaticDirectoryMissing);
    } else {
        info!("Static files directory exists: {:?}", static_dir);
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

    fn config_in(temp_dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.storage.data_file = temp_dir.path().join("data").join("image.json");
        config.storage.image_directory = temp_dir.path().join("uploaded-images");
        config.static_files.directory = temp_dir.path().join("public");
        config
    }

    #[tokio::test]
    async fn test_creates_missing_directories() {
        let temp_dir = TempDir::new().unwrap();
        let config = config_in(&temp_dir);
        std::fs::create_dir_all(&config.static_files.directory).unwrap();

        perform_startup_checks(&config).await.unwrap();

        assert!(config.storage.image_directory.is_dir());
        assert!(config.storage.data_file.parent().unwrap().is_dir());
    }

    #[tokio::test]
    async fn test_missing_static_directory_is_not_critical() {
        let temp_dir = TempDir::new().unwrap();
        let config = config_in(&temp_dir);

        let errors = perform_startup_checks(&config).await.unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(!errors[0].is_critical());
    }

    #[tokio::test]
    async fn test_corrupt_store_and_bad_base_url_are_critical() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = config_in(&temp_dir);
        config.app.base_url = Some("localhost:3000".to_string());
        std::fs::create_dir_all(&config.static_files.directory).unwrap();
        std::fs::create_dir_all(config.storage.data_file.parent().unwrap()).unwrap();
        std::fs::write(&config.storage.data_file, "[{]").unwrap();

        let errors = perform_startup_checks(&config).await.unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(StartupCheckError::is_critical));
        assert!(
            errors
                .iter()
                .any(|e| matches!(e, StartupCheckError::MetadataStoreUnreadable(_)))
        );
        assert!(
            errors
                .iter()
                .any(|e| matches!(e, StartupCheckError::InvalidBaseUrl(_)))
        );
    }
}
