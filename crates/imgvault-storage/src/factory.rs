#[cfg(feature = "storage-local")]
use crate::LocalStore;
#[cfg(feature = "storage-memory")]
use crate::MemoryStore;
#[cfg(feature = "storage-s3")]
use crate::S3Store;
use crate::{ImageStore, StorageBackend, StorageError, StorageResult};
use imgvault_core::Config;
use std::sync::Arc;

/// Create a storage backend based on configuration
pub async fn create_store(config: &Config) -> StorageResult<Arc<dyn ImageStore>> {
    match config.storage_backend() {
        #[cfg(feature = "storage-s3")]
        StorageBackend::S3 => {
            let bucket = config
                .s3_bucket()
                .map(String::from)
                .ok_or_else(|| StorageError::ConfigError("S3_BUCKET not configured".to_string()))?;
            let region = config
                .s3_region()
                .map(String::from)
                .or_else(|| config.aws_region().map(String::from))
                .ok_or_else(|| {
                    StorageError::ConfigError("S3_REGION or AWS_REGION not configured".to_string())
                })?;
            let endpoint = config.s3_endpoint().map(String::from);

            let store = S3Store::new(bucket, region, endpoint)?;
            Ok(Arc::new(store))
        }

        #[cfg(not(feature = "storage-s3"))]
        StorageBackend::S3 => Err(StorageError::ConfigError(
            "S3 storage backend not available (storage-s3 feature not enabled)".to_string(),
        )),

        #[cfg(feature = "storage-local")]
        StorageBackend::Local => {
            let base_path = config
                .local_storage_path()
                .map(String::from)
                .ok_or_else(|| {
                    StorageError::ConfigError("LOCAL_STORAGE_PATH not configured".to_string())
                })?;
            let base_url = config
                .local_storage_base_url()
                .map(String::from)
                .ok_or_else(|| {
                    StorageError::ConfigError("LOCAL_STORAGE_BASE_URL not configured".to_string())
                })?;
            let secret = config.local_signing_secret().ok_or_else(|| {
                StorageError::ConfigError("LOCAL_SIGNING_SECRET not configured".to_string())
            })?;

            let store = LocalStore::new(base_path, base_url, secret.as_bytes()).await?;
            Ok(Arc::new(store))
        }

        #[cfg(not(feature = "storage-local"))]
        StorageBackend::Local => Err(StorageError::ConfigError(
            "Local storage backend not available (storage-local feature not enabled)".to_string(),
        )),

        #[cfg(feature = "storage-memory")]
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory image storage; objects are lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }

        #[cfg(not(feature = "storage-memory"))]
        StorageBackend::Memory => Err(StorageError::ConfigError(
            "Memory storage backend not available (storage-memory feature not enabled)"
                .to_string(),
        )),
    }
}

#[cfg(all(test, feature = "storage-local", feature = "storage-memory"))]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| map.get(name).cloned()).unwrap()
    }

    #[tokio::test]
    async fn creates_configured_backend() {
        let memory = create_store(&config(&[("STORAGE_BACKEND", "memory")]))
            .await
            .unwrap();
        assert_eq!(memory.backend_type(), StorageBackend::Memory);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_string_lossy().into_owned();
        let local = create_store(&config(&[
            ("STORAGE_BACKEND", "local"),
            ("LOCAL_STORAGE_PATH", path.as_str()),
            ("LOCAL_STORAGE_BASE_URL", "http://localhost:8080/media"),
            ("LOCAL_SIGNING_SECRET", "0123456789abcdef0123456789abcdef"),
        ]))
        .await
        .unwrap();
        assert_eq!(local.backend_type(), StorageBackend::Local);
    }

    #[tokio::test]
    async fn missing_settings_are_configuration_errors() {
        let result = create_store(&config(&[("STORAGE_BACKEND", "local")])).await;
        assert!(matches!(result, Err(StorageError::ConfigError(_))));
    }
}
