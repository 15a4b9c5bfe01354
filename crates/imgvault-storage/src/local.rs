use crate::keys::validate_key;
use crate::object::{verify, ExpectedVersion, ImageObject, PutObject};
use crate::signing::{self, TokenError};
use crate::traits::{ImageStore, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use imgvault_core::StoredImage;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use uuid::Uuid;

const SIDECAR_SUFFIX: &str = ".meta.json";
const TEMP_PREFIX: &str = ".tmp-";
const ACCESS_PROBE: &str = ".imgvault-access-check";
const LOCK_STRIPES: usize = 64;

/// Local filesystem storage implementation
///
/// Each object is a plain file under `base_path` plus a `{file}.meta.json` sidecar
/// holding its descriptor. Files are written to a temporary name and renamed into
/// place, so readers never observe a partial payload.
///
/// Payload and sidecar change together under a per-key lock (striped by key
/// hash): writers and deletes hold it exclusively, reads hold it shared, so a
/// read never pairs one write's bytes with another write's checksum. The lock is
/// per process.
#[derive(Clone)]
pub struct LocalStore {
    base_path: PathBuf,
    base_url: String,
    signing_secret: Vec<u8>,
    stripes: Arc<Vec<RwLock<()>>>,
}

impl LocalStore {
    /// Create a new LocalStore instance
    ///
    /// # Arguments
    /// * `base_path` - Root directory for image storage (e.g., "/var/lib/imgvault")
    /// * `base_url` - Base URL the directory is served under (e.g., "http://localhost:8080/media")
    /// * `signing_secret` - HMAC secret for signed read URLs
    pub async fn new(
        base_path: impl Into<PathBuf>,
        base_url: String,
        signing_secret: impl Into<Vec<u8>>,
    ) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalStore {
            base_path,
            base_url: base_url.trim_end_matches('/').to_string(),
            signing_secret: signing_secret.into(),
            stripes: Arc::new((0..LOCK_STRIPES).map(|_| RwLock::new(())).collect()),
        })
    }

    fn stripe(&self, key: &str) -> &RwLock<()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.stripes[(hasher.finish() as usize) % self.stripes.len()]
    }

    async fn remove_quietly(path: &Path) {
        if let Err(e) = fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove temporary file");
            }
        }
    }

    /// Convert a storage key to a filesystem path with security validation.
    fn key_to_path(&self, storage_key: &str) -> StorageResult<PathBuf> {
        validate_key(storage_key)?;
        let file_name = storage_key.rsplit('/').next().unwrap_or(storage_key);
        if file_name.ends_with(SIDECAR_SUFFIX) || file_name.starts_with(TEMP_PREFIX) {
            return Err(StorageError::InvalidKey(format!(
                "Storage key uses a reserved name: {}",
                storage_key
            )));
        }

        let path = self.base_path.join(storage_key);
        if path.strip_prefix(&self.base_path).is_err() {
            return Err(StorageError::InvalidKey(
                "Storage key resolves outside storage directory".to_string(),
            ));
        }
        Ok(path)
    }

    fn sidecar_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(SIDECAR_SUFFIX);
        PathBuf::from(name)
    }

    fn generate_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }

    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write `data` next to `path` under a temporary name, then rename over `path`.
    async fn write_atomic(path: &Path, data: &[u8]) -> StorageResult<()> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = path.with_file_name(format!(
            "{}{}-{}",
            TEMP_PREFIX,
            Uuid::new_v4().simple(),
            file_name
        ));

        let mut file = fs::File::create(&temp).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = fs::rename(&temp, path).await {
            Self::remove_quietly(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn read_descriptor(&self, key: &str, path: &Path) -> StorageResult<StoredImage> {
        let raw = match fs::read(Self::sidecar_path(path)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&raw).map_err(|e| {
            StorageError::BackendError(format!("Corrupt metadata for {}: {}", key, e))
        })
    }

    /// Remove payload and sidecar. Callers hold the key's write lock.
    async fn remove_object(&self, key: &str, path: &Path) -> StorageResult<()> {
        let start = std::time::Instant::now();

        for target in [path.to_path_buf(), Self::sidecar_path(path)] {
            match fs::remove_file(&target).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        tracing::info!(
            path = %path.display(),
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage delete successful"
        );

        Ok(())
    }

    /// Serve a URL produced by [`ImageStore::presigned_url`].
    ///
    /// Access without a token, with a token for another key, or after expiry is
    /// rejected with [`StorageError::PermissionDenied`].
    pub async fn open_signed(&self, key: &str, token: Option<&str>) -> StorageResult<ImageObject> {
        let token = token.ok_or_else(|| {
            StorageError::PermissionDenied(format!("Unsigned access to {}", key))
        })?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        signing::verify(token, key, now, &self.signing_secret).map_err(|e| {
            let reason = match e {
                TokenError::Expired => "expired signature",
                TokenError::BadSignature | TokenError::Malformed => "invalid signature",
            };
            tracing::warn!(key = %key, reason, "Rejected signed access");
            StorageError::PermissionDenied(format!("{} for {}", reason, key))
        })?;
        self.get(key).await
    }

    /// Split a URL produced by [`ImageStore::presigned_url`] into `(key, token)`.
    pub fn parse_signed_url<'a>(&self, url: &'a str) -> Option<(&'a str, Option<&'a str>)> {
        let rest = url.strip_prefix(self.base_url.as_str())?.strip_prefix('/')?;
        match rest.split_once("?token=") {
            Some((key, token)) => Some((key, Some(token))),
            None => Some((rest, None)),
        }
    }
}

#[async_trait]
impl ImageStore for LocalStore {
    async fn put(&self, object: PutObject) -> StorageResult<StoredImage> {
        let path = self.key_to_path(&object.key)?;
        let descriptor = object.describe();
        let start = std::time::Instant::now();

        self.ensure_parent_dir(&path).await?;

        let sidecar = serde_json::to_vec_pretty(&descriptor)
            .map_err(|e| StorageError::BackendError(e.to_string()))?;

        let _guard = self.stripe(&object.key).write().await;
        if let Some(expected) = &object.expected {
            let current = self.read_descriptor(&object.key, &path).await?;
            if !expected.matches(&current) {
                return Err(expected.conflict(&object.key));
            }
        }
        Self::write_atomic(&path, &object.data).await?;
        Self::write_atomic(&Self::sidecar_path(&path), &sidecar).await?;

        tracing::info!(
            path = %path.display(),
            key = %descriptor.key,
            size_bytes = descriptor.size_bytes,
            tier = %descriptor.tier,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage write successful"
        );

        Ok(descriptor)
    }

    async fn get(&self, key: &str) -> StorageResult<ImageObject> {
        let path = self.key_to_path(key)?;
        let start = std::time::Instant::now();

        let (descriptor, data) = {
            let _guard = self.stripe(key).read().await;
            let descriptor = self.read_descriptor(key, &path).await?;
            match fs::read(&path).await {
                Ok(data) => (descriptor, data),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(StorageError::NotFound(key.to_string()))
                }
                Err(e) => return Err(e.into()),
            }
        };
        let object = verify(descriptor, Bytes::from(data))?;

        tracing::debug!(
            path = %path.display(),
            key = %key,
            size_bytes = object.descriptor.size_bytes,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage read successful"
        );

        Ok(object)
    }

    async fn head(&self, key: &str) -> StorageResult<StoredImage> {
        let path = self.key_to_path(key)?;
        let _guard = self.stripe(key).read().await;
        self.read_descriptor(key, &path).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_to_path(key)?;
        let _guard = self.stripe(key).write().await;
        self.remove_object(key, &path).await
    }

    async fn delete_if(&self, key: &str, expected: &ExpectedVersion) -> StorageResult<()> {
        let path = self.key_to_path(key)?;
        let _guard = self.stripe(key).write().await;
        match self.read_descriptor(key, &path).await {
            Ok(current) if expected.matches(&current) => self.remove_object(key, &path).await,
            Ok(_) => Err(expected.conflict(key)),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![self.base_path.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.ends_with(SIDECAR_SUFFIX)
                    || name.starts_with(TEMP_PREFIX)
                    || name == ACCESS_PROBE
                {
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&self.base_path) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn presigned_url(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        self.key_to_path(key)?;
        let expires_at = SystemTime::now()
            .checked_add(expires_in)
            .unwrap_or(SystemTime::UNIX_EPOCH)
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let token = signing::sign(key, expires_at, &self.signing_secret);
        Ok(format!("{}?token={}", self.generate_url(key), token))
    }

    async fn check_access(&self) -> StorageResult<()> {
        let meta = fs::metadata(&self.base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Storage directory {} is not accessible: {}",
                self.base_path.display(),
                e
            ))
        })?;
        if !meta.is_dir() {
            return Err(StorageError::ConfigError(format!(
                "Storage path {} is not a directory",
                self.base_path.display()
            )));
        }

        let probe = self.base_path.join(ACCESS_PROBE);
        fs::write(&probe, b"ok").await.map_err(|e| {
            StorageError::PermissionDenied(format!(
                "Storage directory {} is not writable: {}",
                self.base_path.display(),
                e
            ))
        })?;
        Self::remove_quietly(&probe).await;
        Ok(())
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}
