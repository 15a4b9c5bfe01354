use crate::keys::validate_key;
use crate::object::{verify, ExpectedVersion, ImageObject, PutObject};
use crate::traits::{ImageStore, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use imgvault_core::StoredImage;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// In-process store for development and tests. Contents vanish with the process.
#[derive(Clone, Default)]
pub struct MemoryStore {
    objects: Arc<RwLock<BTreeMap<String, (StoredImage, Bytes)>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_err() -> StorageError {
        StorageError::BackendError("memory store lock poisoned".to_string())
    }
}

#[async_trait]
impl ImageStore for MemoryStore {
    async fn put(&self, object: PutObject) -> StorageResult<StoredImage> {
        validate_key(&object.key)?;
        let descriptor = object.describe();
        let mut objects = self.objects.write().map_err(|_| Self::lock_err())?;
        if let Some(expected) = &object.expected {
            match objects.get(&object.key) {
                Some((current, _)) if expected.matches(current) => {}
                Some(_) => return Err(expected.conflict(&object.key)),
                None => return Err(StorageError::NotFound(object.key)),
            }
        }
        objects.insert(object.key, (descriptor.clone(), object.data));
        drop(objects);
        tracing::debug!(key = %descriptor.key, size_bytes = descriptor.size_bytes, "Memory store write");
        Ok(descriptor)
    }

    async fn get(&self, key: &str) -> StorageResult<ImageObject> {
        validate_key(key)?;
        let (descriptor, bytes) = self
            .objects
            .read()
            .map_err(|_| Self::lock_err())?
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        verify(descriptor, bytes)
    }

    async fn head(&self, key: &str) -> StorageResult<StoredImage> {
        validate_key(key)?;
        self.objects
            .read()
            .map_err(|_| Self::lock_err())?
            .get(key)
            .map(|(descriptor, _)| descriptor.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        self.objects
            .write()
            .map_err(|_| Self::lock_err())?
            .remove(key);
        Ok(())
    }

    async fn delete_if(&self, key: &str, expected: &ExpectedVersion) -> StorageResult<()> {
        validate_key(key)?;
        let mut objects = self.objects.write().map_err(|_| Self::lock_err())?;
        match objects.get(key) {
            None => Ok(()),
            Some((current, _)) if expected.matches(current) => {
                objects.remove(key);
                Ok(())
            }
            Some(_) => Err(expected.conflict(key)),
        }
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .objects
            .read()
            .map_err(|_| Self::lock_err())?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn presigned_url(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        validate_key(key)?;
        let expires_at = SystemTime::now()
            .checked_add(expires_in)
            .unwrap_or(UNIX_EPOCH)
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Ok(format!("memory://{}?expires={}", key, expires_at))
    }

    async fn check_access(&self) -> StorageResult<()> {
        Ok(())
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgvault_core::StorageTier;

    const KEY: &str = "generated_images/1.webp";

    #[tokio::test]
    async fn conditional_delete_spares_a_newer_object() {
        let store = MemoryStore::new();
        let old = store
            .put(PutObject::new(KEY, &b"old"[..], "image/webp"))
            .await
            .unwrap();
        let expected = ExpectedVersion::of(&old);
        store
            .put(PutObject::new(KEY, &b"new"[..], "image/webp"))
            .await
            .unwrap();

        let err = store.delete_if(KEY, &expected).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.get(KEY).await.unwrap().bytes.as_ref(), b"new");

        let current = ExpectedVersion::of(&store.head(KEY).await.unwrap());
        store.delete_if(KEY, &current).await.unwrap();
        assert!(store.is_empty());
        assert!(store.delete_if(KEY, &current).await.is_ok());
    }

    #[tokio::test]
    async fn tier_rewrite_does_not_replace_a_newer_object() {
        let store = MemoryStore::new();
        let old = store
            .put(PutObject::new(KEY, &b"old"[..], "image/webp"))
            .await
            .unwrap();
        store
            .put(PutObject::new(KEY, &b"new"[..], "image/webp"))
            .await
            .unwrap();

        let err = store
            .set_tier_if(KEY, StorageTier::Infrequent, &ExpectedVersion::of(&old))
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let head = store.head(KEY).await.unwrap();
        assert_eq!(head.tier, StorageTier::Standard);
        assert_eq!(head.etag, crate::content_sha256(b"new"));
    }

    #[tokio::test]
    async fn conditional_put_on_a_missing_key_is_not_found() {
        let store = MemoryStore::new();
        let gone = PutObject::new(KEY, &b"x"[..], "image/webp").describe();
        let err = store
            .put(
                PutObject::new(KEY, &b"x"[..], "image/webp")
                    .if_unchanged(ExpectedVersion::of(&gone)),
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(store.is_empty());
    }
}
