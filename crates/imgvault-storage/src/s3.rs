use crate::keys::validate_key;
use crate::object::{descriptor_from_metadata, verify, ExpectedVersion, ImageObject, PutObject};
use crate::traits::{ImageStore, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use futures::StreamExt;
use http::Method;
use imgvault_core::constants::meta;
use imgvault_core::StoredImage;
use object_store::aws::{AmazonS3Builder, S3ConditionalPut};
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::Error as ObjectStoreError;
use object_store::{
    Attribute, AttributeValue, Attributes, GetOptions, GetResult, ObjectStore, ObjectStoreExt,
    PutMode, PutOptions, PutPayload, UpdateVersion,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// S3 storage implementation
///
/// Lifecycle fields (tier, permanence, creation time, checksum) travel as user
/// metadata (`x-amz-meta-*`); the tier is also applied as the object's storage class.
#[derive(Clone)]
pub struct S3Store {
    store: Arc<dyn ObjectStore>,
    signer: Option<Arc<dyn Signer>>,
    bucket: String,
}

impl S3Store {
    /// Create a new S3Store instance
    ///
    /// # Arguments
    /// * `bucket` - S3 bucket name
    /// * `region` - AWS region (or region identifier for S3-compatible providers)
    /// * `endpoint_url` - Optional custom endpoint URL for S3-compatible providers
    ///   (e.g., "http://localhost:9000" for MinIO)
    pub fn new(bucket: String, region: String, endpoint_url: Option<String>) -> StorageResult<Self> {
        // Credentials come from the standard AWS environment variables.
        let mut builder = AmazonS3Builder::from_env()
            .with_region(region)
            .with_bucket_name(bucket.clone())
            .with_conditional_put(S3ConditionalPut::ETagMatch);

        if let Some(ref endpoint) = endpoint_url {
            let allow_http = endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(allow_http);
        }

        let s3 = Arc::new(
            builder
                .build()
                .map_err(|e| StorageError::ConfigError(e.to_string()))?,
        );

        Ok(S3Store {
            store: s3.clone(),
            signer: Some(s3),
            bucket,
        })
    }

    /// Wrap any `object_store` implementation. Without a signer, presigned URLs are
    /// unavailable.
    pub fn with_object_store(
        store: Arc<dyn ObjectStore>,
        signer: Option<Arc<dyn Signer>>,
        bucket: impl Into<String>,
    ) -> Self {
        S3Store {
            store,
            signer,
            bucket: bucket.into(),
        }
    }

    fn location(key: &str) -> StorageResult<Path> {
        validate_key(key)?;
        Path::parse(key).map_err(|e| StorageError::InvalidKey(e.to_string()))
    }

    fn attributes_for(descriptor: &StoredImage) -> Attributes {
        let mut attributes = Attributes::new();
        attributes.insert(
            Attribute::ContentType,
            AttributeValue::from(descriptor.content_type.clone()),
        );
        if let Some(class) = descriptor.tier.storage_class() {
            attributes.insert(Attribute::StorageClass, AttributeValue::from(class));
        }
        for (name, value) in &descriptor.metadata {
            attributes.insert(
                Attribute::Metadata(name.clone().into()),
                AttributeValue::from(value.clone()),
            );
        }
        attributes
    }

    fn describe(key: &str, result: &GetResult) -> StoredImage {
        let mut content_type = None;
        let mut metadata = BTreeMap::new();
        for (attribute, value) in result.attributes.iter() {
            match attribute {
                Attribute::ContentType => content_type = Some(value.as_ref().to_string()),
                Attribute::Metadata(name) => {
                    metadata.insert(name.to_string(), value.as_ref().to_string());
                }
                _ => {}
            }
        }
        if !metadata.contains_key(meta::TIER) {
            let class = result.attributes.get(&Attribute::StorageClass);
            if let Some(class) = class {
                metadata.insert(meta::TIER.to_string(), class.as_ref().to_string());
            }
        }
        descriptor_from_metadata(
            key,
            content_type,
            result.meta.size,
            metadata,
            result.meta.last_modified,
        )
    }

    fn map_error(&self, key: &str, err: ObjectStoreError) -> StorageError {
        match err {
            ObjectStoreError::NotFound { .. } => StorageError::NotFound(key.to_string()),
            ObjectStoreError::Precondition { .. } | ObjectStoreError::NotModified { .. } => {
                StorageError::PreconditionFailed(format!("{} changed concurrently: {}", key, err))
            }
            ObjectStoreError::PermissionDenied { .. } | ObjectStoreError::Unauthenticated { .. } => {
                StorageError::PermissionDenied(format!("{} on bucket {}: {}", key, self.bucket, err))
            }
            ObjectStoreError::InvalidPath { .. } => StorageError::InvalidKey(err.to_string()),
            ObjectStoreError::UnknownConfigurationKey { .. } => {
                StorageError::ConfigError(err.to_string())
            }
            ObjectStoreError::Generic { .. } => {
                StorageError::Unavailable(err.to_string())
            }
            other => StorageError::BackendError(other.to_string()),
        }
    }

    async fn fetch(&self, key: &str, head: bool) -> StorageResult<GetResult> {
        let location = Self::location(key)?;
        let options = GetOptions {
            head,
            ..Default::default()
        };
        self.store
            .get_opts(&location, options)
            .await
            .map_err(|e| self.map_error(key, e))
    }

    /// Head `key` and check it against `expected`, returning the version to
    /// condition the follow-up write on.
    async fn current_version(
        &self,
        key: &str,
        expected: &ExpectedVersion,
    ) -> StorageResult<UpdateVersion> {
        let result = self.fetch(key, true).await?;
        if !expected.matches(&Self::describe(key, &result)) {
            return Err(expected.conflict(key));
        }
        Ok(UpdateVersion {
            e_tag: result.meta.e_tag.clone(),
            version: result.meta.version.clone(),
        })
    }
}

#[async_trait]
impl ImageStore for S3Store {
    async fn put(&self, object: PutObject) -> StorageResult<StoredImage> {
        let location = Self::location(&object.key)?;
        let descriptor = object.describe();
        let start = std::time::Instant::now();

        let mode = match &object.expected {
            Some(expected) => PutMode::Update(self.current_version(&object.key, expected).await?),
            None => PutMode::Overwrite,
        };
        let options = PutOptions {
            mode,
            attributes: Self::attributes_for(&descriptor),
            ..Default::default()
        };
        let result = self
            .store
            .put_opts(&location, PutPayload::from(object.data), options)
            .await;

        result.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %self.bucket,
                key = %descriptor.key,
                size_bytes = descriptor.size_bytes,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "S3 write failed"
            );
            self.map_error(&descriptor.key, e)
        })?;

        tracing::info!(
            bucket = %self.bucket,
            key = %descriptor.key,
            size_bytes = descriptor.size_bytes,
            tier = %descriptor.tier,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 write successful"
        );

        Ok(descriptor)
    }

    async fn get(&self, key: &str) -> StorageResult<ImageObject> {
        let start = std::time::Instant::now();
        let result = self.fetch(key, false).await.map_err(|e| {
            if !e.is_not_found() {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 read failed"
                );
            }
            e
        })?;

        let descriptor = Self::describe(key, &result);
        let bytes = result
            .bytes()
            .await
            .map_err(|e| self.map_error(key, e))?;
        let object = verify(descriptor, bytes)?;

        tracing::debug!(
            bucket = %self.bucket,
            key = %key,
            size_bytes = object.descriptor.size_bytes,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 read successful"
        );

        Ok(object)
    }

    async fn head(&self, key: &str) -> StorageResult<StoredImage> {
        let result = self.fetch(key, true).await?;
        Ok(Self::describe(key, &result))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let start = std::time::Instant::now();
        let location = Self::location(key)?;

        match self.store.delete(&location).await {
            Ok(()) | Err(ObjectStoreError::NotFound { .. }) => {}
            Err(e) => {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 delete failed"
                );
                return Err(self.map_error(key, e));
            }
        }

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 delete successful"
        );

        Ok(())
    }

    async fn delete_if(&self, key: &str, expected: &ExpectedVersion) -> StorageResult<()> {
        // S3 has no conditional delete; the window is the gap between head and delete.
        match self.current_version(key, expected).await {
            Ok(_) => self.delete(key).await,
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        // object_store lists by path segment; narrow to the string prefix afterwards.
        let directory = match prefix.rsplit_once('/') {
            Some((dir, _)) if !dir.is_empty() => Some(Path::from(dir)),
            _ => None,
        };

        let mut stream = self.store.list(directory.as_ref());
        let mut keys = Vec::new();
        while let Some(item) = stream.next().await {
            let meta = item.map_err(|e| self.map_error(prefix, e))?;
            let key = meta.location.to_string();
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn presigned_url(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        let signer = self.signer.as_ref().ok_or_else(|| {
            StorageError::ConfigError(format!(
                "Bucket {} has no signer; presigned URLs are unavailable",
                self.bucket
            ))
        })?;
        let location = Self::location(key)?;
        let url = signer
            .signed_url(Method::GET, &location, expires_in)
            .await
            .map_err(|e| self.map_error(key, e))?;

        Ok(url.to_string())
    }

    async fn check_access(&self) -> StorageResult<()> {
        let prefix = Path::from(imgvault_core::constants::IMAGE_KEY_PREFIX);
        let mut stream = self.store.list(Some(&prefix));
        match stream.next().await {
            None | Some(Ok(_)) => Ok(()),
            Some(Err(ObjectStoreError::NotFound { .. })) => Err(StorageError::ConfigError(
                format!("Bucket {} does not exist", self.bucket),
            )),
            Some(Err(e)) => Err(self.map_error(&self.bucket, e)),
        }
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::S3
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgvault_core::StorageTier;
    use object_store::memory::InMemory;

    fn store() -> S3Store {
        S3Store::with_object_store(Arc::new(InMemory::new()), None, "test-bucket")
    }

    #[tokio::test]
    async fn metadata_survives_round_trip() {
        let storage = store();
        let written = storage
            .put(
                PutObject::new("generated_images/42.webp", &b"webp"[..], "image/webp")
                    .with_metadata(meta::ASSIGNMENT_ID, "42")
                    .with_metadata(meta::ORIGINAL_SIZE, "100"),
            )
            .await
            .unwrap();

        let read = storage.get("generated_images/42.webp").await.unwrap();
        assert_eq!(read.bytes.as_ref(), b"webp");
        assert_eq!(read.descriptor.content_type, "image/webp");
        assert_eq!(read.descriptor.created_at, written.created_at);
        assert_eq!(read.descriptor.original_size_bytes, Some(100));
        assert_eq!(read.descriptor.assignment_id(), Some("42"));
        assert_eq!(read.descriptor.etag, written.etag);
    }

    #[tokio::test]
    async fn tier_and_permanence_are_rewritten() {
        let storage = store();
        storage
            .put(PutObject::new("generated_images/1.webp", &b"x"[..], "image/webp"))
            .await
            .unwrap();

        storage
            .set_tier("generated_images/1.webp", StorageTier::Archive)
            .await
            .unwrap();
        storage
            .set_permanent("generated_images/1.webp", true)
            .await
            .unwrap();

        let head = storage.head("generated_images/1.webp").await.unwrap();
        assert_eq!(head.tier, StorageTier::Archive);
        assert!(head.permanent);
    }

    #[tokio::test]
    async fn missing_keys_and_listing() {
        let storage = store();
        assert!(storage.get("generated_images/9.webp").await.unwrap_err().is_not_found());
        assert!(!storage.exists("generated_images/9.webp").await.unwrap());
        assert!(storage.delete("generated_images/9.webp").await.is_ok());

        for key in ["generated_images/10.webp", "generated_images/1.png", "other/1.webp"] {
            storage
                .put(PutObject::new(key, &b"x"[..], "image/png"))
                .await
                .unwrap();
        }
        assert_eq!(
            storage.list("generated_images/1").await.unwrap(),
            vec!["generated_images/1.png", "generated_images/10.webp"]
        );
        assert!(storage.check_access().await.is_ok());
    }

    #[tokio::test]
    async fn stale_lifecycle_writes_leave_a_reupload_alone() {
        let storage = store();
        let key = "generated_images/5.webp";
        let old = storage
            .put(PutObject::new(key, &b"old"[..], "image/webp"))
            .await
            .unwrap();
        let stale = ExpectedVersion::of(&old);
        storage
            .put(PutObject::new(key, &b"fresh"[..], "image/webp"))
            .await
            .unwrap();

        let err = storage
            .set_tier_if(key, StorageTier::Infrequent, &stale)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(storage.delete_if(key, &stale).await.unwrap_err().is_conflict());

        let read = storage.get(key).await.unwrap();
        assert_eq!(read.bytes.as_ref(), b"fresh");
        assert_eq!(read.descriptor.tier, StorageTier::Standard);

        storage
            .delete_if(key, &ExpectedVersion::of(&read.descriptor))
            .await
            .unwrap();
        assert!(storage.delete_if(key, &stale).await.is_ok());
        assert!(!storage.exists(key).await.unwrap());
    }

    #[test]
    fn precondition_errors_map_to_conflicts() {
        let storage = store();
        let err = storage.map_error(
            "generated_images/1.webp",
            ObjectStoreError::Precondition {
                path: "generated_images/1.webp".to_string(),
                source: "etag mismatch".into(),
            },
        );
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn presign_requires_signer() {
        let err = store()
            .presigned_url("generated_images/1.webp", Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::ConfigError(_)));
    }
}
