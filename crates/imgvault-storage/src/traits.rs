//! Storage abstraction trait
//!
//! This module defines the [`ImageStore`] trait that all storage backends implement,
//! and the [`StorageError`] type they report.

use crate::object::{ExpectedVersion, ImageObject, PutObject};
use crate::StorageBackend;
use async_trait::async_trait;
use imgvault_core::{EngineError, StorageTier, StoredImage};
use std::time::Duration;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Access denied: {0}")]
    PermissionDenied(String),

    /// Network or service availability failure; the same request may succeed later.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A conditional write or delete found the object changed since it was read.
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Checksum mismatch for {key}: expected {expected}, got {actual}")]
    Integrity {
        key: String,
        expected: String,
        actual: String,
    },
}

impl StorageError {
    /// Whether retrying the same request could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Unavailable(_) => true,
            StorageError::IoError(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::PreconditionFailed(_))
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::NotFound(_) => true,
            StorageError::IoError(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        if err.is_transient() {
            return EngineError::TransientNetwork(err.to_string());
        }
        if err.is_not_found() {
            return EngineError::NotFound(err.to_string());
        }
        match err {
            StorageError::PermissionDenied(msg) => EngineError::Permission(msg),
            StorageError::IoError(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                EngineError::Permission(e.to_string())
            }
            StorageError::ConfigError(msg) => EngineError::Configuration(msg),
            StorageError::PreconditionFailed(msg) => EngineError::Conflict(msg),
            StorageError::InvalidKey(msg) | StorageError::InvalidRequest(msg) => {
                EngineError::InvalidInput(msg)
            }
            StorageError::Integrity {
                key,
                expected,
                actual,
            } => EngineError::Integrity {
                key,
                expected,
                actual,
            },
            other => EngineError::Configuration(other.to_string()),
        }
    }
}

/// Attempts at a read-modify-write tag change before a conflict is returned.
const MAX_TAG_REWRITES: usize = 3;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage abstraction trait
///
/// All storage backends (S3, local filesystem, memory) implement this trait so the
/// coordinators never depend on a specific backend.
///
/// Writes are full overwrites: putting the same key twice leaves exactly one object
/// holding the second payload. Reads verify the stored checksum.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Write (or overwrite) an object and return its descriptor.
    async fn put(&self, object: PutObject) -> StorageResult<StoredImage>;

    /// Read an object and verify its checksum.
    async fn get(&self, key: &str) -> StorageResult<ImageObject>;

    /// Read an object's descriptor without its payload.
    async fn head(&self, key: &str) -> StorageResult<StoredImage>;

    /// Delete an object. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Keys starting with `prefix`, in lexicographic order.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Time-limited URL granting read access to a single object.
    async fn presigned_url(&self, key: &str, expires_in: Duration) -> StorageResult<String>;

    /// Verify the bucket or directory is reachable and usable.
    async fn check_access(&self) -> StorageResult<()>;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self.head(key).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Delete an object only if it still matches `expected`.
    ///
    /// A missing key succeeds; a changed object fails with
    /// [`StorageError::PreconditionFailed`] and is left in place.
    async fn delete_if(&self, key: &str, expected: &ExpectedVersion) -> StorageResult<()>;

    /// Move an object to another storage tier. The object is rewritten in place with
    /// the same payload, so it stays readable throughout.
    async fn set_tier(&self, key: &str, tier: StorageTier) -> StorageResult<StoredImage> {
        let current = self.head(key).await?;
        self.set_tier_if(key, tier, &ExpectedVersion::of(&current))
            .await
    }

    /// [`ImageStore::set_tier`] for an object that must still match `expected`.
    ///
    /// The rewrite itself is conditional, so a write landing after the read is
    /// never replaced by the older payload.
    async fn set_tier_if(
        &self,
        key: &str,
        tier: StorageTier,
        expected: &ExpectedVersion,
    ) -> StorageResult<StoredImage> {
        if tier.is_terminal() {
            return Err(StorageError::InvalidRequest(format!(
                "{} is not a storage tier; delete the object instead",
                tier
            )));
        }
        let current = self.get(key).await?;
        if !expected.matches(&current.descriptor) {
            return Err(expected.conflict(key));
        }
        if current.descriptor.tier == tier {
            return Ok(current.descriptor);
        }
        let version = ExpectedVersion::of(&current.descriptor);
        self.put(
            PutObject::from_existing(current)
                .with_tier(tier)
                .if_unchanged(version),
        )
        .await
    }

    /// Set or clear the permanence tag.
    ///
    /// The rewrite is conditional on the object read; a concurrent write makes it
    /// re-read and try again, up to a small bound.
    async fn set_permanent(&self, key: &str, permanent: bool) -> StorageResult<StoredImage> {
        let mut attempt = 1;
        loop {
            let current = self.get(key).await?;
            if current.descriptor.permanent == permanent {
                return Ok(current.descriptor);
            }
            let version = ExpectedVersion::of(&current.descriptor);
            let result = self
                .put(
                    PutObject::from_existing(current)
                        .with_permanent(permanent)
                        .if_unchanged(version),
                )
                .await;
            match result {
                Err(e) if e.is_conflict() && attempt < MAX_TAG_REWRITES => {
                    tracing::debug!(key = %key, attempt, "Object changed while tagging; re-reading");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
