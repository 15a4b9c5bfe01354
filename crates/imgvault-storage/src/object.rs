//! Write requests, read results and the metadata encoding shared by backends.

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use imgvault_core::constants::meta;
use imgvault_core::{StorageTier, StoredImage};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::traits::{StorageError, StorageResult};

/// An object read back from a store: descriptor plus verified payload.
#[derive(Debug, Clone)]
pub struct ImageObject {
    pub descriptor: StoredImage,
    pub bytes: Bytes,
}

/// The state of an object a conditional write or delete was decided on.
///
/// Two descriptors match when payload checksum, creation time, tier and
/// permanence are all equal, so a re-upload of identical bytes still counts as a
/// change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedVersion {
    pub etag: String,
    pub created_at: DateTime<Utc>,
    pub tier: StorageTier,
    pub permanent: bool,
}

impl ExpectedVersion {
    pub fn of(descriptor: &StoredImage) -> Self {
        Self {
            etag: descriptor.etag.clone(),
            created_at: descriptor.created_at,
            tier: descriptor.tier,
            permanent: descriptor.permanent,
        }
    }

    pub fn matches(&self, descriptor: &StoredImage) -> bool {
        self.etag == descriptor.etag
            && self.created_at == descriptor.created_at
            && self.tier == descriptor.tier
            && self.permanent == descriptor.permanent
    }

    /// Error for a key whose current descriptor no longer matches.
    pub(crate) fn conflict(&self, key: &str) -> StorageError {
        StorageError::PreconditionFailed(format!(
            "{} changed since it was read (expected etag {})",
            key, self.etag
        ))
    }
}

/// A full-object write.
#[derive(Debug, Clone)]
pub struct PutObject {
    pub key: String,
    pub data: Bytes,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
    pub tier: StorageTier,
    pub permanent: bool,
    pub metadata: BTreeMap<String, String>,
    /// When set, the write only lands if the stored object still matches.
    pub expected: Option<ExpectedVersion>,
}

impl PutObject {
    pub fn new(key: impl Into<String>, data: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            data: data.into(),
            content_type: content_type.into(),
            created_at: Utc::now(),
            tier: StorageTier::Standard,
            permanent: false,
            metadata: BTreeMap::new(),
            expected: None,
        }
    }

    /// Rewrite request that keeps everything about an existing object.
    pub fn from_existing(object: ImageObject) -> Self {
        let d = object.descriptor;
        Self {
            key: d.key,
            data: object.bytes,
            content_type: d.content_type,
            created_at: d.created_at,
            tier: d.tier,
            permanent: d.permanent,
            metadata: d.metadata,
            expected: None,
        }
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_tier(mut self, tier: StorageTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_permanent(mut self, permanent: bool) -> Self {
        self.permanent = permanent;
        self
    }

    /// Make the write conditional on the stored object still being `expected`.
    pub fn if_unchanged(mut self, expected: ExpectedVersion) -> Self {
        self.expected = Some(expected);
        self
    }

    pub fn with_metadata(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(name.into(), value.into());
        self
    }

    /// Descriptor the backend will hold once this write lands.
    pub fn describe(&self) -> StoredImage {
        let etag = content_sha256(&self.data);
        // Metadata keeps millisecond precision; the descriptor matches what reads return.
        let created_at =
            DateTime::from_timestamp_millis(self.created_at.timestamp_millis())
                .unwrap_or(self.created_at);
        let mut metadata = self.metadata.clone();
        metadata.insert(
            meta::CREATED_AT.to_string(),
            created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        );
        metadata.insert(meta::TIER.to_string(), self.tier.as_str().to_string());
        metadata.insert(meta::PERMANENT.to_string(), self.permanent.to_string());
        metadata.insert(meta::CONTENT_SHA256.to_string(), etag.clone());

        StoredImage {
            key: self.key.clone(),
            content_type: self.content_type.clone(),
            size_bytes: self.data.len() as u64,
            original_size_bytes: self
                .metadata
                .get(meta::ORIGINAL_SIZE)
                .and_then(|v| v.parse().ok()),
            etag,
            created_at,
            tier: self.tier,
            permanent: self.permanent,
            metadata,
        }
    }
}

/// SHA-256 of a payload, hex encoded.
pub fn content_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Rebuild a descriptor from flat string metadata, as stored by backends that only
/// keep user metadata next to the object.
///
/// `fallback_created_at` is used when the object was written without a
/// `created-at` entry (for example by another tool).
pub(crate) fn descriptor_from_metadata(
    key: &str,
    content_type: Option<String>,
    size_bytes: u64,
    metadata: BTreeMap<String, String>,
    fallback_created_at: DateTime<Utc>,
) -> StoredImage {
    let created_at = metadata
        .get(meta::CREATED_AT)
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(fallback_created_at);
    let tier = metadata
        .get(meta::TIER)
        .and_then(|v| v.parse().ok())
        .unwrap_or(StorageTier::Standard);
    let permanent = metadata
        .get(meta::PERMANENT)
        .map(|v| v == "true")
        .unwrap_or(false);

    StoredImage {
        key: key.to_string(),
        content_type: content_type
            .unwrap_or_else(|| imgvault_core::constants::UNKNOWN_CONTENT_TYPE.to_string()),
        size_bytes,
        original_size_bytes: metadata
            .get(meta::ORIGINAL_SIZE)
            .and_then(|v| v.parse().ok()),
        etag: metadata
            .get(meta::CONTENT_SHA256)
            .cloned()
            .unwrap_or_default(),
        created_at,
        tier,
        permanent,
        metadata,
    }
}

/// Check a payload against its descriptor's checksum.
///
/// Objects written without a checksum get one computed from the payload read.
pub(crate) fn verify(mut descriptor: StoredImage, bytes: Bytes) -> StorageResult<ImageObject> {
    let actual = content_sha256(&bytes);
    if descriptor.etag.is_empty() {
        descriptor.etag = actual;
    } else if descriptor.etag != actual {
        tracing::error!(
            key = %descriptor.key,
            expected = %descriptor.etag,
            actual = %actual,
            "Stored object failed checksum verification"
        );
        return Err(StorageError::Integrity {
            key: descriptor.key,
            expected: descriptor.etag,
            actual,
        });
    }
    descriptor.size_bytes = bytes.len() as u64;
    Ok(ImageObject { descriptor, bytes })
}
