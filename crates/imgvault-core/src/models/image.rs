use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use crate::constants::meta;

/// Storage tier of a stored image.
///
/// Ordering follows the lifecycle: an object only ever moves to a greater tier,
/// and `Deleted` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageTier {
    Standard,
    Infrequent,
    Archive,
    Deleted,
}

impl StorageTier {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageTier::Standard => "STANDARD",
            StorageTier::Infrequent => "INFREQUENT",
            StorageTier::Archive => "ARCHIVE",
            StorageTier::Deleted => "DELETED",
        }
    }

    /// The tier that follows this one, if any.
    pub fn next(self) -> Option<StorageTier> {
        match self {
            StorageTier::Standard => Some(StorageTier::Infrequent),
            StorageTier::Infrequent => Some(StorageTier::Archive),
            StorageTier::Archive => Some(StorageTier::Deleted),
            StorageTier::Deleted => None,
        }
    }

    /// S3 storage class backing this tier. `Deleted` has no storage class.
    ///
    /// Archive uses Glacier Instant Retrieval so archived objects stay readable.
    pub fn storage_class(self) -> Option<&'static str> {
        match self {
            StorageTier::Standard => Some("STANDARD"),
            StorageTier::Infrequent => Some("STANDARD_IA"),
            StorageTier::Archive => Some("GLACIER_IR"),
            StorageTier::Deleted => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == StorageTier::Deleted
    }
}

impl Display for StorageTier {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageTier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "STANDARD" => Ok(StorageTier::Standard),
            "INFREQUENT" | "STANDARD_IA" => Ok(StorageTier::Infrequent),
            "ARCHIVE" | "GLACIER" | "GLACIER_IR" => Ok(StorageTier::Archive),
            "DELETED" => Ok(StorageTier::Deleted),
            _ => Err(anyhow::anyhow!("Invalid storage tier: {}", s)),
        }
    }
}

/// Descriptor of a durable image object. Bytes travel separately on reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredImage {
    pub key: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub original_size_bytes: Option<u64>,
    /// SHA-256 of the stored bytes, hex encoded.
    pub etag: String,
    pub created_at: DateTime<Utc>,
    pub tier: StorageTier,
    pub permanent: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl StoredImage {
    /// Time elapsed since the object was written.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }

    pub fn assignment_id(&self) -> Option<&str> {
        self.metadata.get(meta::ASSIGNMENT_ID).map(String::as_str)
    }

    pub fn was_optimized(&self) -> bool {
        self.metadata
            .get(meta::OPTIMIZED)
            .map(|v| v == "true")
            .unwrap_or(false)
    }

    /// `1 - size/original`, when the original size is known.
    pub fn compression_ratio(&self) -> Option<f64> {
        match self.original_size_bytes {
            Some(0) | None => None,
            Some(original) => Some(1.0 - self.size_bytes as f64 / original as f64),
        }
    }
}

/// Normalized input from the generative source.
#[derive(Debug, Clone)]
pub struct RawImage {
    pub data: Bytes,
    /// Content type reported by the producer, if any. Detection from the bytes wins.
    pub declared_content_type: Option<String>,
}

impl RawImage {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            declared_content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.declared_content_type = Some(content_type.into());
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
