use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::assignment::AssignmentId;
use super::image::StoredImage;
use crate::constants::meta;

/// Status sentinel persisted with the assignment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Success,
    Failed,
    Pending,
    /// The assignment was saved without a generated image.
    NoImage,
}

/// Image fields the engine writes into the assignment record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSummary {
    pub original_size_bytes: u64,
    pub optimized_size_bytes: u64,
    pub compression_ratio: f64,
    pub format: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl ImageSummary {
    pub fn from_stored(image: &StoredImage) -> Self {
        let original = image.original_size_bytes.unwrap_or(image.size_bytes);
        let dimension = |name: &str| image.metadata.get(name).and_then(|v| v.parse().ok());
        Self {
            original_size_bytes: original,
            optimized_size_bytes: image.size_bytes,
            compression_ratio: image.compression_ratio().unwrap_or(0.0),
            format: image
                .metadata
                .get(meta::FORMAT)
                .cloned()
                .unwrap_or_else(|| image.content_type.clone()),
            width: dimension(meta::WIDTH),
            height: dimension(meta::HEIGHT),
        }
    }
}

/// Record handed to the external metadata store after an upload decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub assignment_id: AssignmentId,
    pub key: Option<String>,
    pub content_type: Option<String>,
    pub image: Option<ImageSummary>,
    pub upload_status: UploadStatus,
    pub upload_attempts: u32,
    pub correlation_id: Option<Uuid>,
}

impl ImageRecord {
    pub fn success(
        assignment_id: AssignmentId,
        stored: &StoredImage,
        attempts: u32,
        correlation_id: Uuid,
    ) -> Self {
        Self {
            assignment_id,
            key: Some(stored.key.clone()),
            content_type: Some(stored.content_type.clone()),
            image: Some(ImageSummary::from_stored(stored)),
            upload_status: UploadStatus::Success,
            upload_attempts: attempts,
            correlation_id: Some(correlation_id),
        }
    }

    pub fn failed(assignment_id: AssignmentId, attempts: u32, correlation_id: Uuid) -> Self {
        Self {
            assignment_id,
            key: None,
            content_type: None,
            image: None,
            upload_status: UploadStatus::Failed,
            upload_attempts: attempts,
            correlation_id: Some(correlation_id),
        }
    }

    pub fn pending(assignment_id: AssignmentId, correlation_id: Uuid) -> Self {
        Self {
            upload_status: UploadStatus::Pending,
            correlation_id: Some(correlation_id),
            ..Self::no_image(assignment_id)
        }
    }

    pub fn no_image(assignment_id: AssignmentId) -> Self {
        Self {
            assignment_id,
            key: None,
            content_type: None,
            image: None,
            upload_status: UploadStatus::NoImage,
            upload_attempts: 0,
            correlation_id: None,
        }
    }

    pub fn has_image(&self) -> bool {
        self.upload_status == UploadStatus::Success && self.key.is_some()
    }
}
