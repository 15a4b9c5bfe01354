//! Object key layout shared by every backend.
//!
//! Key format: `generated_images/{assignment_id}.{ext}`.

use imgvault_core::constants::IMAGE_KEY_PREFIX;
use imgvault_core::AssignmentId;

use crate::traits::{StorageError, StorageResult};

/// Build the object key for an assignment's image.
pub fn image_key(assignment_id: &AssignmentId, extension: &str) -> String {
    format!(
        "{}/{}.{}",
        IMAGE_KEY_PREFIX,
        assignment_id,
        extension.trim_start_matches('.').to_ascii_lowercase()
    )
}

/// Listing prefix covering every object under the image namespace.
pub fn image_prefix() -> String {
    format!("{}/", IMAGE_KEY_PREFIX)
}

/// Split an image key into `(assignment_id, extension)`.
///
/// Returns `None` for keys outside the image namespace or without an extension.
pub fn parse_key(key: &str) -> Option<(AssignmentId, String)> {
    let name = key
        .strip_prefix(IMAGE_KEY_PREFIX)?
        .strip_prefix('/')?;
    let (id, ext) = name.rsplit_once('.')?;
    if ext.is_empty() || ext.contains('/') {
        return None;
    }
    let id = AssignmentId::parse(id).ok()?;
    Some((id, ext.to_string()))
}

/// Reject keys that could escape the store root or are not object names.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("Storage key is empty".to_string()));
    }
    if key.starts_with('/') || key.contains('\\') {
        return Err(StorageError::InvalidKey(format!(
            "Storage key must be a relative path: {}",
            key
        )));
    }
    if key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(StorageError::InvalidKey(format!(
            "Storage key contains invalid segments: {}",
            key
        )));
    }
    Ok(())
}
