//! Domain models shared by the storage, processing and service crates.

pub mod assignment;
pub mod image;
pub mod record;
pub mod upload;

pub use assignment::AssignmentId;
pub use image::{RawImage, StorageTier, StoredImage};
pub use record::{ImageRecord, ImageSummary, UploadStatus};
pub use upload::{AttemptOutcome, UploadAttempt};
