//! imgvault Core Library
//!
//! This crate provides the domain models, error taxonomy, configuration and clock
//! abstraction shared by every imgvault component.

pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod storage_types;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CdnConfig, Config, LifecycleConfig, OptimizerSettings, RetrySettings};
pub use error::{EngineError, ErrorMetadata, LogLevel};
pub use models::{
    AssignmentId, AttemptOutcome, ImageRecord, ImageSummary, RawImage, StorageTier, StoredImage,
    UploadAttempt, UploadStatus,
};
pub use storage_types::StorageBackend;
