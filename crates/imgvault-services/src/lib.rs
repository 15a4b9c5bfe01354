//! imgvault Services Library
//!
//! The three coordinators of the engine, built on the storage and processing crates:
//! - Upload Coordinator: optimize, then write with bounded retry
//! - Retrieval Coordinator: CDN-first delivery references, signed fallbacks and an
//!   edge cache for byte reads
//! - Lifecycle Manager: age-based tier transitions, sweeps and their scheduler

#[cfg(feature = "upload")]
pub mod upload;

#[cfg(feature = "retrieval")]
pub mod retrieval;

#[cfg(feature = "lifecycle")]
pub mod lifecycle;

#[cfg(feature = "upload")]
pub use upload::{
    UploadCoordinator, UploadError, UploadMachine, UploadOptions, UploadReceipt, UploadState,
};

#[cfg(feature = "retrieval")]
pub use retrieval::{
    Access, CacheEntry, CacheStatus, Delivery, DeliveryReference, Displayable, EdgeCache,
    RetrievalCoordinator,
};

#[cfg(feature = "lifecycle")]
pub use lifecycle::{
    evaluate, LifecycleHandle, LifecycleManager, LifecyclePolicy, LifecycleScheduler,
    SweepFailure, SweepReport, TierTransition,
};
