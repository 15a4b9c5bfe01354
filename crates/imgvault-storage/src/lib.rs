//! imgvault Storage Library
//!
//! This crate provides the [`ImageStore`] abstraction and its backends: S3 (through
//! `object_store`), the local filesystem and an in-memory store.
//!
//! # Object key format
//!
//! Every generated image lives at `generated_images/{assignment_id}.{ext}`. Keys are
//! deterministic, so re-uploading an assignment overwrites the same object. Key
//! construction and validation are centralized in the `keys` module so all backends
//! agree on the layout.
//!
//! Every backend stores a SHA-256 of the payload next to the object and checks it on
//! read, and keeps tier, permanence and creation time as object metadata.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-memory")]
pub mod memory;
pub mod object;
#[cfg(feature = "storage-s3")]
pub mod s3;
#[cfg(feature = "storage-local")]
pub mod signing;
pub mod traits;

// Re-export commonly used types
pub use factory::create_store;
pub use imgvault_core::StorageBackend;
pub use keys::{image_key, parse_key, validate_key};
#[cfg(feature = "storage-local")]
pub use local::LocalStore;
#[cfg(feature = "storage-memory")]
pub use memory::MemoryStore;
pub use object::{content_sha256, ExpectedVersion, ImageObject, PutObject};
#[cfg(feature = "storage-s3")]
pub use s3::S3Store;
pub use traits::{ImageStore, StorageError, StorageResult};
