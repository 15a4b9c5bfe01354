//! Upload Coordinator.
//!
//! `upload(raw, assignment_id)` validates the assignment, optimizes the image (falling
//! back to the original bytes), and writes it to `generated_images/{id}.{ext}` with up
//! to three attempts. Writes are full overwrites, so re-driving an upload converges on
//! a single object.

mod coordinator;
mod machine;

pub use coordinator::{UploadCoordinator, UploadError, UploadOptions, UploadReceipt};
pub use machine::{InvalidTransition, UploadMachine, UploadState};
