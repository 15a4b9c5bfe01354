//! imgvault Infrastructure Library
//!
//! Shared infrastructure used by the services and the CLI:
//! - Telemetry initialization (`tracing-subscriber`)
//! - Structured operation records for every upload, download, resolve, delete and
//!   tier transition
//! - Error reports safe to hand to callers

#[cfg(feature = "observability-basic")]
pub mod telemetry;

pub mod error;
pub mod operations;

// Re-export commonly used types
#[cfg(feature = "observability-basic")]
pub use telemetry::{init_telemetry, shutdown_telemetry};

pub use error::{log_engine_error, ErrorReport};
pub use operations::{Operation, OperationOutcome, OperationRecord, OperationTimer, OPERATIONS_TARGET};
