//! imgvault Processing Library
//!
//! Turns raw generated images into storage-ready payloads: bounded resize, lossy
//! WebP re-encode, and byte-level format detection for objects that could not be
//! optimized.

pub mod format;
pub mod optimizer;

pub use format::{compression_ratio, detect_format, DetectedFormat};
pub use optimizer::{
    optimize, target_dimensions, ImageOptimizer, OptimizationOutcome, OptimizeError,
    OptimizedImage, OptimizerConfig,
};
