//! Shared constants: object naming, metadata attribute names and defaults.

/// Prefix under which every generated image is stored.
pub const IMAGE_KEY_PREFIX: &str = "generated_images";

/// Extension and MIME type of successfully optimized images.
pub const OPTIMIZED_EXTENSION: &str = "webp";
pub const OPTIMIZED_CONTENT_TYPE: &str = "image/webp";

/// Used when the raw bytes are not a recognizable image format.
pub const UNKNOWN_EXTENSION: &str = "bin";
pub const UNKNOWN_CONTENT_TYPE: &str = "application/octet-stream";

/// Object metadata attribute names written at upload time.
pub mod meta {
    pub const ASSIGNMENT_ID: &str = "assignment-id";
    pub const CREATED_AT: &str = "created-at";
    pub const ORIGINAL_SIZE: &str = "original-size";
    pub const OPTIMIZED_SIZE: &str = "optimized-size";
    pub const OPTIMIZED: &str = "optimized";
    pub const FORMAT: &str = "format";
    pub const WIDTH: &str = "width";
    pub const HEIGHT: &str = "height";
    pub const CORRELATION_ID: &str = "correlation-id";
    pub const TIER: &str = "tier";
    pub const PERMANENT: &str = "permanent";
    pub const CONTENT_SHA256: &str = "content-sha256";
}

// Optimizer defaults
pub const DEFAULT_MAX_DIMENSION: u32 = 1024;
pub const DEFAULT_QUALITY: u8 = 85;
/// Decoded pixel budget (width * height) accepted by the optimizer.
pub const DEFAULT_MAX_PIXELS: u64 = 40_000_000;

// Upload retry defaults
pub const DEFAULT_UPLOAD_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_UPLOAD_INITIAL_BACKOFF_MS: u64 = 1000;

// Retrieval defaults
pub const DEFAULT_SIGNED_URL_TTL_SECS: u64 = 3600;
pub const DEFAULT_RESOLVE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CDN_MIN_TTL_SECS: u64 = 86_400;
pub const DEFAULT_CDN_MAX_TTL_SECS: u64 = 31_536_000;
pub const DEFAULT_CDN_CACHE_CAPACITY: usize = 1024;

// Lifecycle thresholds, in days since created-at
pub const DEFAULT_LIFECYCLE_IA_DAYS: i64 = 90;
pub const DEFAULT_LIFECYCLE_ARCHIVE_DAYS: i64 = 270;
pub const DEFAULT_LIFECYCLE_EXPIRE_DAYS: i64 = 635;
pub const DEFAULT_LIFECYCLE_SWEEP_INTERVAL_SECS: u64 = 86_400;

/// Epoch offset used by generated assignment ids (milliseconds).
pub const ASSIGNMENT_ID_EPOCH_MS: i64 = 1_670_000_000_000;
