//! Configuration module
//!
//! Settings for the storage backend, optimizer, upload retries, delivery (CDN and
//! signed references) and lifecycle sweeps. Everything is read from the environment
//! with the defaults declared in [`crate::constants`].

use std::env;
use std::time::Duration;

use crate::constants::*;
use crate::storage_types::StorageBackend;

/// Optimizer parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct OptimizerSettings {
    /// Longest side allowed after resizing, in pixels.
    pub max_dimension: u32,
    /// WebP quality, 1..=100.
    pub quality: u8,
    /// Largest decoded image (width * height) the optimizer will attempt.
    pub max_pixels: u64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
            quality: DEFAULT_QUALITY,
            max_pixels: DEFAULT_MAX_PIXELS,
        }
    }
}

/// Bounded exponential backoff for upload writes.
#[derive(Clone, Debug, PartialEq)]
pub struct RetrySettings {
    /// Total write attempts, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl RetrySettings {
    /// Delay to wait after failed attempt `attempt` (1-based): `initial * 2^(attempt-1)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff.saturating_mul(1u32 << exponent)
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_UPLOAD_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_UPLOAD_INITIAL_BACKOFF_MS),
        }
    }
}

/// CDN distribution in front of the object store.
#[derive(Clone, Debug, PartialEq)]
pub struct CdnConfig {
    pub base_url: String,
    pub min_ttl: Duration,
    pub max_ttl: Duration,
    /// Number of objects the edge cache keeps.
    pub cache_capacity: usize,
}

impl CdnConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            min_ttl: Duration::from_secs(DEFAULT_CDN_MIN_TTL_SECS),
            max_ttl: Duration::from_secs(DEFAULT_CDN_MAX_TTL_SECS),
            cache_capacity: DEFAULT_CDN_CACHE_CAPACITY,
        }
    }

    /// How long an edge copy is served before the origin is consulted again.
    pub fn edge_ttl(&self) -> Duration {
        self.min_ttl.min(self.max_ttl)
    }

    pub fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key.trim_start_matches('/'))
    }

    pub fn is_https(&self) -> bool {
        self.base_url.starts_with("https://")
    }
}

/// Age thresholds, in days since `created-at`, and the sweep cadence.
#[derive(Clone, Debug, PartialEq)]
pub struct LifecycleConfig {
    pub infrequent_after_days: i64,
    pub archive_after_days: i64,
    pub expire_after_days: i64,
    pub sweep_interval: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            infrequent_after_days: DEFAULT_LIFECYCLE_IA_DAYS,
            archive_after_days: DEFAULT_LIFECYCLE_ARCHIVE_DAYS,
            expire_after_days: DEFAULT_LIFECYCLE_EXPIRE_DAYS,
            sweep_interval: Duration::from_secs(DEFAULT_LIFECYCLE_SWEEP_INTERVAL_SECS),
        }
    }
}

/// Engine configuration
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub environment: String,
    pub log_format: String,
    // Storage configuration
    pub storage_backend: StorageBackend,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>, // S3-compatible providers (MinIO, LocalStack, ...)
    pub aws_region: Option<String>,
    pub local_storage_path: Option<String>,
    pub local_storage_base_url: Option<String>,
    pub local_signing_secret: Option<String>,
    // Delivery
    pub cdn: Option<CdnConfig>,
    pub signed_url_ttl: Duration,
    pub resolve_timeout: Duration,
    pub optimizer: OptimizerSettings,
    pub retry: RetrySettings,
    pub lifecycle: LifecycleConfig,
}

impl EngineConfig {
    fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string());

        let storage_backend = match lookup("STORAGE_BACKEND") {
            Some(raw) => raw
                .parse::<StorageBackend>()
                .map_err(|e| anyhow::anyhow!("STORAGE_BACKEND: {}", e))?,
            None => StorageBackend::S3,
        };

        let parse_u64 = |name: &str, default: u64| -> Result<u64, anyhow::Error> {
            match lookup(name) {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .map_err(|_| anyhow::anyhow!("{} must be a valid number", name)),
                None => Ok(default),
            }
        };
        let parse_i64 = |name: &str, default: i64| -> Result<i64, anyhow::Error> {
            match lookup(name) {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .map_err(|_| anyhow::anyhow!("{} must be a valid number", name)),
                None => Ok(default),
            }
        };

        let cdn = match lookup("CDN_BASE_URL").filter(|s| !s.trim().is_empty()) {
            Some(base_url) => Some(CdnConfig {
                min_ttl: Duration::from_secs(parse_u64(
                    "CDN_MIN_TTL_SECS",
                    DEFAULT_CDN_MIN_TTL_SECS,
                )?),
                max_ttl: Duration::from_secs(parse_u64(
                    "CDN_MAX_TTL_SECS",
                    DEFAULT_CDN_MAX_TTL_SECS,
                )?),
                cache_capacity: parse_u64(
                    "CDN_CACHE_CAPACITY",
                    DEFAULT_CDN_CACHE_CAPACITY as u64,
                )? as usize,
                ..CdnConfig::new(base_url.trim())
            }),
            None => None,
        };

        let quality = parse_u64("IMAGE_QUALITY", DEFAULT_QUALITY as u64)?;
        let max_dimension = parse_u64("IMAGE_MAX_DIMENSION", DEFAULT_MAX_DIMENSION as u64)?;

        Ok(EngineConfig {
            environment,
            log_format: lookup("LOG_FORMAT").unwrap_or_else(|| "text".to_string()),
            storage_backend,
            s3_bucket: lookup("S3_BUCKET"),
            s3_region: lookup("S3_REGION"),
            s3_endpoint: lookup("S3_ENDPOINT"),
            aws_region: lookup("AWS_REGION"),
            local_storage_path: lookup("LOCAL_STORAGE_PATH"),
            local_storage_base_url: lookup("LOCAL_STORAGE_BASE_URL"),
            local_signing_secret: lookup("LOCAL_SIGNING_SECRET"),
            cdn,
            signed_url_ttl: Duration::from_secs(parse_u64(
                "SIGNED_URL_TTL_SECS",
                DEFAULT_SIGNED_URL_TTL_SECS,
            )?),
            resolve_timeout: Duration::from_secs(parse_u64(
                "RESOLVE_TIMEOUT_SECS",
                DEFAULT_RESOLVE_TIMEOUT_SECS,
            )?),
            optimizer: OptimizerSettings {
                // Out-of-range values are clamped here and rejected by validate().
                max_dimension: u32::try_from(max_dimension).unwrap_or(u32::MAX),
                quality: u8::try_from(quality).unwrap_or(u8::MAX),
                max_pixels: parse_u64("IMAGE_MAX_PIXELS", DEFAULT_MAX_PIXELS)?,
            },
            retry: RetrySettings {
                max_attempts: u32::try_from(parse_u64(
                    "UPLOAD_MAX_ATTEMPTS",
                    DEFAULT_UPLOAD_MAX_ATTEMPTS as u64,
                )?)
                .unwrap_or(u32::MAX),
                initial_backoff: Duration::from_millis(parse_u64(
                    "UPLOAD_INITIAL_BACKOFF_MS",
                    DEFAULT_UPLOAD_INITIAL_BACKOFF_MS,
                )?),
            },
            lifecycle: LifecycleConfig {
                infrequent_after_days: parse_i64("LIFECYCLE_IA_DAYS", DEFAULT_LIFECYCLE_IA_DAYS)?,
                archive_after_days: parse_i64(
                    "LIFECYCLE_ARCHIVE_DAYS",
                    DEFAULT_LIFECYCLE_ARCHIVE_DAYS,
                )?,
                expire_after_days: parse_i64(
                    "LIFECYCLE_EXPIRE_DAYS",
                    DEFAULT_LIFECYCLE_EXPIRE_DAYS,
                )?,
                sweep_interval: Duration::from_secs(parse_u64(
                    "LIFECYCLE_SWEEP_INTERVAL_SECS",
                    DEFAULT_LIFECYCLE_SWEEP_INTERVAL_SECS,
                )?),
            },
        })
    }

    fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !(1..=100).contains(&self.optimizer.quality) {
            return Err(anyhow::anyhow!("IMAGE_QUALITY must be between 1 and 100"));
        }
        if self.optimizer.max_dimension == 0 {
            return Err(anyhow::anyhow!("IMAGE_MAX_DIMENSION must be greater than 0"));
        }
        if self.optimizer.max_pixels == 0 {
            return Err(anyhow::anyhow!("IMAGE_MAX_PIXELS must be greater than 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow::anyhow!("UPLOAD_MAX_ATTEMPTS must be at least 1"));
        }
        if self.signed_url_ttl.is_zero() {
            return Err(anyhow::anyhow!("SIGNED_URL_TTL_SECS must be greater than 0"));
        }
        if self.resolve_timeout.is_zero() {
            return Err(anyhow::anyhow!("RESOLVE_TIMEOUT_SECS must be greater than 0"));
        }

        let lc = &self.lifecycle;
        if !(0 < lc.infrequent_after_days
            && lc.infrequent_after_days < lc.archive_after_days
            && lc.archive_after_days < lc.expire_after_days)
        {
            return Err(anyhow::anyhow!(
                "Lifecycle thresholds must be increasing: LIFECYCLE_IA_DAYS < LIFECYCLE_ARCHIVE_DAYS < LIFECYCLE_EXPIRE_DAYS"
            ));
        }
        if lc.sweep_interval.is_zero() {
            return Err(anyhow::anyhow!(
                "LIFECYCLE_SWEEP_INTERVAL_SECS must be greater than 0"
            ));
        }

        if let Some(cdn) = &self.cdn {
            if !cdn.base_url.starts_with("https://") && !cdn.base_url.starts_with("http://") {
                return Err(anyhow::anyhow!("CDN_BASE_URL must be an http(s) URL"));
            }
            if self.is_production() && !cdn.is_https() {
                return Err(anyhow::anyhow!("CDN_BASE_URL must use https in production"));
            }
            if cdn.cache_capacity == 0 {
                return Err(anyhow::anyhow!("CDN_CACHE_CAPACITY must be greater than 0"));
            }
        }

        match self.storage_backend {
            StorageBackend::S3 => {
                if self.s3_bucket.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_BUCKET must be set when using S3 storage backend"
                    ));
                }
                if self.s3_region.is_none() && self.aws_region.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_REGION or AWS_REGION must be set when using S3 storage backend"
                    ));
                }
            }
            StorageBackend::Local => {
                if self.local_storage_path.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH must be set when using local storage backend"
                    ));
                }
                if self.local_storage_base_url.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_BASE_URL must be set when using local storage backend"
                    ));
                }
                match &self.local_signing_secret {
                    Some(secret) if secret.len() >= 32 => {}
                    _ => {
                        return Err(anyhow::anyhow!(
                            "LOCAL_SIGNING_SECRET must be at least 32 characters long"
                        ))
                    }
                }
            }
            StorageBackend::Memory => {
                if self.is_production() {
                    return Err(anyhow::anyhow!(
                        "STORAGE_BACKEND=memory is not allowed in production"
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Box<EngineConfig>);

impl Config {
    fn inner(&self) -> &EngineConfig {
        &self.0
    }

    /// Load `.env` (if present) and read the process environment.
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Config(Box::new(EngineConfig::from_lookup(lookup)?)))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.inner().validate()
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        self.inner().is_production()
    }

    pub fn environment(&self) -> &str {
        &self.inner().environment
    }

    pub fn log_format(&self) -> &str {
        &self.inner().log_format
    }

    pub fn storage_backend(&self) -> StorageBackend {
        self.inner().storage_backend
    }

    pub fn s3_bucket(&self) -> Option<&str> {
        self.inner().s3_bucket.as_deref()
    }

    pub fn s3_region(&self) -> Option<&str> {
        self.inner().s3_region.as_deref()
    }

    pub fn s3_endpoint(&self) -> Option<&str> {
        self.inner().s3_endpoint.as_deref()
    }

    pub fn aws_region(&self) -> Option<&str> {
        self.inner().aws_region.as_deref()
    }

    pub fn local_storage_path(&self) -> Option<&str> {
        self.inner().local_storage_path.as_deref()
    }

    pub fn local_storage_base_url(&self) -> Option<&str> {
        self.inner().local_storage_base_url.as_deref()
    }

    pub fn local_signing_secret(&self) -> Option<&str> {
        self.inner().local_signing_secret.as_deref()
    }

    pub fn cdn(&self) -> Option<&CdnConfig> {
        self.inner().cdn.as_ref()
    }

    pub fn signed_url_ttl(&self) -> Duration {
        self.inner().signed_url_ttl
    }

    pub fn resolve_timeout(&self) -> Duration {
        self.inner().resolve_timeout
    }

    pub fn optimizer(&self) -> &OptimizerSettings {
        &self.inner().optimizer
    }

    pub fn retry(&self) -> &RetrySettings {
        &self.inner().retry
    }

    pub fn lifecycle(&self) -> &LifecycleConfig {
        &self.inner().lifecycle
    }
}
