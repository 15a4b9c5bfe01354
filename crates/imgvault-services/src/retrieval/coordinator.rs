use bytes::Bytes;
use chrono::{DateTime, Utc};
use imgvault_core::constants::{DEFAULT_RESOLVE_TIMEOUT_SECS, DEFAULT_SIGNED_URL_TTL_SECS};
use imgvault_core::{CdnConfig, Clock, Config, EngineError, ErrorMetadata};
use imgvault_infra::{log_engine_error, Operation, OperationOutcome, OperationTimer};
use imgvault_storage::{parse_key, validate_key, ImageStore, StorageError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::cache::{CacheStatus, EdgeCache};

/// Shown to UI callers in place of an image that cannot be delivered.
pub const PLACEHOLDER_MESSAGE: &str = "Image not available";

/// How a reader should load an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryReference {
    /// Public CDN URL. The store was not contacted.
    Cdn { url: String },
    /// Time-limited URL straight to the store.
    Signed {
        url: String,
        expires_at: DateTime<Utc>,
    },
    /// No object exists under the key.
    Missing,
}

impl DeliveryReference {
    pub fn url(&self) -> Option<&str> {
        match self {
            DeliveryReference::Cdn { url } | DeliveryReference::Signed { url, .. } => Some(url.as_str()),
            DeliveryReference::Missing => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, DeliveryReference::Missing)
    }
}

/// Which delivery path `resolve_with` should take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Access {
    /// CDN when configured, signed URL otherwise.
    #[default]
    Auto,
    /// Always go to the store and sign.
    Direct,
}

/// Result of a byte read.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Bytes {
        bytes: Bytes,
        content_type: String,
        cache: CacheStatus,
    },
    Missing,
}

impl Delivery {
    pub fn cache_status(&self) -> Option<CacheStatus> {
        match self {
            Delivery::Bytes { cache, .. } => Some(*cache),
            Delivery::Missing => None,
        }
    }
}

/// What a UI caller renders: the image, or a generic placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum Displayable {
    Image { bytes: Bytes, content_type: String },
    Placeholder { message: String },
}

/// CDN-first read path.
///
/// `resolve` hands out references without downloading anything; `fetch` returns
/// bytes, through the edge cache when a CDN is configured.
pub struct RetrievalCoordinator {
    store: Arc<dyn ImageStore>,
    cdn: Option<CdnConfig>,
    cache: Option<Arc<EdgeCache>>,
    signed_url_ttl: Duration,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl RetrievalCoordinator {
    pub fn new(store: Arc<dyn ImageStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            cdn: None,
            cache: None,
            signed_url_ttl: Duration::from_secs(DEFAULT_SIGNED_URL_TTL_SECS),
            timeout: Duration::from_secs(DEFAULT_RESOLVE_TIMEOUT_SECS),
            clock,
        }
    }

    pub fn from_config(store: Arc<dyn ImageStore>, config: &Config, clock: Arc<dyn Clock>) -> Self {
        let coordinator = Self::new(store, clock)
            .with_signed_url_ttl(config.signed_url_ttl())
            .with_timeout(config.resolve_timeout());
        match config.cdn() {
            Some(cdn) => coordinator.with_cdn(cdn.clone()),
            None => coordinator,
        }
    }

    /// Serve references through `cdn` and bytes through an edge cache sized from it.
    pub fn with_cdn(mut self, cdn: CdnConfig) -> Self {
        self.cache = Some(Arc::new(EdgeCache::from_cdn(&cdn)));
        self.cdn = Some(cdn);
        self
    }

    pub fn with_signed_url_ttl(mut self, ttl: Duration) -> Self {
        self.signed_url_ttl = ttl;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cdn(&self) -> Option<&CdnConfig> {
        self.cdn.as_ref()
    }

    pub fn cache(&self) -> Option<&EdgeCache> {
        self.cache.as_deref()
    }

    pub async fn resolve(&self, key: &str) -> Result<DeliveryReference, EngineError> {
        self.resolve_with(key, Access::Auto).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn resolve_with(
        &self,
        key: &str,
        access: Access,
    ) -> Result<DeliveryReference, EngineError> {
        let timer = self.timer(Operation::Resolve, key);
        let result = self.resolve_inner(key, access).await;
        let outcome = match &result {
            Ok(DeliveryReference::Missing) => OperationOutcome::Missing,
            Ok(_) => OperationOutcome::Success,
            Err(e) => {
                log_engine_error(e, Some(timer.correlation_id()), "Image resolve failed");
                OperationOutcome::Failed
            }
        };
        timer.finish(self.clock.now(), outcome);
        result
    }

    async fn resolve_inner(
        &self,
        key: &str,
        access: Access,
    ) -> Result<DeliveryReference, EngineError> {
        validate_key(key)?;
        if let (Access::Auto, Some(cdn)) = (access, &self.cdn) {
            return Ok(DeliveryReference::Cdn {
                url: cdn.url_for(key),
            });
        }

        let ttl = self.signed_url_ttl;
        let store = &self.store;
        let signed = self
            .bounded(async move {
                if !store.exists(key).await? {
                    return Ok(None);
                }
                store.presigned_url(key, ttl).await.map(Some)
            })
            .await?;

        Ok(match signed {
            Some(url) => DeliveryReference::Signed {
                url,
                expires_at: self.clock.now()
                    + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero()),
            },
            None => DeliveryReference::Missing,
        })
    }

    /// Read an object's bytes. A missing key is `Delivery::Missing`, not an error.
    #[tracing::instrument(skip(self))]
    pub async fn fetch(&self, key: &str) -> Result<Delivery, EngineError> {
        let timer = self.timer(Operation::Download, key);
        let result = self.fetch_inner(key).await;
        let outcome = match &result {
            Ok(Delivery::Missing) => OperationOutcome::Missing,
            Ok(_) => OperationOutcome::Success,
            Err(_) => OperationOutcome::Failed,
        };
        timer.finish(self.clock.now(), outcome);
        result
    }

    async fn fetch_inner(&self, key: &str) -> Result<Delivery, EngineError> {
        validate_key(key)?;
        let now = self.clock.now();

        if let Some(cache) = &self.cache {
            if let Some((bytes, content_type)) = cache.get(key, now).await {
                return Ok(Delivery::Bytes {
                    bytes,
                    content_type,
                    cache: CacheStatus::Hit,
                });
            }
        }

        let object = match self.bounded(self.store.get(key)).await {
            Ok(object) => object,
            Err(e) if e.is_not_found() => {
                if let Some(cache) = &self.cache {
                    cache.invalidate(key).await;
                }
                return Ok(Delivery::Missing);
            }
            Err(e) => return Err(e),
        };

        let content_type = object.descriptor.content_type;
        let status = match &self.cache {
            Some(cache) => {
                cache
                    .insert(key, object.bytes.clone(), content_type.clone(), now)
                    .await;
                CacheStatus::Miss
            }
            None => CacheStatus::Bypass,
        };
        tracing::debug!(key = %key, size_bytes = object.bytes.len(), cache = ?status, "Fetched image");
        Ok(Delivery::Bytes {
            bytes: object.bytes,
            content_type,
            cache: status,
        })
    }

    /// Fetch for display. Every failure becomes a placeholder with a message safe to
    /// show; the technical cause is logged.
    pub async fn fetch_or_placeholder(&self, key: &str) -> Displayable {
        match self.fetch(key).await {
            Ok(Delivery::Bytes {
                bytes,
                content_type,
                ..
            }) => Displayable::Image {
                bytes,
                content_type,
            },
            Ok(Delivery::Missing) => Displayable::Placeholder {
                message: PLACEHOLDER_MESSAGE.to_string(),
            },
            Err(e) => {
                log_engine_error(&e, None, "Image fetch failed; showing placeholder");
                Displayable::Placeholder {
                    message: if e.is_not_found() {
                        PLACEHOLDER_MESSAGE.to_string()
                    } else {
                        e.client_message()
                    },
                }
            }
        }
    }

    fn timer(&self, operation: Operation, key: &str) -> OperationTimer {
        let mut timer = OperationTimer::start(operation, Uuid::new_v4(), None);
        if let Some((assignment_id, _)) = parse_key(key) {
            timer.set_assignment_id(assignment_id.as_str());
        }
        timer
    }

    /// Run a store interaction under the resolve timeout.
    async fn bounded<T, F>(&self, operation: F) -> Result<T, EngineError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        match tokio::time::timeout(self.timeout, operation).await {
            Ok(result) => result.map_err(EngineError::from),
            Err(_) => Err(EngineError::Timeout(self.timeout)),
        }
    }
}
