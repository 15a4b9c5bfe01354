//! Edge cache for the byte path.
//!
//! Models the CDN's edge copy: a bounded LRU keyed by object key whose entries are
//! served for the edge TTL before the origin is consulted again. The cache is never
//! authoritative; a miss always falls through to the store.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use imgvault_core::CdnConfig;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, trace};

/// Bookkeeping for one cached object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub fetched_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

impl CacheEntry {
    pub fn expires_at(&self) -> DateTime<Utc> {
        i64::try_from(self.ttl_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|ttl| self.fetched_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at()
    }
}

/// Where a fetched payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    /// No CDN configured; the store was read directly.
    Bypass,
}

#[derive(Debug, Clone)]
struct Cached {
    entry: CacheEntry,
    bytes: Bytes,
    content_type: String,
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
}

pub struct EdgeCache {
    entries: RwLock<LruCache<String, Cached>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EdgeCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: RwLock::new(LruCache::new(cap)),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cache sized and timed from the CDN settings: `min_ttl`, capped at `max_ttl`.
    pub fn from_cdn(cdn: &CdnConfig) -> Self {
        Self::new(cdn.cache_capacity, cdn.edge_ttl())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh payload and content type for `key`. Stale entries are dropped and
    /// count as a miss.
    pub async fn get(&self, key: &str, now: DateTime<Utc>) -> Option<(Bytes, String)> {
        let mut entries = self.entries.write().await;
        let lookup = entries.get(key).map(|cached| {
            cached
                .entry
                .is_fresh(now)
                .then(|| (cached.bytes.clone(), cached.content_type.clone()))
        });
        let fresh = match lookup {
            Some(Some(hit)) => Some(hit),
            Some(None) => {
                entries.pop(key);
                trace!(key = %key, "Edge cache entry expired");
                None
            }
            None => None,
        };
        match fresh {
            Some(hit) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(key = %key, "Edge cache hit");
                Some(hit)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!(key = %key, "Edge cache miss");
                None
            }
        }
    }

    pub async fn insert(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: impl Into<String>,
        now: DateTime<Utc>,
    ) -> CacheEntry {
        let entry = CacheEntry {
            key: key.to_string(),
            fetched_at: now,
            ttl_seconds: self.ttl.as_secs(),
        };
        debug!(key = %key, ttl_seconds = entry.ttl_seconds, "Storing object in edge cache");
        self.entries.write().await.put(
            key.to_string(),
            Cached {
                entry: entry.clone(),
                bytes,
                content_type: content_type.into(),
            },
        );
        entry
    }

    /// Entry bookkeeping without promoting it in the LRU.
    pub async fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.entries
            .read()
            .await
            .peek(key)
            .map(|cached| cached.entry.clone())
    }

    pub async fn invalidate(&self, key: &str) {
        if self.entries.write().await.pop(key).is_some() {
            debug!(key = %key, "Evicted object from edge cache");
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.len().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = EdgeCache::new(4, Duration::from_secs(86_400));
        cache
            .insert("generated_images/1.webp", Bytes::from_static(b"a"), "image/webp", t0())
            .await;

        let later = t0() + chrono::Duration::hours(23);
        assert!(cache.get("generated_images/1.webp", later).await.is_some());

        let expired = t0() + chrono::Duration::hours(24);
        assert!(cache.get("generated_images/1.webp", expired).await.is_none());
        assert!(cache.is_empty().await);

        let stats = cache.stats().await;
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test]
    async fn least_recently_used_is_evicted() {
        let cache = EdgeCache::new(2, Duration::from_secs(60));
        for key in ["a/1", "a/2"] {
            cache.insert(key, Bytes::from_static(b"x"), "image/webp", t0()).await;
        }
        // Touch a/1 so a/2 becomes the eviction candidate.
        assert!(cache.get("a/1", t0()).await.is_some());
        cache.insert("a/3", Bytes::from_static(b"y"), "image/webp", t0()).await;

        assert!(cache.entry("a/2").await.is_none());
        assert!(cache.entry("a/1").await.is_some());
        assert_eq!(cache.len().await, 2);
    }

    #[test]
    fn edge_ttl_is_capped_by_max_ttl() {
        let mut cdn = CdnConfig::new("https://cdn.example.com");
        assert_eq!(EdgeCache::from_cdn(&cdn).ttl(), Duration::from_secs(86_400));

        cdn.max_ttl = Duration::from_secs(3_600);
        assert_eq!(EdgeCache::from_cdn(&cdn).ttl(), Duration::from_secs(3_600));
    }

    #[test]
    fn entry_expiry_saturates() {
        let entry = CacheEntry {
            key: "k".into(),
            fetched_at: t0(),
            ttl_seconds: u64::MAX,
        };
        assert!(entry.is_fresh(t0() + chrono::Duration::days(365 * 100)));
    }
}
