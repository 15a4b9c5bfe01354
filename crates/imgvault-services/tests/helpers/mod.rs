#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imgvault_core::{ManualClock, RawImage, StoredImage};
use imgvault_storage::{
    ExpectedVersion, ImageObject, ImageStore, MemoryStore, PutObject, StorageBackend, StorageError,
    StorageResult,
};
use std::collections::{HashSet, VecDeque};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(t0()))
}

/// Smooth gradients with light grain; compresses well as WebP.
pub fn png_bytes(width: u32, height: u32, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(7);
    let img = RgbImage::from_fn(width, height, |x, y| {
        state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        let grain = ((state >> 16) % 7) as f32 - 3.0;
        let (xf, yf) = (x as f32, y as f32);
        let c = |phase: f32| -> u8 {
            (127.5 + 90.0 * (xf * 0.02 + phase).sin() + 30.0 * (yf * 0.017).cos() + grain)
                .clamp(0.0, 255.0) as u8
        };
        Rgb([c(0.0), c(1.7), c(3.4)])
    });
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

pub fn raw_png(width: u32, height: u32, seed: u32) -> RawImage {
    RawImage::new(png_bytes(width, height, seed)).with_content_type("image/png")
}

/// How one scripted `put` misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutFault {
    /// Fail before writing anything.
    Unavailable,
    /// Write the object, then report a transient failure (lost acknowledgement).
    UnavailableAfterWrite,
    PermissionDenied,
}

/// Wraps a store and fails scripted operations.
pub struct FlakyStore {
    inner: Arc<dyn ImageStore>,
    put_faults: Mutex<VecDeque<PutFault>>,
    broken_keys: Mutex<HashSet<String>>,
    puts: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn ImageStore>) -> Self {
        Self {
            inner,
            put_faults: Mutex::new(VecDeque::new()),
            broken_keys: Mutex::new(HashSet::new()),
            puts: AtomicUsize::new(0),
        }
    }

    /// The next `put` calls fail in order, then writes succeed.
    pub fn fail_puts(self, faults: &[PutFault]) -> Self {
        self.put_faults.lock().unwrap().extend(faults.iter().copied());
        self
    }

    /// Every write to `key` fails transiently.
    pub fn break_key(self, key: &str) -> Self {
        self.broken_keys.lock().unwrap().insert(key.to_string());
        self
    }

    pub fn repair_key(&self, key: &str) {
        self.broken_keys.lock().unwrap().remove(key);
    }

    pub fn put_calls(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageStore for FlakyStore {
    async fn put(&self, object: PutObject) -> StorageResult<StoredImage> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.broken_keys.lock().unwrap().contains(&object.key) {
            return Err(StorageError::Unavailable("injected: key is broken".into()));
        }
        let fault = self.put_faults.lock().unwrap().pop_front();
        match fault {
            None => self.inner.put(object).await,
            Some(PutFault::Unavailable) => {
                Err(StorageError::Unavailable("injected: connection reset".into()))
            }
            Some(PutFault::UnavailableAfterWrite) => {
                self.inner.put(object).await?;
                Err(StorageError::Unavailable("injected: response lost".into()))
            }
            Some(PutFault::PermissionDenied) => {
                Err(StorageError::PermissionDenied("injected: access denied".into()))
            }
        }
    }

    async fn get(&self, key: &str) -> StorageResult<ImageObject> {
        self.inner.get(key).await
    }

    async fn head(&self, key: &str) -> StorageResult<StoredImage> {
        self.inner.head(key).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn delete_if(&self, key: &str, expected: &ExpectedVersion) -> StorageResult<()> {
        if self.broken_keys.lock().unwrap().contains(key) {
            return Err(StorageError::Unavailable("injected: key is broken".into()));
        }
        self.inner.delete_if(key, expected).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(prefix).await
    }

    async fn presigned_url(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        self.inner.presigned_url(key, expires_in).await
    }

    async fn check_access(&self) -> StorageResult<()> {
        self.inner.check_access().await
    }

    fn backend_type(&self) -> StorageBackend {
        self.inner.backend_type()
    }
}

/// Wraps a store and delays every read by a fixed latency on tokio's clock.
pub struct SlowStore {
    inner: Arc<dyn ImageStore>,
    latency: Duration,
    reads: AtomicUsize,
}

impl SlowStore {
    pub fn new(inner: Arc<dyn ImageStore>, latency: Duration) -> Self {
        Self {
            inner,
            latency,
            reads: AtomicUsize::new(0),
        }
    }

    /// Number of origin reads (get, head, list, presign).
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        self.reads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
    }
}

#[async_trait]
impl ImageStore for SlowStore {
    async fn put(&self, object: PutObject) -> StorageResult<StoredImage> {
        self.inner.put(object).await
    }

    async fn get(&self, key: &str) -> StorageResult<ImageObject> {
        self.delay().await;
        self.inner.get(key).await
    }

    async fn head(&self, key: &str) -> StorageResult<StoredImage> {
        self.delay().await;
        self.inner.head(key).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn delete_if(&self, key: &str, expected: &ExpectedVersion) -> StorageResult<()> {
        self.inner.delete_if(key, expected).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.delay().await;
        self.inner.list(prefix).await
    }

    async fn presigned_url(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        self.delay().await;
        self.inner.presigned_url(key, expires_in).await
    }

    async fn check_access(&self) -> StorageResult<()> {
        self.inner.check_access().await
    }

    fn backend_type(&self) -> StorageBackend {
        self.inner.backend_type()
    }
}

/// Wraps a store and writes a replacement object right after the first read of
/// its key returns, so the reader acts on a descriptor that is already stale.
pub struct ReuploadAfterRead {
    inner: Arc<dyn ImageStore>,
    pending: Mutex<Option<PutObject>>,
}

impl ReuploadAfterRead {
    pub fn new(inner: Arc<dyn ImageStore>, replacement: PutObject) -> Self {
        Self {
            inner,
            pending: Mutex::new(Some(replacement)),
        }
    }

    async fn reupload(&self, key: &str) {
        let replacement = {
            let mut pending = self.pending.lock().unwrap();
            match pending.as_ref() {
                Some(object) if object.key == key => pending.take(),
                _ => None,
            }
        };
        if let Some(object) = replacement {
            self.inner.put(object).await.unwrap();
        }
    }
}

#[async_trait]
impl ImageStore for ReuploadAfterRead {
    async fn put(&self, object: PutObject) -> StorageResult<StoredImage> {
        self.inner.put(object).await
    }

    async fn get(&self, key: &str) -> StorageResult<ImageObject> {
        let object = self.inner.get(key).await?;
        self.reupload(key).await;
        Ok(object)
    }

    async fn head(&self, key: &str) -> StorageResult<StoredImage> {
        let descriptor = self.inner.head(key).await?;
        self.reupload(key).await;
        Ok(descriptor)
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn delete_if(&self, key: &str, expected: &ExpectedVersion) -> StorageResult<()> {
        self.inner.delete_if(key, expected).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(prefix).await
    }

    async fn presigned_url(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        self.inner.presigned_url(key, expires_in).await
    }

    async fn check_access(&self) -> StorageResult<()> {
        self.inner.check_access().await
    }

    fn backend_type(&self) -> StorageBackend {
        self.inner.backend_type()
    }
}

pub fn memory_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

/// Put an object directly, bypassing the coordinator.
pub async fn seed(
    store: &dyn ImageStore,
    key: &str,
    created_at: DateTime<Utc>,
    permanent: bool,
) -> StoredImage {
    store
        .put(
            PutObject::new(key, png_bytes(16, 16, 1), "image/png")
                .created_at(created_at)
                .with_permanent(permanent),
        )
        .await
        .unwrap()
}
