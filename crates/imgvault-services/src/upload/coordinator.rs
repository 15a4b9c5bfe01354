use imgvault_core::constants::{meta, UNKNOWN_CONTENT_TYPE};
use imgvault_core::{
    AssignmentId, Clock, Config, EngineError, ErrorMetadata, ImageRecord, RawImage,
    RetrySettings, StoredImage,
};
use imgvault_infra::{Operation, OperationOutcome, OperationTimer};
use imgvault_processing::{
    detect_format, ImageOptimizer, OptimizationOutcome, OptimizeError, OptimizerConfig,
};
use imgvault_storage::keys::image_prefix;
use imgvault_storage::{image_key, parse_key, validate_key, ImageStore, PutObject};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use super::machine::{UploadMachine, UploadState};

/// Per-call upload options.
#[derive(Debug, Clone, Copy, Default)]
pub struct UploadOptions {
    /// Exempt the object from archival and expiry.
    pub permanent: bool,
}

/// Terminal upload failure.
#[derive(Debug, Error)]
#[error("upload {correlation_id} failed after {attempts} attempt(s): {kind}")]
pub struct UploadError {
    pub correlation_id: Uuid,
    pub assignment_id: Option<AssignmentId>,
    pub attempts: u32,
    #[source]
    pub kind: EngineError,
}

impl UploadError {
    /// Sentinel record for the metadata store, when the assignment is known.
    pub fn failed_record(&self) -> Option<ImageRecord> {
        self.assignment_id
            .clone()
            .map(|id| ImageRecord::failed(id, self.attempts, self.correlation_id))
    }
}

/// Result of a successful upload.
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub correlation_id: Uuid,
    pub assignment_id: AssignmentId,
    pub stored: StoredImage,
    pub attempts: u32,
    /// False when optimization failed and the original bytes were stored.
    pub optimized: bool,
    /// Keys of the same assignment with another extension, removed after the write.
    pub removed_siblings: Vec<String>,
}

impl UploadReceipt {
    pub fn key(&self) -> &str {
        &self.stored.key
    }

    pub fn is_fallback(&self) -> bool {
        !self.optimized
    }

    pub fn compression_ratio(&self) -> f64 {
        self.stored.compression_ratio().unwrap_or(0.0)
    }

    pub fn record(&self) -> ImageRecord {
        ImageRecord::success(
            self.assignment_id.clone(),
            &self.stored,
            self.attempts,
            self.correlation_id,
        )
    }
}

/// Optimizes raw images and writes them to the store with bounded retry.
///
/// Stateless per call: shared state is the store handle, the optimizer
/// configuration and the clock.
#[derive(Clone)]
pub struct UploadCoordinator {
    store: Arc<dyn ImageStore>,
    optimizer: ImageOptimizer,
    retry: RetrySettings,
    clock: Arc<dyn Clock>,
}

impl UploadCoordinator {
    pub fn new(
        store: Arc<dyn ImageStore>,
        optimizer: ImageOptimizer,
        retry: RetrySettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            optimizer,
            retry,
            clock,
        }
    }

    pub fn from_config(store: Arc<dyn ImageStore>, config: &Config, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            store,
            ImageOptimizer::new(OptimizerConfig::from(config.optimizer())),
            config.retry().clone(),
            clock,
        )
    }

    pub async fn upload(
        &self,
        raw: RawImage,
        assignment_id: &str,
    ) -> Result<UploadReceipt, UploadError> {
        self.upload_with(raw, assignment_id, UploadOptions::default())
            .await
    }

    #[tracing::instrument(
        skip(self, raw, options),
        fields(size_bytes = raw.len(), permanent = options.permanent)
    )]
    pub async fn upload_with(
        &self,
        raw: RawImage,
        assignment_id: &str,
        options: UploadOptions,
    ) -> Result<UploadReceipt, UploadError> {
        let correlation_id = Uuid::new_v4();
        let mut timer = OperationTimer::start(Operation::Upload, correlation_id, None);

        let assignment_id = match AssignmentId::parse(assignment_id) {
            Ok(id) => id,
            Err(kind) => {
                tracing::debug!(correlation_id = %correlation_id, error = %kind, "Rejected upload");
                timer.finish(self.clock.now(), OperationOutcome::Failed);
                return Err(UploadError {
                    correlation_id,
                    assignment_id: None,
                    attempts: 0,
                    kind,
                });
            }
        };
        timer.set_assignment_id(assignment_id.as_str());

        let mut machine = UploadMachine::new(correlation_id, self.retry.clone());
        let result = self
            .run(&mut machine, &assignment_id, raw, options, correlation_id)
            .await;

        match result {
            Ok((stored, optimized)) => {
                let removed_siblings = self.remove_siblings(&assignment_id, &stored.key).await;
                let outcome = if optimized {
                    OperationOutcome::Success
                } else {
                    OperationOutcome::Fallback
                };
                timer.finish(self.clock.now(), outcome);
                tracing::info!(
                    correlation_id = %correlation_id,
                    key = %stored.key,
                    size_bytes = stored.size_bytes,
                    attempts = machine.attempt_count(),
                    optimized = optimized,
                    "Image uploaded"
                );
                Ok(UploadReceipt {
                    correlation_id,
                    assignment_id,
                    stored,
                    attempts: machine.attempt_count(),
                    optimized,
                    removed_siblings,
                })
            }
            Err(kind) => {
                timer.finish(self.clock.now(), OperationOutcome::Failed);
                tracing::error!(
                    correlation_id = %correlation_id,
                    assignment_id = %assignment_id,
                    attempts = machine.attempt_count(),
                    error_code = kind.error_code(),
                    error = %kind,
                    "Image upload failed"
                );
                Err(UploadError {
                    correlation_id,
                    assignment_id: Some(assignment_id),
                    attempts: machine.attempt_count(),
                    kind,
                })
            }
        }
    }

    /// Drive the machine to a terminal state. Returns the descriptor and whether the
    /// stored bytes are the optimized ones.
    async fn run(
        &self,
        machine: &mut UploadMachine,
        assignment_id: &AssignmentId,
        raw: RawImage,
        options: UploadOptions,
        correlation_id: Uuid,
    ) -> Result<(StoredImage, bool), EngineError> {
        machine.start_optimizing()?;
        let outcome = self.optimize(&raw).await;
        let optimized = outcome.is_optimized();
        let object = self
            .prepare(assignment_id, &raw, outcome, correlation_id)
            .created_at(self.clock.now())
            .with_permanent(options.permanent);

        machine.start_writing()?;
        loop {
            let attempt = match machine.state() {
                UploadState::Writing { attempt } => *attempt,
                other => {
                    return Err(EngineError::Configuration(format!(
                        "upload machine stalled in {}",
                        other
                    )))
                }
            };

            let err = match self.store.put(object.clone()).await {
                Ok(stored) => {
                    machine.write_succeeded()?;
                    return Ok((stored, optimized));
                }
                Err(err) => err,
            };

            let transient = err.is_transient();
            let kind = EngineError::from(err);
            match machine.write_failed(transient, kind.error_code())?.clone() {
                UploadState::RetryWait { delay, .. } => {
                    tracing::warn!(
                        correlation_id = %correlation_id,
                        key = %object.key,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %kind,
                        "Transient write failure, retrying"
                    );
                    self.clock.sleep(delay).await;
                    machine.resume()?;
                }
                _ => return Err(kind),
            }
        }
    }

    /// Optimization is CPU bound; it runs on the blocking pool.
    async fn optimize(&self, raw: &RawImage) -> OptimizationOutcome {
        let optimizer = self.optimizer.clone();
        let input = raw.clone();
        match tokio::task::spawn_blocking(move || optimizer.optimize(&input)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "Optimizer task aborted; keeping original bytes");
                OptimizationOutcome::Failed {
                    original: raw.data.clone(),
                    format: detect_format(&raw.data),
                    reason: OptimizeError::Encode(e.to_string()),
                }
            }
        }
    }

    fn prepare(
        &self,
        assignment_id: &AssignmentId,
        raw: &RawImage,
        outcome: OptimizationOutcome,
        correlation_id: Uuid,
    ) -> PutObject {
        let object = match outcome {
            OptimizationOutcome::Optimized(image) => PutObject::new(
                image_key(assignment_id, image.extension()),
                image.data.clone(),
                image.content_type(),
            )
            .with_metadata(meta::OPTIMIZED, "true")
            .with_metadata(meta::FORMAT, image.source_format.extension)
            .with_metadata(meta::ORIGINAL_SIZE, image.original_size_bytes.to_string())
            .with_metadata(meta::OPTIMIZED_SIZE, image.size_bytes().to_string())
            .with_metadata(meta::WIDTH, image.width.to_string())
            .with_metadata(meta::HEIGHT, image.height.to_string()),
            OptimizationOutcome::Failed {
                original, format, ..
            } => {
                let content_type = if format.is_known() {
                    format.mime.to_string()
                } else {
                    raw.declared_content_type
                        .clone()
                        .unwrap_or_else(|| UNKNOWN_CONTENT_TYPE.to_string())
                };
                let size = original.len().to_string();
                PutObject::new(image_key(assignment_id, format.extension), original, content_type)
                    .with_metadata(meta::OPTIMIZED, "false")
                    .with_metadata(meta::FORMAT, format.extension)
                    .with_metadata(meta::ORIGINAL_SIZE, size.clone())
                    .with_metadata(meta::OPTIMIZED_SIZE, size)
            }
        };
        object
            .with_metadata(meta::ASSIGNMENT_ID, assignment_id.as_str())
            .with_metadata(meta::CORRELATION_ID, correlation_id.to_string())
    }

    /// Remove objects of the same assignment stored under another extension.
    /// Failures are logged; the next upload retries them.
    async fn remove_siblings(&self, assignment_id: &AssignmentId, keep: &str) -> Vec<String> {
        let prefix = format!("{}{}.", image_prefix(), assignment_id);
        let keys = match self.store.list(&prefix).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(prefix = %prefix, error = %e, "Failed to list sibling objects");
                return Vec::new();
            }
        };

        let mut removed = Vec::new();
        for key in keys {
            let same_assignment = parse_key(&key)
                .map(|(id, _)| &id == assignment_id)
                .unwrap_or(false);
            if key == keep || !same_assignment {
                continue;
            }
            match self.store.delete(&key).await {
                Ok(()) => {
                    tracing::info!(key = %key, kept = %keep, "Removed superseded image");
                    removed.push(key);
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Failed to remove superseded image");
                }
            }
        }
        removed
    }

    /// Delete an assignment's image (every extension) or a single key.
    ///
    /// Returns the keys that existed and were removed; deleting nothing is not an
    /// error.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, target: &str) -> Result<Vec<String>, EngineError> {
        let mut timer = OperationTimer::start(Operation::Delete, Uuid::new_v4(), None);
        let result = self.delete_inner(target, &mut timer).await;
        let outcome = match &result {
            Ok(keys) if keys.is_empty() => OperationOutcome::Missing,
            Ok(_) => OperationOutcome::Success,
            Err(_) => OperationOutcome::Failed,
        };
        timer.finish(self.clock.now(), outcome);
        result
    }

    async fn delete_inner(
        &self,
        target: &str,
        timer: &mut OperationTimer,
    ) -> Result<Vec<String>, EngineError> {
        if let Ok(assignment_id) = AssignmentId::parse(target) {
            timer.set_assignment_id(assignment_id.as_str());
            let prefix = format!("{}{}.", image_prefix(), assignment_id);
            let mut deleted = Vec::new();
            for key in self.store.list(&prefix).await? {
                if parse_key(&key).map(|(id, _)| id == assignment_id) != Some(true) {
                    continue;
                }
                self.store.delete(&key).await?;
                deleted.push(key);
            }
            return Ok(deleted);
        }

        validate_key(target)?;
        if let Some((assignment_id, _)) = parse_key(target) {
            timer.set_assignment_id(assignment_id.as_str());
        }
        if !self.store.exists(target).await? {
            return Ok(Vec::new());
        }
        self.store.delete(target).await?;
        Ok(vec![target.to_string()])
    }

    /// Set or clear the permanence tag on a stored object.
    #[tracing::instrument(skip(self))]
    pub async fn set_permanent(&self, key: &str, permanent: bool) -> Result<StoredImage, EngineError> {
        let mut timer = OperationTimer::start(Operation::Tag, Uuid::new_v4(), None);
        if let Some((assignment_id, _)) = parse_key(key) {
            timer.set_assignment_id(assignment_id.as_str());
        }
        let result = self
            .store
            .set_permanent(key, permanent)
            .await
            .map_err(EngineError::from);
        let outcome = match &result {
            Ok(_) => OperationOutcome::Success,
            Err(e) if e.is_not_found() => OperationOutcome::Missing,
            Err(_) => OperationOutcome::Failed,
        };
        timer.finish(self.clock.now(), outcome);
        result
    }
}
