use chrono::{DateTime, Utc};
use imgvault_core::{Clock, Config, EngineError, StorageTier, StoredImage};
use imgvault_infra::{Operation, OperationOutcome, OperationTimer};
use imgvault_storage::keys::image_prefix;
use imgvault_storage::{ExpectedVersion, ImageStore, StorageError, StorageResult};
use std::sync::Arc;
use uuid::Uuid;

use super::policy::{LifecyclePolicy, TierTransition};

/// Concurrent writes tolerated on one object within a sweep before giving up on it.
const MAX_CONFLICTS: usize = 3;

/// An object the sweep could not bring up to date. It is retried next sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepFailure {
    pub key: String,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub scanned: usize,
    pub transitions: Vec<TierTransition>,
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    pub fn deleted(&self) -> usize {
        self.transitions.iter().filter(|t| t.is_deletion()).count()
    }

    pub fn moved_to(&self, tier: StorageTier) -> usize {
        self.transitions.iter().filter(|t| t.to == tier).count()
    }

    /// Nothing changed and nothing failed.
    pub fn is_noop(&self) -> bool {
        self.transitions.is_empty() && self.failures.is_empty()
    }
}

/// Applies the lifecycle policy to every stored image.
pub struct LifecycleManager {
    store: Arc<dyn ImageStore>,
    policy: LifecyclePolicy,
    clock: Arc<dyn Clock>,
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn ImageStore>, policy: LifecyclePolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            policy,
            clock,
        }
    }

    pub fn from_config(store: Arc<dyn ImageStore>, config: &Config, clock: Arc<dyn Clock>) -> Self {
        Self::new(store, LifecyclePolicy::from(config.lifecycle()), clock)
    }

    pub fn policy(&self) -> &LifecyclePolicy {
        &self.policy
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// One pass over `generated_images/`.
    ///
    /// Each object is moved through as many tiers as its age allows. Per-object
    /// failures are logged and reported; only a failed listing fails the sweep.
    /// Running it again at the same instant changes nothing.
    #[tracing::instrument(skip(self), fields(lifecycle.operation = "sweep"))]
    pub async fn sweep(&self) -> Result<SweepReport, EngineError> {
        let now = self.clock.now();
        let keys = self.store.list(&image_prefix()).await?;
        let mut report = SweepReport::default();

        for key in keys {
            report.scanned += 1;
            if let Err(e) = self.settle_object(&key, now, &mut report).await {
                tracing::warn!(key = %key, error = %e, "Lifecycle transition failed; will retry next sweep");
                report.failures.push(SweepFailure {
                    key,
                    error: e.to_string(),
                });
            }
        }

        tracing::info!(
            scanned = report.scanned,
            transitions = report.transitions.len(),
            deleted = report.deleted(),
            failures = report.failures.len(),
            "Lifecycle sweep completed"
        );
        Ok(report)
    }

    async fn settle_object(
        &self,
        key: &str,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> StorageResult<()> {
        let mut image = match self.current(key).await? {
            Some(image) => image,
            // Removed since the listing; nothing to do.
            None => return Ok(()),
        };
        let mut conflicts = 0;

        while let Some(transition) = self.policy.evaluate(&image, now) {
            let timer = OperationTimer::start(
                Operation::Transition,
                Uuid::new_v4(),
                image.assignment_id().map(String::from),
            );
            let applied = self.apply(&transition, &ExpectedVersion::of(&image)).await;
            match applied {
                Ok(next) => {
                    timer.finish(self.clock.now(), OperationOutcome::Success);
                    tracing::info!(
                        key = %transition.key,
                        from = %transition.from,
                        to = %transition.to,
                        age_days = transition.age_days,
                        "Lifecycle transition applied"
                    );
                    report.transitions.push(transition);
                    match next {
                        Some(updated) => image = updated,
                        None => break,
                    }
                }
                Err(e) if e.is_not_found() => {
                    timer.finish(self.clock.now(), OperationOutcome::Missing);
                    break;
                }
                Err(e) if e.is_conflict() && conflicts < MAX_CONFLICTS => {
                    timer.finish(self.clock.now(), OperationOutcome::Failed);
                    conflicts += 1;
                    tracing::info!(
                        key = %transition.key,
                        to = %transition.to,
                        "Object changed during sweep; re-evaluating"
                    );
                    image = match self.current(key).await? {
                        Some(image) => image,
                        None => break,
                    };
                }
                Err(e) => {
                    timer.finish(self.clock.now(), OperationOutcome::Failed);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    async fn current(&self, key: &str) -> StorageResult<Option<StoredImage>> {
        match self.store.head(key).await {
            Ok(image) => Ok(Some(image)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Apply `transition` only if the object still matches `expected`.
    ///
    /// Returns the updated descriptor, or `None` once the object is gone.
    async fn apply(
        &self,
        transition: &TierTransition,
        expected: &ExpectedVersion,
    ) -> Result<Option<StoredImage>, StorageError> {
        if transition.is_deletion() {
            self.store.delete_if(&transition.key, expected).await?;
            Ok(None)
        } else {
            self.store
                .set_tier_if(&transition.key, transition.to, expected)
                .await
                .map(Some)
        }
    }
}
