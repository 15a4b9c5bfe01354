use imgvault_core::{Clock, EngineError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::sweeper::{LifecycleManager, SweepReport};

/// Runs lifecycle sweeps on a fixed cadence measured by the injected [`Clock`].
pub struct LifecycleScheduler {
    manager: Arc<LifecycleManager>,
    interval: Duration,
    clock: Arc<dyn Clock>,
}

/// Handle to a running scheduler loop.
pub struct LifecycleHandle {
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl LifecycleHandle {
    /// Stop the loop after the current sweep and wait for it to exit.
    pub async fn shutdown(self) {
        if let Err(e) = self.shutdown_tx.send(()).await {
            tracing::warn!(error = %e, "Failed to send shutdown signal to lifecycle scheduler");
        }
        if let Err(e) = self.join.await {
            tracing::warn!(error = %e, "Lifecycle scheduler task ended abnormally");
        }
    }
}

impl LifecycleScheduler {
    pub fn new(manager: Arc<LifecycleManager>, interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            manager,
            interval,
            clock,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one sweep now.
    pub async fn tick(&self) -> Result<SweepReport, EngineError> {
        self.manager.sweep().await
    }

    /// Run `count` sweeps, waiting one interval on the clock after each.
    ///
    /// Failed sweeps are logged and skipped; the returned reports are those of the
    /// sweeps that completed.
    pub async fn run_ticks(&self, count: usize) -> Vec<SweepReport> {
        let mut reports = Vec::with_capacity(count);
        for _ in 0..count {
            match self.tick().await {
                Ok(report) => reports.push(report),
                Err(e) => tracing::error!(error = %e, "Lifecycle sweep failed"),
            }
            self.clock.sleep(self.interval).await;
        }
        reports
    }

    /// Spawn the sweep loop. The first sweep runs immediately.
    pub fn start(self: Arc<Self>) -> LifecycleHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);

        let join = tokio::spawn(async move {
            tracing::info!(
                interval_secs = self.interval.as_secs(),
                "Lifecycle scheduler started"
            );

            loop {
                if let Err(e) = self.tick().await {
                    tracing::error!(error = %e, "Lifecycle sweep failed");
                }

                tokio::select! {
                    _ = self.clock.sleep(self.interval) => {}
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Lifecycle scheduler shutting down");
                        break;
                    }
                }
            }
        });

        LifecycleHandle { shutdown_tx, join }
    }
}
