//! Structured operation records.
//!
//! Every engine operation ends with exactly one [`OperationRecord`] emitted as a
//! `tracing` event on the [`OPERATIONS_TARGET`] target, so dashboards and alerting can
//! subscribe to that target alone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;
use uuid::Uuid;

pub const OPERATIONS_TARGET: &str = "imgvault::operations";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Upload,
    Download,
    Resolve,
    Delete,
    Tag,
    Transition,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Upload => "upload",
            Operation::Download => "download",
            Operation::Resolve => "resolve",
            Operation::Delete => "delete",
            Operation::Tag => "tag",
            Operation::Transition => "transition",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationOutcome {
    Success,
    /// Upload stored the original bytes because optimization failed.
    Fallback,
    /// The requested object does not exist.
    Missing,
    Failed,
}

impl OperationOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationOutcome::Success => "success",
            OperationOutcome::Fallback => "fallback",
            OperationOutcome::Missing => "missing",
            OperationOutcome::Failed => "failed",
        }
    }
}

impl fmt::Display for OperationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Uuid,
    pub assignment_id: Option<String>,
    pub operation: Operation,
    pub outcome: OperationOutcome,
    pub latency_ms: f64,
}

impl OperationRecord {
    /// Write the record to the operations target. Failures log at warn.
    pub fn emit(&self) {
        let assignment_id = self.assignment_id.as_deref().unwrap_or("");
        let timestamp = self.timestamp.to_rfc3339();
        match self.outcome {
            OperationOutcome::Failed => tracing::warn!(
                target: OPERATIONS_TARGET,
                timestamp = %timestamp,
                correlation_id = %self.correlation_id,
                assignment_id = %assignment_id,
                operation = %self.operation,
                outcome = %self.outcome,
                latency_ms = self.latency_ms,
                "operation"
            ),
            _ => tracing::info!(
                target: OPERATIONS_TARGET,
                timestamp = %timestamp,
                correlation_id = %self.correlation_id,
                assignment_id = %assignment_id,
                operation = %self.operation,
                outcome = %self.outcome,
                latency_ms = self.latency_ms,
                "operation"
            ),
        }
    }
}

/// Measures one operation from start to [`finish`](OperationTimer::finish).
///
/// Latency uses tokio's clock so paused-time tests observe simulated durations.
#[derive(Debug, Clone)]
pub struct OperationTimer {
    operation: Operation,
    correlation_id: Uuid,
    assignment_id: Option<String>,
    started: Instant,
}

impl OperationTimer {
    pub fn start(operation: Operation, correlation_id: Uuid, assignment_id: Option<String>) -> Self {
        Self {
            operation,
            correlation_id,
            assignment_id,
            started: Instant::now(),
        }
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    /// Set the assignment once it becomes known (e.g. after parsing a key).
    pub fn set_assignment_id(&mut self, assignment_id: impl Into<String>) {
        self.assignment_id = Some(assignment_id.into());
    }

    /// Build, emit and return the record.
    pub fn finish(self, now: DateTime<Utc>, outcome: OperationOutcome) -> OperationRecord {
        let record = OperationRecord {
            timestamp: now,
            correlation_id: self.correlation_id,
            assignment_id: self.assignment_id,
            operation: self.operation,
            outcome,
            latency_ms: self.started.elapsed().as_secs_f64() * 1000.0,
        };
        record.emit();
        record
    }
}
