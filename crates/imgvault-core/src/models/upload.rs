use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result of a single write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    /// Failed, eligible for another attempt.
    Transient,
    /// Failed, never retried.
    Permanent,
}

/// One write attempt of an upload. Logged, then dropped once the upload settles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadAttempt {
    pub correlation_id: Uuid,
    pub attempt_number: u32,
    pub outcome: AttemptOutcome,
    pub error_kind: Option<String>,
}

impl UploadAttempt {
    pub fn succeeded(correlation_id: Uuid, attempt_number: u32) -> Self {
        Self {
            correlation_id,
            attempt_number,
            outcome: AttemptOutcome::Succeeded,
            error_kind: None,
        }
    }

    pub fn failed(
        correlation_id: Uuid,
        attempt_number: u32,
        transient: bool,
        error_kind: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id,
            attempt_number,
            outcome: if transient {
                AttemptOutcome::Transient
            } else {
                AttemptOutcome::Permanent
            },
            error_kind: Some(error_kind.into()),
        }
    }
}
