//! Output shapes and error reporting for the `imgvault` binary.

use chrono::{DateTime, Utc};
use imgvault_core::{EngineError, ImageRecord, StorageTier};
use imgvault_infra::{log_engine_error, ErrorReport};
use imgvault_services::retrieval::PLACEHOLDER_MESSAGE;
use imgvault_services::{
    CacheStatus, Delivery, DeliveryReference, SweepFailure, SweepReport, TierTransition,
    UploadError, UploadReceipt,
};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct UploadOutput {
    pub correlation_id: Uuid,
    pub key: String,
    pub optimized: bool,
    pub attempts: u32,
    pub compression_ratio: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub removed_siblings: Vec<String>,
    pub record: ImageRecord,
}

impl From<&UploadReceipt> for UploadOutput {
    fn from(receipt: &UploadReceipt) -> Self {
        Self {
            correlation_id: receipt.correlation_id,
            key: receipt.key().to_string(),
            optimized: receipt.optimized,
            attempts: receipt.attempts,
            compression_ratio: receipt.compression_ratio(),
            removed_siblings: receipt.removed_siblings.clone(),
            record: receipt.record(),
        }
    }
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReferenceOutput {
    Cdn {
        url: String,
    },
    Signed {
        url: String,
        expires_at: DateTime<Utc>,
    },
    Missing {
        placeholder: &'static str,
    },
}

impl From<DeliveryReference> for ReferenceOutput {
    fn from(reference: DeliveryReference) -> Self {
        match reference {
            DeliveryReference::Cdn { url } => ReferenceOutput::Cdn { url },
            DeliveryReference::Signed { url, expires_at } => {
                ReferenceOutput::Signed { url, expires_at }
            }
            DeliveryReference::Missing => ReferenceOutput::Missing {
                placeholder: PLACEHOLDER_MESSAGE,
            },
        }
    }
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchOutput {
    Found {
        key: String,
        content_type: String,
        size_bytes: usize,
        cache: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        written_to: Option<String>,
    },
    Missing {
        key: String,
        placeholder: &'static str,
    },
}

impl FetchOutput {
    pub fn new(key: &str, delivery: &Delivery, written_to: Option<String>) -> Self {
        match delivery {
            Delivery::Bytes {
                bytes,
                content_type,
                cache,
            } => FetchOutput::Found {
                key: key.to_string(),
                content_type: content_type.clone(),
                size_bytes: bytes.len(),
                cache: cache_label(*cache),
                written_to,
            },
            Delivery::Missing => FetchOutput::Missing {
                key: key.to_string(),
                placeholder: PLACEHOLDER_MESSAGE,
            },
        }
    }
}

pub fn cache_label(status: CacheStatus) -> &'static str {
    match status {
        CacheStatus::Hit => "hit",
        CacheStatus::Miss => "miss",
        CacheStatus::Bypass => "bypass",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionOutput {
    pub key: String,
    pub from: StorageTier,
    pub to: StorageTier,
    pub age_days: i64,
}

impl From<&TierTransition> for TransitionOutput {
    fn from(t: &TierTransition) -> Self {
        Self {
            key: t.key.clone(),
            from: t.from,
            to: t.to,
            age_days: t.age_days,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureOutput {
    pub key: String,
    pub error: String,
}

impl From<&SweepFailure> for FailureOutput {
    fn from(f: &SweepFailure) -> Self {
        Self {
            key: f.key.clone(),
            error: f.error.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SweepOutput {
    pub scanned: usize,
    pub deleted: usize,
    pub transitions: Vec<TransitionOutput>,
    pub failures: Vec<FailureOutput>,
}

impl From<&SweepReport> for SweepOutput {
    fn from(report: &SweepReport) -> Self {
        Self {
            scanned: report.scanned,
            deleted: report.deleted(),
            transitions: report.transitions.iter().map(TransitionOutput::from).collect(),
            failures: report.failures.iter().map(FailureOutput::from).collect(),
        }
    }
}

/// Summary of a simulated lifecycle run.
#[derive(Debug, Serialize)]
pub struct SimulationOutput {
    pub simulated_days: u32,
    pub sweeps: usize,
    pub ended_at: DateTime<Utc>,
    pub transitions: Vec<TransitionOutput>,
    pub failures: Vec<FailureOutput>,
}

impl SimulationOutput {
    pub fn new(simulated_days: u32, ended_at: DateTime<Utc>, reports: &[SweepReport]) -> Self {
        Self {
            simulated_days,
            sweeps: reports.len(),
            ended_at,
            transitions: reports
                .iter()
                .flat_map(|r| r.transitions.iter().map(TransitionOutput::from))
                .collect(),
            failures: reports
                .iter()
                .flat_map(|r| r.failures.iter().map(FailureOutput::from))
                .collect(),
        }
    }
}

/// Sweeps needed to cover `days` of simulated time, counting the sweep at day zero.
pub fn ticks_for_days(days: u32, interval: Duration) -> usize {
    let step = interval.as_secs().max(1);
    (u64::from(days) * 86_400 / step) as usize + 1
}

/// A failed command, already logged, ready to print.
#[derive(Debug)]
pub struct CommandFailure {
    pub report: ErrorReport,
}

impl CommandFailure {
    pub fn engine(err: &EngineError, correlation_id: Option<Uuid>, context: &str) -> Self {
        log_engine_error(err, correlation_id, context);
        Self {
            report: ErrorReport::from_engine_error(err, correlation_id),
        }
    }
}

impl From<EngineError> for CommandFailure {
    fn from(err: EngineError) -> Self {
        Self::engine(&err, None, "Command failed")
    }
}

impl From<UploadError> for CommandFailure {
    fn from(err: UploadError) -> Self {
        tracing::warn!(
            correlation_id = %err.correlation_id,
            attempts = err.attempts,
            "Upload gave up"
        );
        Self::engine(&err.kind, Some(err.correlation_id), "Upload failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use imgvault_core::ErrorMetadata;

    fn delivery(data: &'static [u8], cache: CacheStatus) -> Delivery {
        Delivery::Bytes {
            bytes: data.into(),
            content_type: "image/webp".to_string(),
            cache,
        }
    }

    fn transition(key: &str, to: StorageTier) -> TierTransition {
        TierTransition {
            key: key.to_string(),
            from: StorageTier::Standard,
            to,
            age_days: 90,
        }
    }

    #[test]
    fn missing_reference_serializes_with_placeholder() {
        let value = serde_json::to_value(ReferenceOutput::from(DeliveryReference::Missing)).unwrap();
        assert_eq!(value["status"], "missing");
        assert_eq!(value["placeholder"], PLACEHOLDER_MESSAGE);
    }

    #[test]
    fn signed_reference_keeps_expiry() {
        let expires_at = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        let value = serde_json::to_value(ReferenceOutput::from(DeliveryReference::Signed {
            url: "http://localhost/media/generated_images/1.webp".to_string(),
            expires_at,
        }))
        .unwrap();
        assert_eq!(value["status"], "signed");
        assert_eq!(value["expires_at"], "2024-01-01T01:00:00Z");
    }

    #[test]
    fn fetch_output_reports_size_and_cache() {
        let output = FetchOutput::new(
            "generated_images/1.webp",
            &delivery(b"abcd", CacheStatus::Hit),
            None,
        );
        assert_eq!(
            output,
            FetchOutput::Found {
                key: "generated_images/1.webp".to_string(),
                content_type: "image/webp".to_string(),
                size_bytes: 4,
                cache: "hit",
                written_to: None,
            }
        );

        let missing = FetchOutput::new("generated_images/2.webp", &Delivery::Missing, None);
        assert!(matches!(missing, FetchOutput::Missing { .. }));
    }

    #[test]
    fn sweep_output_counts_deletions() {
        let report = SweepReport {
            scanned: 3,
            transitions: vec![
                transition("generated_images/1.webp", StorageTier::Infrequent),
                transition("generated_images/2.webp", StorageTier::Deleted),
            ],
            failures: vec![SweepFailure {
                key: "generated_images/3.webp".to_string(),
                error: "Transient network error: reset".to_string(),
            }],
        };
        let output = SweepOutput::from(&report);
        assert_eq!(output.scanned, 3);
        assert_eq!(output.deleted, 1);
        assert_eq!(output.transitions.len(), 2);
        assert_eq!(output.failures[0].key, "generated_images/3.webp");

        let value = serde_json::to_value(&output).unwrap();
        assert_eq!(value["transitions"][1]["to"], "DELETED");
    }

    #[test]
    fn simulation_flattens_reports() {
        let ended_at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let reports = vec![
            SweepReport::default(),
            SweepReport {
                scanned: 1,
                transitions: vec![transition("generated_images/1.webp", StorageTier::Archive)],
                failures: vec![],
            },
        ];
        let output = SimulationOutput::new(270, ended_at, &reports);
        assert_eq!(output.sweeps, 2);
        assert_eq!(output.transitions.len(), 1);
        assert!(output.failures.is_empty());
    }

    #[test]
    fn tick_count_includes_day_zero() {
        let daily = Duration::from_secs(86_400);
        assert_eq!(ticks_for_days(0, daily), 1);
        assert_eq!(ticks_for_days(635, daily), 636);
        assert_eq!(ticks_for_days(2, Duration::from_secs(3_600)), 49);
        assert_eq!(ticks_for_days(1, Duration::ZERO), 86_401);
    }

    #[test]
    fn upload_failure_keeps_correlation_id() {
        let correlation_id = Uuid::new_v4();
        let failure = CommandFailure::from(UploadError {
            correlation_id,
            assignment_id: None,
            attempts: 3,
            kind: EngineError::TransientNetwork("connection reset".to_string()),
        });
        assert_eq!(failure.report.correlation_id, Some(correlation_id));
        assert_eq!(
            failure.report.error_code,
            EngineError::TransientNetwork(String::new()).error_code()
        );
        assert!(failure.report.recoverable);
    }
}
