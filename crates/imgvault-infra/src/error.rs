//! Caller-facing error reports.
//!
//! [`ErrorReport`] carries the non-technical message and error code of an
//! [`EngineError`], plus the correlation id that ties it to the detailed log line
//! written by [`log_engine_error`].

use imgvault_core::{EngineError, ErrorMetadata, LogLevel};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct ErrorReport {
    pub error: String,
    pub error_code: &'static str,
    pub recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

impl ErrorReport {
    pub fn from_engine_error(err: &EngineError, correlation_id: Option<Uuid>) -> Self {
        Self {
            error: err.client_message(),
            error_code: err.error_code(),
            recoverable: err.is_recoverable(),
            correlation_id,
        }
    }
}

/// Log the technical detail of an error at the level the error asks for.
pub fn log_engine_error(err: &EngineError, correlation_id: Option<Uuid>, context: &str) {
    let correlation_id = correlation_id.map(|id| id.to_string()).unwrap_or_default();
    match err.log_level() {
        LogLevel::Debug => tracing::debug!(
            error = %err,
            error_code = err.error_code(),
            correlation_id = %correlation_id,
            "{}", context
        ),
        LogLevel::Warn => tracing::warn!(
            error = %err,
            error_code = err.error_code(),
            correlation_id = %correlation_id,
            "{}", context
        ),
        LogLevel::Error => tracing::error!(
            error = %err,
            error_code = err.error_code(),
            correlation_id = %correlation_id,
            alert = err.requires_alert(),
            "{}", context
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_hides_technical_detail() {
        let err = EngineError::Permission("AccessDenied for arn:aws:s3:::images".into());
        let id = Uuid::new_v4();
        let report = ErrorReport::from_engine_error(&err, Some(id));
        assert_eq!(report.error_code, "PERMISSION_DENIED");
        assert!(!report.recoverable);
        assert!(!report.error.contains("arn"));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["correlation_id"], id.to_string());
    }

    #[test]
    fn report_without_correlation_omits_field() {
        let err = EngineError::TransientNetwork("reset".into());
        let json = serde_json::to_value(ErrorReport::from_engine_error(&err, None)).unwrap();
        assert!(json.get("correlation_id").is_none());
        assert_eq!(json["recoverable"], true);
    }
}
