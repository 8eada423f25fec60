//! Error taxonomy and the transport-facing error envelope
//!
//! Every failure surfaced by the library carries a category, severity,
//! recoverable flag, and a recovery-strategy tag so the outer transport can
//! decide whether to retry, fall back, or abort. The envelope shape matches
//! the wire contract consumed by callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error categories as they appear on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Config,
    CodexNotAvailable,
    CodexTimeout,
    CodexResponse,
    CodexTransient,
    CodexFatal,
    Filesystem,
    SessionCorruption,
    Busy,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

/// What the caller should do about the error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    Retry,
    Fallback,
    Skip,
    Abort,
    UserIntervention,
}

#[derive(Error, Debug)]
pub enum GavelError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Judge executable not found: {0}")]
    JudgeNotAvailable(String),

    #[error("Judge timed out after {seconds}s")]
    JudgeTimeout { seconds: u64 },

    #[error("Malformed judge response: {0}")]
    JudgeResponse(String),

    #[error("Transient judge failure: {0}")]
    JudgeTransient(String),

    #[error("Judge failed: {0}")]
    JudgeFatal(String),

    #[error("Filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    #[error("Session file for '{id}' is corrupted, archived as {archived}")]
    SessionCorruption { id: String, archived: String },

    #[error("Audit capacity exhausted, retry after {retry_after_ms}ms")]
    Busy { retry_after_ms: u64 },

    #[error("Audit cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GavelError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            GavelError::Config(_) => ErrorCategory::Config,
            GavelError::JudgeNotAvailable(_) => ErrorCategory::CodexNotAvailable,
            GavelError::JudgeTimeout { .. } => ErrorCategory::CodexTimeout,
            GavelError::JudgeResponse(_) => ErrorCategory::CodexResponse,
            GavelError::JudgeTransient(_) => ErrorCategory::CodexTransient,
            GavelError::JudgeFatal(_) => ErrorCategory::CodexFatal,
            GavelError::Filesystem(_) => ErrorCategory::Filesystem,
            GavelError::SessionCorruption { .. } => ErrorCategory::SessionCorruption,
            GavelError::Busy { .. } => ErrorCategory::Busy,
            GavelError::Cancelled => ErrorCategory::Internal,
            GavelError::Serialization(_) => ErrorCategory::Internal,
            GavelError::Internal(_) => ErrorCategory::Internal,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            GavelError::Config(_)
            | GavelError::SessionCorruption { .. }
            | GavelError::Busy { .. }
            | GavelError::Cancelled => Severity::Warning,
            GavelError::JudgeTimeout { .. }
            | GavelError::JudgeResponse(_)
            | GavelError::JudgeTransient(_)
            | GavelError::Filesystem(_) => Severity::Error,
            GavelError::JudgeNotAvailable(_)
            | GavelError::JudgeFatal(_)
            | GavelError::Serialization(_)
            | GavelError::Internal(_) => Severity::Critical,
        }
    }

    pub fn recoverable(&self) -> bool {
        !matches!(
            self,
            GavelError::JudgeNotAvailable(_)
                | GavelError::JudgeFatal(_)
                | GavelError::Internal(_)
                | GavelError::Serialization(_)
        )
    }

    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        match self {
            GavelError::Config(_) => RecoveryStrategy::Fallback,
            GavelError::JudgeNotAvailable(_) => RecoveryStrategy::UserIntervention,
            GavelError::JudgeTimeout { .. }
            | GavelError::JudgeResponse(_)
            | GavelError::JudgeTransient(_)
            | GavelError::Filesystem(_)
            | GavelError::Busy { .. } => RecoveryStrategy::Retry,
            GavelError::SessionCorruption { .. } => RecoveryStrategy::Fallback,
            GavelError::Cancelled => RecoveryStrategy::Skip,
            GavelError::JudgeFatal(_)
            | GavelError::Serialization(_)
            | GavelError::Internal(_) => RecoveryStrategy::Abort,
        }
    }

    /// Actionable hints surfaced alongside the error
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            GavelError::Config(_) => vec![
                "Check the inline gan-config block for invalid values".to_string(),
                "Out-of-range numbers are clamped; defaults apply otherwise".to_string(),
            ],
            GavelError::JudgeNotAvailable(exe) => vec![
                format!("Install the '{exe}' executable and ensure it is on PATH"),
                "Set GAVEL_JUDGE_EXECUTABLE to an alternative reviewer".to_string(),
            ],
            GavelError::JudgeTimeout { .. } => vec![
                "Increase GAVEL_AUDIT_TIMEOUT_SECONDS".to_string(),
                "Reduce the candidate size or context scope".to_string(),
            ],
            GavelError::JudgeResponse(_) => vec![
                "Retry the audit; the judge may emit valid output next time".to_string(),
            ],
            GavelError::JudgeTransient(_) => {
                vec!["Retry after a short delay".to_string()]
            }
            GavelError::Busy { retry_after_ms } => vec![format!(
                "Retry after {retry_after_ms}ms or raise GAVEL_MAX_CONCURRENT_AUDITS"
            )],
            GavelError::SessionCorruption { .. } => vec![
                "A fresh session was created; previous history was archived".to_string(),
            ],
            _ => Vec::new(),
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            GavelError::Config(_) => 400,
            GavelError::JudgeNotAvailable(_) => 503,
            GavelError::JudgeTimeout { .. } => 504,
            GavelError::JudgeResponse(_) => 502,
            GavelError::JudgeTransient(_) => 503,
            GavelError::Busy { .. } => 503,
            GavelError::Cancelled => 499,
            _ => 500,
        }
    }

    /// Build the wire envelope, optionally attaching the last-known verdict
    pub fn to_envelope(&self, fallback_data: Option<serde_json::Value>) -> ErrorEnvelope {
        let retry_info = match self {
            GavelError::Busy { retry_after_ms } => Some(RetryInfo {
                can_retry: true,
                retry_after_ms: Some(*retry_after_ms),
                max_retries: None,
            }),
            GavelError::JudgeTimeout { .. }
            | GavelError::JudgeTransient(_)
            | GavelError::JudgeResponse(_) => Some(RetryInfo {
                can_retry: true,
                retry_after_ms: Some(1_000),
                max_retries: Some(2),
            }),
            _ => None,
        };

        ErrorEnvelope {
            is_error: true,
            error: self.to_string(),
            diagnostic: Diagnostic {
                category: self.category(),
                severity: self.severity(),
                message: self.to_string(),
                suggestions: self.suggestions(),
                timestamp: Utc::now(),
            },
            status_code: self.status_code(),
            recoverable: self.recoverable(),
            retry_info,
            fallback_data,
        }
    }
}

/// Structured diagnostic attached to every error envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub message: String,
    pub suggestions: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryInfo {
    pub can_retry: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

/// Envelope returned to the outer transport when an audit fails outright
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub is_error: bool,
    pub error: String,
    pub diagnostic: Diagnostic,
    pub status_code: u16,
    pub recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_info: Option<RetryInfo>,
    #[serde(rename = "fallback_data", skip_serializing_if = "Option::is_none")]
    pub fallback_data: Option<serde_json::Value>,
}

pub type Result<T> = std::result::Result<T, GavelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_envelope_carries_retry_hint() {
        let err = GavelError::Busy { retry_after_ms: 500 };
        let envelope = err.to_envelope(None);
        assert!(envelope.is_error);
        assert_eq!(envelope.status_code, 503);
        assert!(envelope.recoverable);
        let retry = envelope.retry_info.expect("busy errors advertise retry");
        assert!(retry.can_retry);
        assert_eq!(retry.retry_after_ms, Some(500));
    }

    #[test]
    fn judge_missing_is_fatal() {
        let err = GavelError::JudgeNotAvailable("codex".to_string());
        assert_eq!(err.category(), ErrorCategory::CodexNotAvailable);
        assert_eq!(err.severity(), Severity::Critical);
        assert!(!err.recoverable());
        assert_eq!(err.recovery_strategy(), RecoveryStrategy::UserIntervention);
    }

    #[test]
    fn category_serializes_to_wire_names() {
        let json = serde_json::to_string(&ErrorCategory::CodexNotAvailable).unwrap();
        assert_eq!(json, "\"codex_not_available\"");
        let json = serde_json::to_string(&ErrorCategory::SessionCorruption).unwrap();
        assert_eq!(json, "\"session_corruption\"");
    }

    #[test]
    fn envelope_round_trips() {
        let err = GavelError::JudgeTimeout { seconds: 30 };
        let envelope = err.to_envelope(Some(serde_json::json!({"overall": 70})));
        let raw = serde_json::to_string(&envelope).unwrap();
        assert!(raw.contains("\"isError\":true"));
        assert!(raw.contains("\"fallback_data\""));
        let back: ErrorEnvelope = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.status_code, 504);
    }
}
