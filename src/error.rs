//! Classified error types
//!
//! Every remote failure is mapped onto a fixed taxonomy before recovery
//! runs. Severity, retryability and fallback availability are derived from
//! the classified kind in one place; call sites never set them directly, so
//! classification and recovery behavior cannot drift apart.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

use crate::data::FetchError;

/// Classified failure kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Timeout,
    Api,
    Cache,
    Validation,
    Unknown,
}

impl ErrorKind {
    pub fn severity(self) -> Severity {
        match self {
            ErrorKind::Network | ErrorKind::Api => Severity::High,
            ErrorKind::Timeout | ErrorKind::Cache => Severity::Medium,
            ErrorKind::Validation => Severity::Low,
            ErrorKind::Unknown => Severity::Critical,
        }
    }

    /// Whether a fallback to cached data is meaningful for this kind
    pub fn fallback_available(self) -> bool {
        matches!(self, ErrorKind::Network | ErrorKind::Api)
    }

    /// Pre-rendered user-facing message for this kind.
    ///
    /// Messages are rendered from the classification, never from the raw
    /// failure text.
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorKind::Network => "Connection problem - showing cached data where available",
            ErrorKind::Timeout => "The data service is slow to respond - retrying",
            ErrorKind::Api => "The data service reported a problem - retrying shortly",
            ErrorKind::Cache => "Local cache problem - data was reloaded",
            ErrorKind::Validation => "Some records could not be read and were skipped",
            ErrorKind::Unknown => "An unexpected error occurred",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Api => "api",
            ErrorKind::Cache => "cache",
            ErrorKind::Validation => "validation",
            ErrorKind::Unknown => "unknown",
        }
    }
}

/// Derived severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Per-operation context attached at classification time
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub operation: String,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: String,
}

static CORRELATION_SEQ: AtomicU64 = AtomicU64::new(0);

fn next_correlation_id(operation: &str) -> String {
    let seq = CORRELATION_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}-{}", operation, Utc::now().timestamp_millis(), seq)
}

/// A classified failure with everything recovery needs to act on it
#[derive(Debug, Clone, Error)]
#[error("{message} [{kind:?}]")]
pub struct EnhancedError {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub retryable: bool,
    pub fallback_available: bool,
    /// Pre-rendered human-readable message
    pub message: String,
    /// Raw failure text, for logs only
    pub detail: String,
    pub context: ErrorContext,
}

impl EnhancedError {
    fn new(kind: ErrorKind, retryable: bool, detail: String, operation: &str) -> Self {
        EnhancedError {
            kind,
            severity: kind.severity(),
            retryable,
            fallback_available: kind.fallback_available(),
            message: kind.user_message().to_string(),
            detail,
            context: ErrorContext {
                operation: operation.to_string(),
                timestamp: Utc::now(),
                correlation_id: next_correlation_id(operation),
            },
        }
    }

    /// Build a validation error directly, without a fetch failure
    pub fn validation(operation: &str, detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, false, detail.into(), operation)
    }
}

/// Map a raw fetch failure onto the taxonomy.
///
/// Network and timeout failures are always retryable; API failures only for
/// 5xx and rate-limit responses; cache failures get one retry; validation
/// and unknown failures are never retried.
pub fn classify(operation: &str, err: FetchError) -> EnhancedError {
    let detail = err.to_string();
    match err {
        FetchError::Network(_) => EnhancedError::new(ErrorKind::Network, true, detail, operation),
        FetchError::Timeout(_) => EnhancedError::new(ErrorKind::Timeout, true, detail, operation),
        FetchError::Api { status, .. } => {
            let retryable = status >= 500 || status == 429;
            EnhancedError::new(ErrorKind::Api, retryable, detail, operation)
        }
        FetchError::Cache(_) => EnhancedError::new(ErrorKind::Cache, true, detail, operation),
        FetchError::Decode(_) => {
            EnhancedError::new(ErrorKind::Validation, false, detail, operation)
        }
        FetchError::Other(_) => EnhancedError::new(ErrorKind::Unknown, false, detail, operation),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_errors_are_retryable_with_fallback() {
        let err = classify("refresh_full", FetchError::Network("connection refused".into()));
        assert_eq!(err.kind, ErrorKind::Network);
        assert!(err.retryable);
        assert!(err.fallback_available);
        assert_eq!(err.severity, Severity::High);
    }

    #[test]
    fn api_retryable_only_for_server_side_failures() {
        let server = classify(
            "refresh_full",
            FetchError::Api { status: 503, message: "unavailable".into() },
        );
        assert!(server.retryable);

        let rate_limited = classify(
            "refresh_full",
            FetchError::Api { status: 429, message: "slow down".into() },
        );
        assert!(rate_limited.retryable);

        let client_side = classify(
            "refresh_full",
            FetchError::Api { status: 404, message: "missing".into() },
        );
        assert!(!client_side.retryable);
        assert!(client_side.fallback_available);
    }

    #[test]
    fn validation_and_unknown_never_retry() {
        let validation = classify("refresh_full", FetchError::Decode("bad json".into()));
        assert_eq!(validation.kind, ErrorKind::Validation);
        assert!(!validation.retryable);
        assert!(!validation.fallback_available);
        assert_eq!(validation.severity, Severity::Low);

        let unknown = classify("refresh_full", FetchError::Other("boom".into()));
        assert_eq!(unknown.kind, ErrorKind::Unknown);
        assert!(!unknown.retryable);
        assert_eq!(unknown.severity, Severity::Critical);
    }

    #[test]
    fn message_is_rendered_from_kind_not_raw_text() {
        let err = classify("refresh_full", FetchError::Network("very raw detail".into()));
        assert!(!err.message.contains("very raw detail"));
        assert!(err.detail.contains("very raw detail"));
    }

    #[test]
    fn correlation_ids_are_unique() {
        let a = classify("op", FetchError::Network("x".into()));
        let b = classify("op", FetchError::Network("x".into()));
        assert_ne!(a.context.correlation_id, b.context.correlation_id);
    }
}
