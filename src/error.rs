//! Error taxonomy shared by the tool layer and the MCP boundary.
//!
//! Internal layers use `anyhow` freely; everything that crosses the MCP
//! boundary is first converted into a [`ToolError`] so the client always sees
//! the same JSON shape: `{ success: false, error, error_kind, ... }`.

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

/// Machine-readable error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// Bad user input: empty URL list, malformed URL, wrong argument type.
    InvalidArgument,
    /// Source, URL, or script path not present.
    NotFound,
    /// Vector store / graph store / search backend / embedding API unreachable.
    BackendUnavailable,
    /// Backend returned a 4xx/5xx or a validation error (e.g. dimension mismatch).
    BackendRejected,
    /// Per-operation deadline exceeded.
    Timeout,
    /// Batch completed with some sub-items failed.
    PartialFailure,
    /// Unexpected; surfaced with a correlation id, never with a stack trace.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::BackendUnavailable => "BackendUnavailable",
            ErrorKind::BackendRejected => "BackendRejected",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::PartialFailure => "PartialFailure",
            ErrorKind::Internal => "Internal",
        }
    }
}

/// A single failed sub-item within a batch operation.
#[derive(Debug, Clone, Serialize)]
pub struct UrlFailure {
    pub url: String,
    pub error: String,
}

/// Error type returned by tool handlers.
///
/// Carries enough structure for the MCP dispatcher to render the user-visible
/// failure object without inspecting message text.
#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct ToolError {
    pub kind: ErrorKind,
    pub message: String,
    /// Per-URL failures, present for `PartialFailure`.
    pub failures: Vec<UrlFailure>,
    /// Set for `Internal` errors; also logged to stderr.
    pub correlation_id: Option<String>,
}

impl ToolError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            failures: Vec::new(),
            correlation_id: None,
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn backend_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BackendUnavailable, message)
    }

    pub fn backend_rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BackendRejected, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn partial(message: impl Into<String>, failures: Vec<UrlFailure>) -> Self {
        Self {
            kind: ErrorKind::PartialFailure,
            message: message.into(),
            failures,
            correlation_id: None,
        }
    }

    /// Wrap an unexpected error. The full chain is logged to stderr; the
    /// client sees only a short message and the correlation id.
    pub fn internal(err: &anyhow::Error) -> Self {
        let correlation_id = Uuid::new_v4().to_string();
        tracing::error!(correlation_id = %correlation_id, error = ?err, "internal error");
        Self {
            kind: ErrorKind::Internal,
            message: "internal error".to_string(),
            failures: Vec::new(),
            correlation_id: Some(correlation_id),
        }
    }

    /// Render the user-visible failure object.
    pub fn to_value(&self) -> Value {
        let mut obj = json!({
            "success": false,
            "error": self.message,
            "error_kind": self.kind.as_str(),
        });
        if !self.failures.is_empty() {
            obj["failures"] = json!(self.failures);
        }
        if let Some(ref id) = self.correlation_id {
            obj["correlation_id"] = json!(id);
        }
        obj
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_value_shape() {
        let err = ToolError::invalid_argument("url must be string or string[]");
        let v = err.to_value();
        assert_eq!(v["success"], false);
        assert_eq!(v["error_kind"], "InvalidArgument");
        assert_eq!(v["error"], "url must be string or string[]");
        assert!(v.get("failures").is_none());
    }

    #[test]
    fn test_partial_failure_carries_urls() {
        let err = ToolError::partial(
            "1 of 3 URLs failed",
            vec![UrlFailure {
                url: "https://bad.test/x".to_string(),
                error: "timeout".to_string(),
            }],
        );
        let v = err.to_value();
        assert_eq!(v["error_kind"], "PartialFailure");
        assert_eq!(v["failures"][0]["url"], "https://bad.test/x");
    }

    #[test]
    fn test_internal_has_correlation_id() {
        let err = ToolError::internal(&anyhow::anyhow!("boom"));
        let v = err.to_value();
        assert_eq!(v["error_kind"], "Internal");
        assert!(v["correlation_id"].as_str().is_some());
        // The underlying message never reaches the client field.
        assert_eq!(v["error"], "internal error");
    }
}
