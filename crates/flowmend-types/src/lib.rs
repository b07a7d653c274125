//! Shared types for the flowmend engine.
//!
//! This crate provides the unified error taxonomy used across all other
//! flowmend crates. Malformed flow *content* is never represented here — the
//! engine reports bad input through diagnostics, not errors. `Error` covers
//! the things that genuinely abort a session: collaborator failures,
//! authentication, I/O.

use serde::{Deserialize, Serialize};

/// Unified error type for all flowmend subsystems.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The collaborator rejected our credentials (HTTP 401-class).
    /// Always fatal to the session.
    #[error("Authentication failed for service {service}")]
    Auth { service: String },

    /// A collaborator returned a non-success response.
    #[error("Service {service} returned HTTP {status}: {message}")]
    Service {
        service: String,
        status: u16,
        message: String,
        retryable: bool,
    },

    /// A collaborator call exceeded its caller-supplied timeout.
    #[error("Request to {service} timed out after {timeout_ms}ms")]
    Timeout { service: String, timeout_ms: u64 },

    /// A document-level precondition failed (empty input, unreadable file).
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Returns `true` if the error is transient and the operation may succeed
    /// on a later refinement iteration.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout { .. } | Error::Service { retryable: true, .. }
        )
    }

    /// Returns `true` if the error is permanent and retrying will not help.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::Auth { .. } | Error::Validation(_))
    }
}

/// A convenience alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

// ---------------------------------------------------------------------------
// RemoteError — one error as reported by the external semantic validator
// ---------------------------------------------------------------------------

/// A single error reported by the external semantic validator.
///
/// Lives here (not in the remote crate) because the engine's classifier,
/// guard rails, and signatures all operate on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    #[serde(rename = "nodeId")]
    pub node_id: i64,
    pub field: String,
    pub message: String,
}

impl RemoteError {
    pub fn new(node_id: i64, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            node_id,
            field: field.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_auth() {
        let err = Error::Auth {
            service: "semantic-validator".into(),
        };
        assert_eq!(
            err.to_string(),
            "Authentication failed for service semantic-validator"
        );
    }

    #[test]
    fn error_display_service() {
        let err = Error::Service {
            service: "repairer".into(),
            status: 503,
            message: "unavailable".into(),
            retryable: true,
        };
        assert_eq!(
            err.to_string(),
            "Service repairer returned HTTP 503: unavailable"
        );
    }

    #[test]
    fn error_display_timeout() {
        let err = Error::Timeout {
            service: "repairer".into(),
            timeout_ms: 30_000,
        };
        assert_eq!(err.to_string(), "Request to repairer timed out after 30000ms");
    }

    #[test]
    fn retryable_timeout() {
        let err = Error::Timeout {
            service: "x".into(),
            timeout_ms: 1,
        };
        assert!(err.is_retryable());
        assert!(!err.is_terminal());
    }

    #[test]
    fn retryable_service_when_flagged() {
        let err = Error::Service {
            service: "x".into(),
            status: 502,
            message: "bad gateway".into(),
            retryable: true,
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn not_retryable_service_when_not_flagged() {
        let err = Error::Service {
            service: "x".into(),
            status: 400,
            message: "bad request".into(),
            retryable: false,
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn terminal_auth() {
        let err = Error::Auth { service: "x".into() };
        assert!(err.is_terminal());
        assert!(!err.is_retryable());
    }

    #[test]
    fn terminal_validation() {
        let err = Error::Validation("empty document".into());
        assert!(err.is_terminal());
    }

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.csv");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("missing.csv"));
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn remote_error_serde_uses_node_id_key() {
        let err = RemoteError::new(42, "whatNext", "unhandled output value");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["nodeId"], 42);
        assert_eq!(json["field"], "whatNext");

        let back: RemoteError = serde_json::from_value(json).unwrap();
        assert_eq!(back, err);
    }
}
