//! Error types for the OceanStor orchestration core
//!
//! Provides structured error types for the REST call layer, the resource
//! facades, QoS validation and the volume/attachment workflows.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the orchestration core
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Call Layer Errors
    // =========================================================================
    #[error("Transport error calling {url}: {reason}")]
    Transport { url: String, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Backend {backend} is closed")]
    BackendClosed { backend: String },

    // =========================================================================
    // Backend Business Errors
    // =========================================================================
    #[error("{operation} failed, error code: {code}, description: {description}")]
    Backend {
        operation: String,
        code: i64,
        description: String,
    },

    #[error("Field {field} is expected to be {expected}, but got {found}")]
    Decode {
        field: String,
        expected: &'static str,
        found: String,
    },

    #[error("{kind} {name} does not exist")]
    NotFound { kind: String, name: String },

    #[error("{operation} timed out after {duration:?}")]
    Timeout { operation: String, duration: Duration },

    // =========================================================================
    // Caller Errors
    // =========================================================================
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an error, used for retry and logging decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Could not reach the backend
    Transport,
    /// Backend answered with something that is not the expected envelope
    Protocol,
    /// Backend answered with a non-zero business code
    Business,
    /// Login rejected or no reachable URL
    Authentication,
    /// Caller parameters failed a precondition
    Validation,
    /// Object already owned by someone else
    Conflict,
    /// Everything else
    Other,
}

impl Error {
    /// Shorthand for a backend business error
    pub fn backend(operation: impl Into<String>, code: i64, description: impl Into<String>) -> Self {
        Error::Backend {
            operation: operation.into(),
            code,
            description: description.into(),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transport { .. } => ErrorKind::Transport,
            Error::Protocol(_) | Error::Decode { .. } | Error::JsonParse(_) => ErrorKind::Protocol,
            Error::Backend { .. } | Error::NotFound { .. } | Error::Timeout { .. } => {
                ErrorKind::Business
            }
            Error::Authentication(_) => ErrorKind::Authentication,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Conflict(_) => ErrorKind::Conflict,
            _ => ErrorKind::Other,
        }
    }

    /// Backend error code carried by this error, if any
    pub fn code(&self) -> Option<i64> {
        match self {
            Error::Backend { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Check if this error is worth retrying at a higher level
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport { .. } => true,
            Error::Backend { code, .. } => crate::client::codes::is_retryable(*code),
            _ => false,
        }
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transport { .. } | Error::Timeout { .. })
    }
}

/// Result type alias for the orchestration core
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::codes;

    #[test]
    fn test_error_kinds() {
        let err = Error::Transport {
            url: "https://10.0.0.1:8088".into(),
            reason: "connection refused".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.is_transient());

        let err = Error::Validation("capacity must increase".into());
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!err.is_retryable());

        let err = Error::Conflict("initiator bound to host-a".into());
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_backend_error_message_embeds_code() {
        let err = Error::backend("Create filesystem vol1", 50331651, "parameter error");
        assert_eq!(
            err.to_string(),
            "Create filesystem vol1 failed, error code: 50331651, description: parameter error"
        );
        assert_eq!(err.code(), Some(50331651));
        assert_eq!(err.kind(), ErrorKind::Business);
    }

    #[test]
    fn test_busy_is_retryable() {
        let busy = Error::backend("Delete lun", codes::SYSTEM_BUSY, "busy");
        assert!(busy.is_retryable());
        let fatal = Error::backend("Delete lun", 1, "other");
        assert!(!fatal.is_retryable());
    }
}
