//! Error types for the audit core.
//!
//! Errors are split by how far they propagate:
//!
//! - [`AuditError`] is fatal and unwinds the whole run (bad credentials,
//!   an unreachable root compartment, broken configuration).
//! - [`FetchError`] is raised by a single call against the Identity API and
//!   is either retried, recorded against one compartment, or escalated when
//!   it signals that the session itself is no longer valid.
//!
//! Statement parse problems never surface as errors here; see
//! [`crate::parser::ParseError`].

use std::time::Duration;

// =============================================================================
// Fatal Errors
// =============================================================================

/// Errors that abort an analysis run.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// The session could not be established from the configured credentials.
    #[error("Authentication failed: {message}")]
    Auth {
        /// Description of why the session could not be created.
        message: String,
    },

    /// The remote API rejected the session's credentials mid-run.
    #[error("Credentials rejected by the Identity API: {message}")]
    Unauthenticated {
        /// Message returned by the service.
        message: String,
    },

    /// The root compartment could not be loaded.
    #[error("Invalid root compartment {compartment_id}: {message}")]
    InvalidRoot {
        /// The requested root compartment OCID.
        compartment_id: String,
        /// Why the root could not be loaded.
        message: String,
    },

    /// Local configuration is invalid or incomplete.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// Reading or writing a local file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuditError {
    /// Create an authentication error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

// =============================================================================
// Fetch Errors
// =============================================================================

/// Errors returned by a single Identity API call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// Rate limiting, a 5xx response, a timeout or a dropped connection.
    #[error("Transient failure: {message}")]
    Transient {
        /// Description of the failure.
        message: String,
        /// Server-suggested delay before retrying, if any.
        retry_after: Option<Duration>,
    },

    /// The request was refused for this resource (403, 404, other 4xx).
    #[error("Request rejected (HTTP {status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Message returned by the service.
        message: String,
    },

    /// The credentials were rejected (401).
    #[error("Unauthenticated: {message}")]
    Unauthenticated {
        /// Message returned by the service.
        message: String,
    },

    /// The response body could not be decoded.
    #[error("Failed to decode response: {message}")]
    Decode {
        /// Description of the decode failure.
        message: String,
    },
}

impl FetchError {
    /// Create a transient error without a retry hint.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Whether the call may succeed if repeated.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Whether the error invalidates the whole session.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unauthenticated { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_is_retryable() {
        let err = FetchError::transient("HTTP 429");
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_rejected_is_neither_retryable_nor_fatal() {
        let err = FetchError::Rejected {
            status: 404,
            message: "NotAuthorizedOrNotFound".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_unauthenticated_is_fatal() {
        let err = FetchError::Unauthenticated {
            message: "bad signature".to_string(),
        };
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = AuditError::InvalidRoot {
            compartment_id: "ocid1.tenancy.oc1..aaa".to_string(),
            message: "not found".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid root compartment ocid1.tenancy.oc1..aaa: not found"
        );
    }
}
