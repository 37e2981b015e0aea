//! Error types for control-plane operations.
//!
//! Errors are categorized so callers can tell a transient failure from a
//! rejected request, and so an "already in that state" answer can be treated
//! as a no-op. Each variant keeps the context reported by the plane.

use crate::types::TaskId;
use std::time::Duration;
use thiserror::Error;

/// Categories of control-plane errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Connection, DNS or transport failure (transient)
    Network,
    /// A wait on the plane exceeded its budget (transient)
    Timeout,
    /// Guest, node or task does not exist
    NotFound,
    /// The plane refused the request (validation, conflict, quota)
    Rejected,
    /// The guest already is in the requested power state
    AlreadyInState,
    /// An asynchronous task finished unsuccessfully
    TaskFailed,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether this error category is typically transient.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network | Self::Timeout)
    }

    /// Whether this error can be safely ignored (operation already done).
    pub fn is_ignorable(&self) -> bool {
        matches!(self, Self::AlreadyInState)
    }
}

/// Errors that can occur while talking to the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Network-related error (connection, timeout, DNS, etc.)
    #[error("network error: {message}")]
    Network {
        /// Detailed error message from the failed request
        message: String,
    },

    /// Waiting for the plane to converge took too long
    #[error("timed out after {waited:?} waiting for {operation}")]
    Timeout {
        /// What was being waited for
        operation: String,
        /// Time spent waiting
        waited: Duration,
    },

    /// Guest, node or task not found
    #[error("not found: {what}")]
    NotFound {
        /// Description of the missing object
        what: String,
    },

    /// The plane refused the request
    #[error("rejected: {message}")]
    Rejected {
        /// Reason given by the plane
        message: String,
    },

    /// Guest already in the requested power state
    #[error("guest {vmid} {message}")]
    AlreadyInState {
        /// Guest id
        vmid: u32,
        /// Message from the plane, e.g. "already running"
        message: String,
    },

    /// An asynchronous task finished with a failure exit status
    #[error("task {task} failed: {exit_status}")]
    TaskFailed {
        /// The task handle
        task: TaskId,
        /// Exit status reported by the plane
        exit_status: String,
    },

    /// Malformed response from the plane
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Network { .. } => ErrorCategory::Network,
            Error::Timeout { .. } => ErrorCategory::Timeout,
            Error::NotFound { .. } => ErrorCategory::NotFound,
            Error::Rejected { .. } => ErrorCategory::Rejected,
            Error::AlreadyInState { .. } => ErrorCategory::AlreadyInState,
            Error::TaskFailed { .. } => ErrorCategory::TaskFailed,
            _ => ErrorCategory::Other,
        }
    }

    /// Whether this error is typically transient.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Whether this error can be safely ignored.
    pub fn is_ignorable(&self) -> bool {
        self.category().is_ignorable()
    }

    /// Shorthand for a not-found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound { what: what.into() }
    }
}

/// Result type for control-plane operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_retryable() {
        assert!(ErrorCategory::Network.is_retryable());
        assert!(ErrorCategory::Timeout.is_retryable());
        assert!(!ErrorCategory::Rejected.is_retryable());
        assert!(!ErrorCategory::AlreadyInState.is_retryable());
    }

    #[test]
    fn test_error_category_ignorable() {
        assert!(ErrorCategory::AlreadyInState.is_ignorable());
        assert!(!ErrorCategory::NotFound.is_ignorable());
        assert!(!ErrorCategory::TaskFailed.is_ignorable());
    }

    #[test]
    fn test_error_category_of_variants() {
        let stopped = Error::AlreadyInState {
            vmid: 142,
            message: "not running".to_string(),
        };
        assert!(stopped.is_ignorable());
        assert_eq!(Error::not_found("qemu 142").category(), ErrorCategory::NotFound);
        let network = Error::Network {
            message: "connection reset".to_string(),
        };
        assert!(network.is_retryable());
        assert_eq!(
            Error::InvalidResponse("{}".to_string()).category(),
            ErrorCategory::Other
        );
    }
}
