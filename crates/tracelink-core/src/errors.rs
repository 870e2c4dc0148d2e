//! Error types for the Tracelink SDK
//!
//! This module contains all error types used throughout the core, including
//! network errors, session errors, queue/store errors, payload validation
//! errors, and the main TracelinkError type that unifies them all.
//!
//! Every variant carries owned data and derives Clone so a single terminal
//! outcome can be delivered to every waiter attached to a request.

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Network-level failures reported by the executor boundary
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    #[error("request timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
    #[error("transient network failure: {reason}")]
    Transient { reason: String },
    #[error("server rejected request (status {status}): {reason}")]
    Permanent { status: u16, reason: String },
}

impl NetworkError {
    /// Whether the dispatcher may retry the request after this failure
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NetworkError::Timeout { .. } | NetworkError::Transient { .. }
        )
    }

    /// Classify an HTTP status code into a transient or permanent failure
    pub fn from_status(status: u16, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        if status >= 500 {
            NetworkError::Transient {
                reason: format!("server error {status}: {reason}"),
            }
        } else {
            NetworkError::Permanent { status, reason }
        }
    }
}

/// Session lifecycle errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// A session initialization is already in flight. Callers are attached
    /// to the pending attempt instead of starting a second one.
    #[error("session initialization already in flight")]
    AlreadyInitializing,
    #[error("invalid session transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },
    #[error("operation requires an initialized session")]
    NotInitialized,
}

/// Queue and durable store errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// A persisted record could not be deserialized. Dropped on load,
    /// never surfaced to a caller.
    #[error("persisted record at position {position} is corrupt: {reason}")]
    Corrupt { position: usize, reason: String },
    #[error("durable store failure: {reason}")]
    Store { reason: String },
    #[error("queue is full ({capacity} pending requests)")]
    Full { capacity: usize },
}

/// Payload shape validation errors, reported before a request is queued
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("payload for {kind} must be a JSON object")]
    NotAnObject { kind: String },
    #[error("payload for {kind} is missing required field `{field}`")]
    MissingField { kind: String, field: &'static str },
    #[error("payload field `{field}` for {kind} must be {expected}")]
    WrongType {
        kind: String,
        field: &'static str,
        expected: &'static str,
    },
}

// ----------------------------------------------------------------------------
// Unified Error Type
// ----------------------------------------------------------------------------

/// Core error type for the Tracelink SDK
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TracelinkError {
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The request was cancelled before a network outcome was reached
    #[error("request cancelled: {reason}")]
    Cancelled { reason: String },

    /// The dispatcher is no longer running
    #[error("dispatcher unavailable: {reason}")]
    Shutdown { reason: String },

    /// The SDK was configured inconsistently
    #[error("configuration error: {reason}")]
    Configuration { reason: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl TracelinkError {
    /// Create a timeout error for the given bound
    pub fn timed_out(duration_ms: u64) -> Self {
        TracelinkError::Network(NetworkError::Timeout { duration_ms })
    }

    /// Create a transient network error with a reason
    pub fn transient<R: Into<String>>(reason: R) -> Self {
        TracelinkError::Network(NetworkError::Transient {
            reason: reason.into(),
        })
    }

    /// Create a cancellation error with a reason
    pub fn cancelled<R: Into<String>>(reason: R) -> Self {
        TracelinkError::Cancelled {
            reason: reason.into(),
        }
    }

    /// Create a shutdown error with a reason
    pub fn shutdown<R: Into<String>>(reason: R) -> Self {
        TracelinkError::Shutdown {
            reason: reason.into(),
        }
    }

    /// Create a durable store error with a reason
    pub fn store_error<R: Into<String>>(reason: R) -> Self {
        TracelinkError::Queue(QueueError::Store {
            reason: reason.into(),
        })
    }

    /// Create a configuration error with a reason
    pub fn config_error<R: Into<String>>(reason: R) -> Self {
        TracelinkError::Configuration {
            reason: reason.into(),
        }
    }

    /// Whether the dispatcher may retry the request after this failure
    pub fn is_retryable(&self) -> bool {
        match self {
            TracelinkError::Network(e) => e.is_retryable(),
            _ => false,
        }
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, TracelinkError>;
pub type TracelinkResult<T> = Result<T>;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(NetworkError::from_status(500, "oops").is_retryable());
        assert!(NetworkError::from_status(503, "unavailable").is_retryable());
        assert!(!NetworkError::from_status(400, "bad request").is_retryable());
        assert!(!NetworkError::from_status(404, "not found").is_retryable());
    }

    #[test]
    fn test_timeout_is_retryable() {
        let err = TracelinkError::timed_out(5500);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_terminal_errors_are_not_retryable() {
        assert!(!TracelinkError::cancelled("teardown").is_retryable());
        assert!(!TracelinkError::Validation(ValidationError::NotAnObject {
            kind: "Event".to_string()
        })
        .is_retryable());
    }
}
