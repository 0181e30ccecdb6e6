// Copyright 2025 Cowboy AI, LLC.

//! Error types for saga coordination
//!
//! Step failure is a value carried in participant responses, not an error;
//! the variants here cover validation, infrastructure faults, and the
//! conflicts the state machine surfaces.

use thiserror::Error;

/// Errors that can occur while coordinating sagas
#[derive(Debug, Clone, Error)]
pub enum CoordinationError {
    /// Saga instance not found
    #[error("Saga not found: {0}")]
    SagaNotFound(String),

    /// The requested saga type has no registered step plan
    #[error("No step plan registered for saga type: {0}")]
    PlanUnknown(String),

    /// A saga with the supplied id already exists in a terminal state
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The saga is already in a terminal state
    #[error("Saga {saga_id} is terminal in state {state}")]
    SagaAlreadyTerminal {
        /// The saga in question
        saga_id: String,
        /// The terminal state it settled in
        state: String,
    },

    /// Invalid state transition
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state
        from: String,
        /// Attempted target state
        to: String,
    },

    /// Optimistic concurrency check failed: another worker advanced the saga
    #[error("Concurrency conflict on saga {saga_id}: expected state {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The saga whose update was rejected
        saga_id: String,
        /// The state the writer expected
        expected: String,
        /// The state actually found
        actual: String,
    },

    /// Malformed request or invalid enum value
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// A plan references a participant the registry cannot resolve
    #[error("Participant not resolved: {service}")]
    ParticipantUnresolved {
        /// Logical service name that failed to resolve
        service: String,
    },

    /// Transport-level participant fault (connection refused, 5xx, timeout)
    ///
    /// Retryable; after bounded retries it is converted into a step failure.
    #[error("Participant unreachable: {service} - {message}")]
    ParticipantUnreachable {
        /// Logical service name
        service: String,
        /// Transport error detail
        message: String,
    },

    /// A step exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The event log backend is unreachable
    #[error("Event log unavailable: {0}")]
    EventLogUnavailable(String),

    /// State store operation failed
    #[error("Store error: {0}")]
    StoreError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Metrics registration or encoding error
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// Generic coordination error
    #[error("Coordination error: {0}")]
    Generic(String),
}

/// Result type for coordination operations
pub type CoordinationResult<T> = Result<T, CoordinationError>;

impl From<serde_json::Error> for CoordinationError {
    fn from(err: serde_json::Error) -> Self {
        CoordinationError::Serialization(err.to_string())
    }
}

impl From<prometheus::Error> for CoordinationError {
    fn from(err: prometheus::Error) -> Self {
        CoordinationError::Metrics(err.to_string())
    }
}

impl CoordinationError {
    /// Create a generic coordination error
    pub fn generic(msg: impl Into<String>) -> Self {
        CoordinationError::Generic(msg.into())
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoordinationError::SagaNotFound(_))
    }

    /// Check if this is a validation error
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            CoordinationError::ValidationError(_)
                | CoordinationError::PlanUnknown(_)
                | CoordinationError::ParticipantUnresolved { .. }
        )
    }

    /// Check if this is a conflict the caller should see as 409
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            CoordinationError::AlreadyExists(_)
                | CoordinationError::SagaAlreadyTerminal { .. }
                | CoordinationError::ConcurrencyConflict { .. }
        )
    }

    /// Check if this is a transient fault worth retrying at the call site
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoordinationError::ParticipantUnreachable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formats() {
        let err = CoordinationError::ConcurrencyConflict {
            saga_id: "s-1".to_string(),
            expected: "StockVerifying".to_string(),
            actual: "Compensating".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("expected state StockVerifying"));
        assert!(text.contains("found Compensating"));

        let err = CoordinationError::PlanUnknown("OrderReturn".to_string());
        assert_eq!(
            err.to_string(),
            "No step plan registered for saga type: OrderReturn"
        );
    }

    #[test]
    fn classification_helpers() {
        assert!(CoordinationError::SagaNotFound("x".into()).is_not_found());
        assert!(CoordinationError::PlanUnknown("x".into()).is_validation_error());
        assert!(CoordinationError::AlreadyExists("x".into()).is_conflict());
        assert!(CoordinationError::ParticipantUnreachable {
            service: "payment-service".into(),
            message: "connection refused".into(),
        }
        .is_retryable());
        assert!(!CoordinationError::Timeout("step".into()).is_retryable());
    }

    #[test]
    fn serde_errors_convert() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: CoordinationError = parse_err.into();
        assert!(matches!(err, CoordinationError::Serialization(_)));
    }
}
