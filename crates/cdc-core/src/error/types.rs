//! Error taxonomy shared across the workspace.
//!
//! Every fallible operation in the CDC router returns a variant of
//! [`CdcError`]. Variants carry enough context for a call site to decide,
//! without re-inspecting the source fault, whether to retry, drop-and-log,
//! or escalate to a terminal job status.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, Serialize, Deserialize)]
pub enum CdcError {
    /// C2: the `(old, new)` pair doesn't satisfy the shape a requested event
    /// format needs (missing `$dtId`/`$relationshipId`, null required side,
    /// event type mismatch). Never retried.
    #[error("invalid event data: {message}")]
    InvalidEventData { message: String },

    /// C5: a row/message intentionally produced no `EventData` (system
    /// namespace, unrecognized entity shape). Logged at info, not a failure.
    #[error("decode skipped: {reason}")]
    DecodeSkip { reason: String },

    /// C5/C6/sinks: a transport-level fault (reset, broken pipe, timeout,
    /// EOF). The owning loop sleeps and reconnects indefinitely.
    #[error("connection error: {message}")]
    ConnectionError { message: String },

    /// C5: the replication slot was invalidated or no longer exists.
    #[error("replication slot invalidated: {message}")]
    SlotInvalidated { message: String },

    /// C3: a sink's send failed with retries remaining.
    #[error("sink send failed ({sink_name}, attempt {attempt}): {message}")]
    SinkTransient {
        sink_name: String,
        attempt: u32,
        message: String,
    },

    /// C10: the dead-letter queue itself failed to persist a failed batch.
    #[error("dead-letter persist failed: {message}")]
    DlqPersistFailure { message: String },

    /// C9: a job's database connection is down; the job is left `running`
    /// for `getJobsToResume` to pick up on another process.
    #[error("database connectivity lost: {message}")]
    DatabaseConnectivity { message: String },

    /// C9: malformed job input. Terminates the job as `failed`, not retried.
    #[error("job validation failed: {message}")]
    ValidationError { message: String },

    /// C8/C9: the distributed lease was lost or never acquired.
    #[error("lease lost for job {job_id}")]
    LeaseLost { job_id: String },

    /// C9: cooperative cancellation observed via the heartbeat timer.
    #[error("job {job_id} cancelled")]
    JobCancelled { job_id: String },

    /// Any database failure not otherwise classified above.
    #[error("database error: {message}")]
    DatabaseError { message: String },

    /// (De)serialization failure.
    #[error("serialization error: {message}")]
    SerializationError { message: String },

    /// Configuration failed to load or validate.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// Anything else.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl CdcError {
    pub fn invalid_event_data(message: impl Into<String>) -> Self {
        Self::InvalidEventData { message: message.into() }
    }

    pub fn connection_error(message: impl Into<String>) -> Self {
        Self::ConnectionError { message: message.into() }
    }

    pub fn database_error(message: impl Into<String>) -> Self {
        Self::DatabaseError { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Classifies a raw transport error message the way C5's connection-fault
    /// detection does: resets, broken pipes, timeouts and EOF-like phrases
    /// are connection faults regardless of the underlying source type; slot
    /// invalidation phrasing is distinguished from a plain connection drop.
    pub fn classify_io_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        let is_slot_invalidated = lower.contains("replication slot")
            && (lower.contains("invalidated") || lower.contains("no longer get changes"));
        if is_slot_invalidated {
            return Self::SlotInvalidated { message: message.to_string() };
        }
        let is_connection = lower.contains("end of stream")
            || lower.contains("server closed connection")
            || lower.contains("connection is broken")
            || lower.contains("connection reset")
            || lower.contains("broken pipe")
            || lower.contains("timed out")
            || lower.contains("timeout");
        if is_connection {
            Self::ConnectionError { message: message.to_string() }
        } else {
            Self::Internal { message: message.to_string() }
        }
    }
}

impl From<serde_json::Error> for CdcError {
    fn from(e: serde_json::Error) -> Self {
        Self::SerializationError { message: e.to_string() }
    }
}

#[cfg(feature = "database")]
impl From<diesel::result::Error> for CdcError {
    fn from(e: diesel::result::Error) -> Self {
        Self::DatabaseError { message: e.to_string() }
    }
}

#[cfg(feature = "database")]
impl From<diesel::r2d2::PoolError> for CdcError {
    fn from(e: diesel::r2d2::PoolError) -> Self {
        Self::DatabaseError { message: format!("connection pool: {e}") }
    }
}

impl From<tokio_postgres::Error> for CdcError {
    fn from(e: tokio_postgres::Error) -> Self {
        Self::classify_io_message(&e.to_string())
    }
}

impl From<crate::config::ConfigError> for CdcError {
    fn from(e: crate::config::ConfigError) -> Self {
        Self::ConfigurationError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CdcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_connection_faults() {
        assert!(matches!(
            CdcError::classify_io_message("server closed connection unexpectedly"),
            CdcError::ConnectionError { .. }
        ));
        assert!(matches!(
            CdcError::classify_io_message("read: connection reset by peer"),
            CdcError::ConnectionError { .. }
        ));
    }

    #[test]
    fn classifies_slot_invalidation_distinctly() {
        assert!(matches!(
            CdcError::classify_io_message("replication slot \"age_slot\" invalidated"),
            CdcError::SlotInvalidated { .. }
        ));
        assert!(matches!(
            CdcError::classify_io_message("can no longer get changes from replication slot \"age_slot\""),
            CdcError::SlotInvalidated { .. }
        ));
    }

    #[test]
    fn falls_back_to_internal() {
        assert!(matches!(
            CdcError::classify_io_message("syntax error near FROM"),
            CdcError::Internal { .. }
        ));
    }
}
