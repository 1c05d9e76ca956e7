//! Error handling framework shared by every crate in the workspace.
//!
//! - [`CdcError`] is the structured error enum (§7 taxonomy).
//! - `retry` provides deterministic exponential backoff (§6, §8 item 8).
//! - `circuit_breaker` guards outbound connections (replication, sinks).
//! - `context` adds correlation IDs and structured metadata for logging.

pub mod circuit_breaker;
pub mod context;
pub mod retry;
pub mod types;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use context::{ErrorContext, ErrorContextExt};
pub use retry::{retry_with_policy, RetryPolicy, RetryableError};
pub use types::{CdcError, Result};

use serde::{Deserialize, Serialize};

/// Error severity levels for monitoring and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Error categories used to decide retry eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// May succeed on retry (connection faults, sink transients).
    Transient,
    /// Will not succeed on retry (bad input, invalid event shape).
    Permanent,
    /// Caller/operator error (validation, configuration).
    User,
    /// Infrastructure/dependency failure not classified above.
    System,
}

/// Extended error trait for structured logging call sites.
pub trait ErrorExt: std::error::Error {
    fn category(&self) -> ErrorCategory;
    fn severity(&self) -> ErrorSeverity;

    fn is_retryable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Transient)
    }

    fn error_code(&self) -> &'static str;
}

/// Metadata attached to an error for structured logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetadata {
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub error_code: String,
    pub correlation_id: Option<String>,
    pub context: std::collections::HashMap<String, serde_json::Value>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub retry_count: u32,
}

impl ErrorMetadata {
    pub fn new(category: ErrorCategory, severity: ErrorSeverity, error_code: String) -> Self {
        Self {
            category,
            severity,
            error_code,
            correlation_id: None,
            context: std::collections::HashMap::new(),
            timestamp: chrono::Utc::now(),
            retry_count: 0,
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(json_value) = serde_json::to_value(value) {
            self.context.insert(key.into(), json_value);
        }
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_metadata_builds_with_context() {
        let metadata = ErrorMetadata::new(
            ErrorCategory::Transient,
            ErrorSeverity::Warning,
            "TEST_001".to_string(),
        )
        .with_context("graph_name", "factory-a")
        .with_correlation_id("cdc-123");

        assert_eq!(metadata.category, ErrorCategory::Transient);
        assert_eq!(metadata.severity, ErrorSeverity::Warning);
        assert_eq!(metadata.correlation_id.as_deref(), Some("cdc-123"));
        assert!(metadata.context.contains_key("graph_name"));
    }
}
