//! Error context utilities: correlation IDs and structured metadata for logs.

use super::{CdcError, ErrorCategory, ErrorMetadata, ErrorSeverity};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug)]
pub struct ErrorContext {
    pub error: CdcError,
    pub metadata: ErrorMetadata,
    pub chain: Vec<String>,
}

impl ErrorContext {
    pub fn new(error: CdcError) -> Self {
        let (category, severity, code) = categorize_error(&error);
        Self {
            error,
            metadata: ErrorMetadata::new(category, severity, code),
            chain: Vec::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(json_value) = serde_json::to_value(value) {
            self.metadata.context.insert(key.into(), json_value);
        }
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.metadata.correlation_id = Some(id.into());
        self
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.chain.push(cause.into());
        self
    }

    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "error": self.error.to_string(),
            "category": self.metadata.category,
            "severity": self.metadata.severity,
            "code": self.metadata.error_code,
            "correlation_id": self.metadata.correlation_id,
            "context": self.metadata.context,
            "chain": self.chain,
            "timestamp": self.metadata.timestamp,
            "retry_count": self.metadata.retry_count,
        })
    }
}

pub trait ErrorContextExt: Sized {
    fn context(self, key: impl Into<String>, value: impl Serialize) -> ErrorContext;
    fn with_correlation_id(self, id: impl Into<String>) -> ErrorContext;
    fn with_contexts(self, contexts: HashMap<String, Value>) -> ErrorContext;
}

impl ErrorContextExt for CdcError {
    fn context(self, key: impl Into<String>, value: impl Serialize) -> ErrorContext {
        ErrorContext::new(self).with_context(key, value)
    }

    fn with_correlation_id(self, id: impl Into<String>) -> ErrorContext {
        ErrorContext::new(self).with_correlation_id(id)
    }

    fn with_contexts(self, contexts: HashMap<String, Value>) -> ErrorContext {
        let mut error_context = ErrorContext::new(self);
        for (key, value) in contexts {
            error_context.metadata.context.insert(key, value);
        }
        error_context
    }
}

/// Maps each [`CdcError`] variant to the category/severity/code triple used
/// for structured logging and retry decisions, per the §7 taxonomy.
pub fn categorize_error(error: &CdcError) -> (ErrorCategory, ErrorSeverity, String) {
    match error {
        CdcError::ConnectionError { .. } => {
            (ErrorCategory::Transient, ErrorSeverity::Warning, "CONN_001".to_string())
        }
        CdcError::SinkTransient { .. } => {
            (ErrorCategory::Transient, ErrorSeverity::Warning, "SINK_001".to_string())
        }
        CdcError::DatabaseConnectivity { .. } => {
            (ErrorCategory::Transient, ErrorSeverity::Error, "DB_CONN_001".to_string())
        }
        CdcError::DatabaseError { .. } => {
            (ErrorCategory::Transient, ErrorSeverity::Error, "DB_001".to_string())
        }
        CdcError::SlotInvalidated { .. } => {
            (ErrorCategory::Permanent, ErrorSeverity::Critical, "SLOT_001".to_string())
        }
        CdcError::LeaseLost { .. } => {
            (ErrorCategory::Permanent, ErrorSeverity::Error, "LEASE_001".to_string())
        }
        CdcError::JobCancelled { .. } => {
            (ErrorCategory::Permanent, ErrorSeverity::Info, "JOB_CANCEL_001".to_string())
        }
        CdcError::InvalidEventData { .. } => {
            (ErrorCategory::User, ErrorSeverity::Warning, "EVT_SHAPE_001".to_string())
        }
        CdcError::ValidationError { .. } => {
            (ErrorCategory::User, ErrorSeverity::Warning, "VAL_001".to_string())
        }
        CdcError::ConfigurationError(_) => {
            (ErrorCategory::User, ErrorSeverity::Critical, "CFG_001".to_string())
        }
        CdcError::DecodeSkip { .. } => {
            (ErrorCategory::Permanent, ErrorSeverity::Info, "DECODE_SKIP_001".to_string())
        }
        CdcError::DlqPersistFailure { .. } => {
            (ErrorCategory::System, ErrorSeverity::Critical, "DLQ_001".to_string())
        }
        CdcError::SerializationError { .. } => {
            (ErrorCategory::System, ErrorSeverity::Error, "SER_001".to_string())
        }
        CdcError::Internal { .. } => {
            (ErrorCategory::System, ErrorSeverity::Error, "INTERNAL_001".to_string())
        }
    }
}

pub struct ErrorContextBuilder {
    error: CdcError,
    context: HashMap<String, Value>,
    correlation_id: Option<String>,
    causes: Vec<String>,
}

impl ErrorContextBuilder {
    pub fn new(error: CdcError) -> Self {
        Self {
            error,
            context: HashMap::new(),
            correlation_id: None,
            causes: Vec::new(),
        }
    }

    pub fn context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(json_value) = serde_json::to_value(value) {
            self.context.insert(key.into(), json_value);
        }
        self
    }

    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn cause(mut self, cause: impl Into<String>) -> Self {
        self.causes.push(cause.into());
        self
    }

    pub fn build(self) -> ErrorContext {
        let mut error_context = ErrorContext::new(self.error);
        error_context.metadata.context = self.context;
        error_context.metadata.correlation_id = self.correlation_id;
        error_context.chain = self.causes;
        error_context
    }
}

pub struct CorrelationIdGenerator;

impl CorrelationIdGenerator {
    pub fn generate() -> String {
        use uuid::Uuid;
        format!("cdc-{}", Uuid::new_v4())
    }

    pub fn generate_with_prefix(prefix: &str) -> String {
        use uuid::Uuid;
        format!("{}-{}", prefix, Uuid::new_v4())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_context_with_chain_and_correlation() {
        let error = CdcError::internal("boom");
        let context = ErrorContextBuilder::new(error)
            .context("graph_name", "factory-a")
            .correlation_id("cdc-123")
            .cause("connection reset upstream")
            .build();

        assert_eq!(context.metadata.correlation_id.as_deref(), Some("cdc-123"));
        assert_eq!(context.chain.len(), 1);
        assert_eq!(
            context.metadata.context.get("graph_name"),
            Some(&serde_json::json!("factory-a"))
        );
    }

    #[test]
    fn categorizes_transient_and_permanent_errors() {
        let (category, _, _) = categorize_error(&CdcError::connection_error("reset"));
        assert_eq!(category, ErrorCategory::Transient);

        let (category, severity, _) =
            categorize_error(&CdcError::SlotInvalidated { message: "gone".into() });
        assert_eq!(category, ErrorCategory::Permanent);
        assert_eq!(severity, ErrorSeverity::Critical);
    }
}
