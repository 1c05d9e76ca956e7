//! Configuration error types
//!
//! This module provides the error types for configuration management.

use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    
    #[error("Invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },
    
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
    
    #[error("Parsing error: {0}")]
    ParseError(String),
    
    #[error("Required field missing: {0}")]
    RequiredFieldMissing(String),
}

impl ConfigError {
    pub fn env_var_not_found(key: &str, context: Option<&str>) -> Self {
        match context {
            Some(context) => ConfigError::EnvVarNotFound(format!("{key} ({context})")),
            None => ConfigError::EnvVarNotFound(key.to_string()),
        }
    }

    pub fn parse_error(message: impl Into<String>, kind: &str, key: &str) -> Self {
        ConfigError::ParseError(format!("{kind} {key}: {}", message.into()))
    }

    pub fn invalid_value(key: &str, value: &str, expected: &str, context: &str) -> Self {
        ConfigError::InvalidValue {
            key: format!("{key} ({context})"),
            value: format!("{value}, expected {expected}"),
        }
    }

    pub fn validation_failed(
        message: impl Into<String>,
        context: &str,
        hint: &str,
        details: Vec<(String, String)>,
    ) -> Self {
        let detail_str = details.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(", ");
        ConfigError::ValidationFailed(format!("{} ({context}; {hint}; {detail_str})", message.into()))
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;