//! Environment-driven configuration for the CDC router.
//!
//! Each sub-config owns one concern and loads independently via
//! [`env_utils::EnvLoader`], following the same composition pattern the
//! teacher crate used for its own `WorkflowConfig`.

pub mod env_utils;
pub mod error;

pub use error::{ConfigError, ConfigResult};

use env_utils::EnvLoader;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration shared by every binary entry point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdcConfig {
    pub replication: ReplicationConfig,
    pub jobs: JobsConfig,
    pub monitoring: MonitoringConfig,
}

impl CdcConfig {
    pub fn from_env() -> ConfigResult<Self> {
        Ok(Self {
            replication: ReplicationConfig::from_env()?,
            jobs: JobsConfig::from_env()?,
            monitoring: MonitoringConfig::from_env()?,
        })
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.replication.validate()?;
        self.jobs.validate()?;
        self.monitoring.validate()
    }
}

/// §4.5/§6: database connection, publication/slot naming, NOTIFY channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    pub database_url: String,
    pub publication_name: String,
    pub slot_name: String,
    pub notify_channel: String,
    /// `source` attribute override for emitted CloudEvents (§6); falls back
    /// to `postgresql://<host>` derived from `database_url` when unset.
    pub source_uri: Option<String>,
}

impl ReplicationConfig {
    fn from_env() -> ConfigResult<Self> {
        Ok(Self {
            database_url: EnvLoader::load_required("DATABASE_URL")?,
            publication_name: EnvLoader::load_with_default(
                "PUBLICATION_NAME",
                "age_pub".to_string(),
            )?,
            slot_name: EnvLoader::load_with_default("SLOT_NAME", "age_slot".to_string())?,
            notify_channel: EnvLoader::load_with_default(
                "NOTIFY_CHANNEL",
                "digitaltwins_telemetry".to_string(),
            )?,
            source_uri: EnvLoader::load_optional("EVENT_SOURCE_URI")?,
        })
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.database_url.is_empty() {
            return Err(ConfigError::RequiredFieldMissing("DATABASE_URL".to_string()));
        }
        Ok(())
    }
}

/// §4.8/§4.9: job-engine tunables (batch sizes, checkpoint/heartbeat/lease).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    pub batch_size: usize,
    pub checkpoint_interval_lines: u64,
    pub heartbeat_interval: Duration,
    pub lease_duration: Duration,
}

impl JobsConfig {
    fn from_env() -> ConfigResult<Self> {
        Ok(Self {
            batch_size: EnvLoader::load_with_default("JOB_BATCH_SIZE", 50usize)?,
            checkpoint_interval_lines: EnvLoader::load_with_default(
                "JOB_CHECKPOINT_INTERVAL",
                50u64,
            )?,
            heartbeat_interval: EnvLoader::load_duration_seconds(
                "JOB_HEARTBEAT_INTERVAL_SECONDS",
                30,
            )?,
            lease_duration: EnvLoader::load_duration_seconds(
                "JOB_LEASE_DURATION_SECONDS",
                300,
            )?,
        })
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.batch_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "JOB_BATCH_SIZE must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Prometheus registry + log level. No HTTP endpoint is mounted here — the
/// web host is an external collaborator (spec §1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub metrics_enabled: bool,
    pub log_level: String,
}

impl MonitoringConfig {
    fn from_env() -> ConfigResult<Self> {
        Ok(Self {
            metrics_enabled: EnvLoader::load_bool("METRICS_ENABLED", true),
            log_level: EnvLoader::load_with_default("LOG_LEVEL", "info".to_string())?,
        })
    }

    fn validate(&self) -> ConfigResult<()> {
        let valid = ["trace", "debug", "info", "warn", "error"];
        if !valid.contains(&self.log_level.as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "invalid LOG_LEVEL '{}', must be one of: {}",
                self.log_level,
                valid.join(", ")
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monitoring_config_rejects_unknown_log_level() {
        let config = MonitoringConfig {
            metrics_enabled: true,
            log_level: "verbose".to_string(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn jobs_config_rejects_zero_batch_size() {
        let config = JobsConfig {
            batch_size: 0,
            checkpoint_interval_lines: 50,
            heartbeat_interval: Duration::from_secs(30),
            lease_duration: Duration::from_secs(300),
        };
        assert!(config.validate().is_err());
    }
}
