//! Composition-root configuration. Loads `cdc_core::config::CdcConfig` (the
//! database/replication/jobs/monitoring settings every crate already knows
//! how to read) plus the sink registry and route table that only this
//! binary is in a position to assemble, following the same
//! load-then-validate shape as the teacher's `WorkflowConfig::from_env`.

use crate::sinks::SinkSpec;
use cdc_core::config::env_utils::EnvLoader;
use cdc_core::config::{CdcConfig, ConfigError, ConfigResult};
use cdc_core::model::EventRoute;

/// Schema the dead-letter queue lives under when no override is set (§4.10).
const DEFAULT_DLQ_SCHEMA: &str = "digitaltwins_eventing";

pub struct AppConfig {
    pub cdc: CdcConfig,
    /// Sinks to construct, parsed from `SINKS_CONFIG` (a JSON array of
    /// `SinkSpec`). Empty when unset, so `cdc-router run` still starts with
    /// decode-and-drop semantics for local exploration.
    pub sinks: Vec<SinkSpec>,
    /// Routes binding sink names to output formats, parsed from
    /// `ROUTES_CONFIG` (a JSON array of `EventRoute`).
    pub routes: Vec<EventRoute>,
    pub dlq_schema: String,
}

impl AppConfig {
    pub fn from_env() -> ConfigResult<Self> {
        let cdc = CdcConfig::from_env()?;
        let sinks = Self::load_sinks()?;
        let routes = Self::load_routes()?;
        let dlq_schema = EnvLoader::load_with_default("DLQ_SCHEMA", DEFAULT_DLQ_SCHEMA.to_string())?;
        Ok(Self { cdc, sinks, routes, dlq_schema })
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.cdc.validate()?;
        let sink_names: std::collections::HashSet<&str> = self.sinks.iter().map(SinkSpec::name).collect();
        for route in &self.routes {
            if !sink_names.contains(route.sink_name.as_str()) {
                return Err(ConfigError::ValidationFailed(format!(
                    "route references unknown sink '{}'",
                    route.sink_name
                )));
            }
        }
        Ok(())
    }

    fn load_sinks() -> ConfigResult<Vec<SinkSpec>> {
        match std::env::var("SINKS_CONFIG") {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| ConfigError::parse_error(e.to_string(), "JSON", "SINKS_CONFIG")),
            Err(_) => Ok(Vec::new()),
        }
    }

    fn load_routes() -> ConfigResult<Vec<EventRoute>> {
        match std::env::var("ROUTES_CONFIG") {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| ConfigError::parse_error(e.to_string(), "JSON", "ROUTES_CONFIG")),
            Err(_) => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_a_route_naming_an_unconfigured_sink() {
        let config = AppConfig {
            cdc: CdcConfig {
                replication: cdc_core::config::ReplicationConfig {
                    database_url: "postgres://localhost/db".to_string(),
                    publication_name: "age_pub".to_string(),
                    slot_name: "age_slot".to_string(),
                    notify_channel: "digitaltwins_telemetry".to_string(),
                    source_uri: None,
                },
                jobs: cdc_core::config::JobsConfig {
                    batch_size: 50,
                    checkpoint_interval_lines: 50,
                    heartbeat_interval: std::time::Duration::from_secs(30),
                    lease_duration: std::time::Duration::from_secs(300),
                },
                monitoring: cdc_core::config::MonitoringConfig {
                    metrics_enabled: true,
                    log_level: "info".to_string(),
                },
            },
            sinks: Vec::new(),
            routes: vec![EventRoute::new("missing-sink", cdc_core::EventFormat::EventNotification)],
            dlq_schema: DEFAULT_DLQ_SCHEMA.to_string(),
        };
        assert!(config.validate().is_err());
    }
}
