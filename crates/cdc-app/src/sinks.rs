//! Builds the sink registry from configuration (§6: "a configuration object
//! lists sinks ... and a list of routes"). `cdc-core` cannot depend on
//! `cdc-sinks` without a cycle, so the sink-kind enum and its construction
//! live here, in the composition root, the way `workflow-engine-app`'s
//! `main.rs` assembles `JwtAuth`/`RateLimitMiddleware` from env-loaded
//! settings just before building the server.

use cdc_core::{CdcError, DlqWriter};
use cdc_sinks::analytics::{AnalyticsOptions, AnalyticsSink};
use cdc_sinks::kafka::{KafkaCredentials, KafkaOptions, KafkaSink, SaslMechanism, SecurityProtocol};
use cdc_sinks::mqtt::{MqttCredentials, MqttProtocolVersion, MqttSink, MqttSinkOptions};
use cdc_sinks::oauth::{OAuthConfig, OAuthTokenProvider};
use cdc_sinks::webhook::{WebhookAuth, WebhookOptions, WebhookSink};
use cdc_sinks::{DispatchSink, ResilientSink};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Client-credentials OAuth parameters, inlined into whichever sink variant
/// needs them rather than nested as a sub-enum, since a JSON/YAML object
/// can only carry one `type` discriminator key.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthSpec {
    pub token_endpoint: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
}

impl OAuthSpec {
    fn into_provider(self) -> Arc<OAuthTokenProvider> {
        OAuthTokenProvider::new(OAuthConfig {
            token_endpoint: self.token_endpoint,
            client_id: self.client_id,
            client_secret: self.client_secret,
            scope: self.scope,
            tenant_id: self.tenant_id,
        })
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WebhookAuthSpec {
    #[default]
    None,
    Basic {
        username: String,
        password: String,
    },
    Bearer {
        token: String,
    },
    #[serde(rename = "oauth")]
    OAuth(OAuthSpec),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KafkaCredentialsSpec {
    Password { username: String, password: String },
    #[serde(rename = "oauth")]
    OAuth(OAuthSpec),
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MqttCredentialsSpec {
    #[default]
    None,
    Password {
        username: String,
        password: String,
    },
    #[serde(rename = "oauth")]
    OAuth(OAuthSpec),
}

fn default_security_protocol() -> String {
    "plaintext".to_string()
}

fn default_sasl_mechanism() -> String {
    "plain".to_string()
}

fn default_mqtt_protocol_version() -> String {
    "3.1.1".to_string()
}

/// One configured sink (§6, §4.4). Tagged by `kind` so a single JSON/YAML
/// document can list a heterogeneous set of sinks.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkSpec {
    Webhook {
        name: String,
        url: String,
        #[serde(default)]
        auth: WebhookAuthSpec,
    },
    Kafka {
        name: String,
        brokers: Vec<String>,
        topic: String,
        #[serde(default = "default_security_protocol")]
        security_protocol: String,
        #[serde(default = "default_sasl_mechanism")]
        sasl_mechanism: String,
        credentials: KafkaCredentialsSpec,
    },
    Mqtt {
        name: String,
        host: String,
        port: u16,
        client_id: String,
        topic: String,
        #[serde(default = "default_mqtt_protocol_version")]
        protocol_version: String,
        #[serde(default)]
        credentials: MqttCredentialsSpec,
    },
    Analytics {
        name: String,
        ingestion_uri: String,
        database: String,
        #[serde(default)]
        table_names: HashMap<String, String>,
        #[serde(default)]
        mapping: HashMap<String, String>,
    },
}

impl SinkSpec {
    pub fn name(&self) -> &str {
        match self {
            SinkSpec::Webhook { name, .. } => name,
            SinkSpec::Kafka { name, .. } => name,
            SinkSpec::Mqtt { name, .. } => name,
            SinkSpec::Analytics { name, .. } => name,
        }
    }
}

fn parse_security_protocol(value: &str) -> Result<SecurityProtocol, CdcError> {
    match value {
        "sasl_ssl" => Ok(SecurityProtocol::SaslSsl),
        "plaintext" => Ok(SecurityProtocol::Plaintext),
        other => Err(CdcError::ConfigurationError(format!("unknown Kafka security_protocol '{other}'"))),
    }
}

fn parse_sasl_mechanism(value: &str) -> Result<SaslMechanism, CdcError> {
    match value {
        "plain" => Ok(SaslMechanism::Plain),
        "oauthbearer" => Ok(SaslMechanism::OAuthBearer),
        other => Err(CdcError::ConfigurationError(format!("unknown Kafka sasl_mechanism '{other}'"))),
    }
}

fn parse_mqtt_protocol_version(value: &str) -> Result<MqttProtocolVersion, CdcError> {
    match value {
        "3.1.0" => Ok(MqttProtocolVersion::V3_1_0),
        "3.1.1" => Ok(MqttProtocolVersion::V3_1_1),
        "5.0.0" => Ok(MqttProtocolVersion::V5_0_0),
        other => Err(CdcError::ConfigurationError(format!("unknown MQTT protocol_version '{other}'"))),
    }
}

/// Builds one sink behind its `ResilientSink` retry/DLQ wrapper and erases
/// it to `Arc<dyn DispatchSink>` so the router can hold a heterogeneous
/// registry (§4.3).
fn build_one(spec: SinkSpec, dlq: Arc<dyn DlqWriter>) -> Result<Arc<dyn DispatchSink>, CdcError> {
    match spec {
        SinkSpec::Webhook { name, url, auth } => {
            let auth = match auth {
                WebhookAuthSpec::None => WebhookAuth::None,
                WebhookAuthSpec::Basic { username, password } => WebhookAuth::Basic { username, password },
                WebhookAuthSpec::Bearer { token } => WebhookAuth::Bearer { token },
                WebhookAuthSpec::OAuth(spec) => WebhookAuth::OAuth { provider: spec.into_provider() },
            };
            let sink = WebhookSink::new(WebhookOptions { name, url }, auth);
            Ok(Arc::new(ResilientSink::new(sink, dlq)))
        }
        SinkSpec::Kafka { name, brokers, topic, security_protocol, sasl_mechanism, credentials } => {
            let credentials = match credentials {
                KafkaCredentialsSpec::Password { username, password } => {
                    KafkaCredentials::Password { username, password }
                }
                KafkaCredentialsSpec::OAuth(spec) => KafkaCredentials::OAuth { provider: spec.into_provider() },
            };
            let options = KafkaOptions {
                name,
                brokers,
                topic,
                security_protocol: parse_security_protocol(&security_protocol)?,
                sasl_mechanism: parse_sasl_mechanism(&sasl_mechanism)?,
            };
            let sink = KafkaSink::new(options, credentials)?;
            Ok(Arc::new(ResilientSink::new(sink, dlq)))
        }
        SinkSpec::Mqtt { name, host, port, client_id, topic, protocol_version, credentials } => {
            let credentials = match credentials {
                MqttCredentialsSpec::None => MqttCredentials::None,
                MqttCredentialsSpec::Password { username, password } => {
                    MqttCredentials::Password { username, password }
                }
                MqttCredentialsSpec::OAuth(spec) => MqttCredentials::OAuth { provider: spec.into_provider() },
            };
            let options = MqttSinkOptions {
                name,
                host,
                port,
                client_id,
                topic,
                protocol_version: parse_mqtt_protocol_version(&protocol_version)?,
            };
            let sink = MqttSink::new(options, credentials);
            Ok(Arc::new(ResilientSink::new(sink, dlq)))
        }
        SinkSpec::Analytics { name, ingestion_uri, database, table_names, mapping } => {
            let sink = AnalyticsSink::new(AnalyticsOptions { name, ingestion_uri, database, table_names, mapping });
            Ok(Arc::new(ResilientSink::new(sink, dlq)))
        }
    }
}

/// Builds the full sink registry keyed by sink name, the map the router
/// dispatches through (§4.7 step 3).
pub fn build_sinks(
    specs: Vec<SinkSpec>,
    dlq: Arc<dyn DlqWriter>,
) -> Result<HashMap<String, Arc<dyn DispatchSink>>, CdcError> {
    let mut sinks = HashMap::with_capacity(specs.len());
    for spec in specs {
        let name = spec.name().to_string();
        sinks.insert(name, build_one(spec, dlq.clone())?);
    }
    Ok(sinks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_sink_spec_parses_from_json() {
        let json = serde_json::json!({
            "kind": "webhook",
            "name": "erp-webhook",
            "url": "https://example.com/events",
            "auth": { "type": "bearer", "token": "secret" }
        });
        let spec: SinkSpec = serde_json::from_value(json).unwrap();
        assert_eq!(spec.name(), "erp-webhook");
    }

    #[test]
    fn webhook_oauth_auth_flattens_the_shared_oauth_fields() {
        let json = serde_json::json!({
            "kind": "webhook",
            "name": "erp-webhook",
            "url": "https://example.com/events",
            "auth": {
                "type": "oauth",
                "token_endpoint": "https://login/oauth/token",
                "client_id": "id",
                "client_secret": "secret"
            }
        });
        let spec: SinkSpec = serde_json::from_value(json).unwrap();
        match spec {
            SinkSpec::Webhook { auth: WebhookAuthSpec::OAuth(oauth), .. } => {
                assert_eq!(oauth.token_endpoint, "https://login/oauth/token");
            }
            _ => panic!("expected webhook sink with oauth auth"),
        }
    }

    #[test]
    fn kafka_security_protocol_rejects_unknown_values() {
        assert!(parse_security_protocol("tls").is_err());
        assert!(parse_security_protocol("sasl_ssl").is_ok());
    }
}
