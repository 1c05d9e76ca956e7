//! C6: telemetry listener. Opens a plain connection, issues `LISTEN
//! <channel>`, and enqueues a `Telemetry` `EventData` for every valid
//! notification payload.

use cdc_core::config::ReplicationConfig;
use cdc_core::{CdcError, EventData, EventType};
use cdc_events::EventProducer;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_postgres::{AsyncMessage, NoTls};
use tokio_util::sync::CancellationToken;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct TelemetryPayload {
    #[serde(rename = "digitalTwinId")]
    digital_twin_id: String,
    #[serde(rename = "messageId")]
    message_id: String,
    #[serde(rename = "graphName")]
    graph_name: String,
    #[serde(rename = "eventType")]
    #[allow(dead_code)]
    event_type: Option<String>,
    timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "componentName")]
    #[allow(dead_code)]
    component_name: Option<String>,
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
}

pub struct TelemetryListener {
    config: ReplicationConfig,
    producer: EventProducer,
    healthy: Arc<AtomicBool>,
}

impl TelemetryListener {
    pub fn new(config: ReplicationConfig, producer: EventProducer) -> Self {
        Self { config, producer, healthy: Arc::new(AtomicBool::new(false)) }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    pub async fn run(&self, cancellation: CancellationToken) {
        while !cancellation.is_cancelled() {
            if let Err(error) = self.run_once(&cancellation).await {
                self.healthy.store(false, Ordering::SeqCst);
                tracing::warn!(error = %error, "telemetry listener connection lost, reconnecting");
                tokio::time::sleep(RECONNECT_DELAY).await;
            } else {
                return;
            }
        }
    }

    async fn run_once(&self, cancellation: &CancellationToken) -> Result<(), CdcError> {
        let (client, mut connection) = tokio_postgres::connect(&self.config.database_url, NoTls)
            .await
            .map_err(|e| CdcError::classify_io_message(&e.to_string()))?;

        client
            .batch_execute(&format!("LISTEN {}", self.config.notify_channel))
            .await
            .map_err(CdcError::from)?;
        self.healthy.store(true, Ordering::SeqCst);
        tracing::info!(channel = %self.config.notify_channel, "telemetry listener healthy");

        loop {
            tokio::select! {
                _ = cancellation.cancelled() => return Ok(()),
                message = futures_util::future::poll_fn(|cx| connection.poll_message(cx)) => {
                    match message {
                        Some(Ok(AsyncMessage::Notification(notification))) => {
                            self.handle_payload(notification.payload());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(error)) => return Err(CdcError::from(error)),
                        None => return Err(CdcError::connection_error("telemetry connection closed")),
                    }
                }
            }
        }
    }

    fn handle_payload(&self, payload: &str) {
        match serde_json::from_str::<TelemetryPayload>(payload) {
            Ok(parsed) => {
                let timestamp = parsed.timestamp.unwrap_or_else(Utc::now);
                let mut event = EventData::new(
                    &parsed.digital_twin_id,
                    &parsed.graph_name,
                    "telemetry",
                    EventType::Telemetry,
                    timestamp,
                );
                let mut data = parsed.rest;
                data.insert("digitalTwinId".to_string(), serde_json::json!(parsed.digital_twin_id));
                data.insert("messageId".to_string(), serde_json::json!(parsed.message_id));
                event.new_value = Some(data.into_iter().collect());
                let producer = self.producer.clone();
                tokio::spawn(async move {
                    let _ = producer.enqueue(event).await;
                });
            }
            Err(error) => {
                tracing::warn!(error = %error, payload, "dropping invalid telemetry notification payload");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ReplicationConfig {
        ReplicationConfig {
            database_url: "postgres://localhost/test".to_string(),
            publication_name: "age_pub".to_string(),
            slot_name: "age_slot".to_string(),
            notify_channel: "digitaltwins_telemetry".to_string(),
            source_uri: None,
        }
    }

    fn listener() -> TelemetryListener {
        let queue = cdc_events::EventQueue::new(8);
        TelemetryListener::new(config(), queue.sender())
    }

    #[test]
    fn valid_payload_parses_required_and_optional_fields() {
        let payload = r#"{"digitalTwinId":"twin1","messageId":"m1","graphName":"factory-a","componentName":"sensor-1"}"#;
        let parsed: TelemetryPayload = serde_json::from_str(payload).unwrap();
        assert_eq!(parsed.digital_twin_id, "twin1");
        assert_eq!(parsed.component_name.as_deref(), Some("sensor-1"));
    }

    #[test]
    fn missing_required_field_fails_to_parse() {
        let payload = r#"{"messageId":"m1","graphName":"factory-a"}"#;
        assert!(serde_json::from_str::<TelemetryPayload>(payload).is_err());
    }

    #[test]
    fn handle_payload_does_not_panic_on_garbage() {
        let listener = listener();
        listener.handle_payload("not json");
    }
}
