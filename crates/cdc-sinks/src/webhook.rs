//! Webhook sink (§4.4): POSTs CloudEvents to an HTTP endpoint.

use crate::oauth::OAuthTokenProvider;
use crate::sink::Sink;
use async_trait::async_trait;
use base64::Engine;
use cdc_core::{CdcError, CloudEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum WebhookAuth {
    None,
    Basic { username: String, password: String },
    Bearer { token: String },
    OAuth { provider: Arc<OAuthTokenProvider> },
}

#[derive(Debug, Clone)]
pub struct WebhookOptions {
    pub name: String,
    pub url: String,
}

pub struct WebhookSink {
    name: String,
    url: String,
    auth: WebhookAuth,
    client: reqwest::Client,
    healthy: AtomicBool,
}

impl WebhookSink {
    pub fn new(options: WebhookOptions, auth: WebhookAuth) -> Self {
        Self {
            name: options.name,
            url: options.url,
            auth,
            client: reqwest::Client::new(),
            healthy: AtomicBool::new(true),
        }
    }

    async fn auth_header(&self) -> Result<Option<String>, CdcError> {
        match &self.auth {
            WebhookAuth::None => Ok(None),
            WebhookAuth::Basic { username, password } => {
                let encoded =
                    base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
                Ok(Some(format!("Basic {encoded}")))
            }
            WebhookAuth::Bearer { token } => Ok(Some(format!("Bearer {token}"))),
            WebhookAuth::OAuth { provider } => {
                let token = provider.token().await?;
                Ok(Some(format!("Bearer {token}")))
            }
        }
    }
}

#[async_trait]
impl Sink for WebhookSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    async fn send_batch(&self, events: &[CloudEvent]) -> Result<(), CdcError> {
        let header = self.auth_header().await?;
        let body = serde_json::to_vec(events)?;
        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/cloudevents+json")
            .body(body);
        if let Some(header) = header {
            request = request.header("Authorization", header);
        }
        let result = request.send().await;
        match result {
            Ok(response) if response.status().is_success() => {
                self.healthy.store(true, Ordering::SeqCst);
                Ok(())
            }
            Ok(response) => {
                self.healthy.store(false, Ordering::SeqCst);
                Err(CdcError::SinkTransient {
                    sink_name: self.name.clone(),
                    attempt: 1,
                    message: format!("webhook returned status {}", response.status()),
                })
            }
            Err(error) => {
                self.healthy.store(false, Ordering::SeqCst);
                Err(CdcError::SinkTransient {
                    sink_name: self.name.clone(),
                    attempt: 1,
                    message: error.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_event() -> CloudEvent {
        CloudEvent::new("src", "Konnektr.DigitalTwins.Twin.Create", "twin1", Utc::now(), json!({}))
    }

    #[tokio::test]
    async fn successful_post_marks_sink_healthy() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("Content-Type", "application/cloudevents+json"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let sink = WebhookSink::new(
            WebhookOptions { name: "webhook-main".to_string(), url: format!("{}/hook", server.uri()) },
            WebhookAuth::None,
        );
        sink.send_batch(&[sample_event()]).await.unwrap();
        assert!(sink.is_healthy());
    }

    #[tokio::test]
    async fn server_error_marks_sink_unhealthy_and_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).respond_with(ResponseTemplate::new(500)).mount(&server).await;
        let sink = WebhookSink::new(
            WebhookOptions { name: "webhook-main".to_string(), url: server.uri() },
            WebhookAuth::None,
        );
        let result = sink.send_batch(&[sample_event()]).await;
        assert!(result.is_err());
        assert!(!sink.is_healthy());
    }

    #[tokio::test]
    async fn basic_auth_sets_expected_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("Authorization", "Basic dXNlcjpwYXNz"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let sink = WebhookSink::new(
            WebhookOptions { name: "webhook-main".to_string(), url: server.uri() },
            WebhookAuth::Basic { username: "user".to_string(), password: "pass".to_string() },
        );
        sink.send_batch(&[sample_event()]).await.unwrap();
    }
}
