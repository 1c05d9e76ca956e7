//! Shared OAuth 2.0 client-credentials token cache, used by the webhook and
//! MQTT sinks (§4.4, §6). Caches the token until 1 minute before expiry and
//! refreshes under a single-flight lock so concurrent senders don't each
//! fire their own token request.

use cdc_core::CdcError;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub token_endpoint: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: Option<String>,
    /// Present for Kafka's Azure AD-style flow; absent elsewhere.
    pub tenant_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Refreshes 1 minute before the token provider's reported expiry.
const EXPIRY_SAFETY_MARGIN: Duration = Duration::from_secs(60);

pub struct OAuthTokenProvider {
    config: OAuthConfig,
    http: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl OAuthTokenProvider {
    pub fn new(config: OAuthConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            http: reqwest::Client::new(),
            cached: Mutex::new(None),
        })
    }

    /// Returns a valid token, refreshing it under the lock if the cached one
    /// is absent or within the safety margin of expiry. Concurrent callers
    /// serialize on the same lock, so only one refresh request is ever
    /// in-flight.
    pub async fn token(&self) -> Result<String, CdcError> {
        let mut guard = self.cached.lock().await;
        if let Some(cached) = guard.as_ref() {
            if cached.expires_at > Instant::now() {
                return Ok(cached.access_token.clone());
            }
        }
        let fetched = self.fetch().await?;
        let access_token = fetched.access_token.clone();
        *guard = Some(fetched);
        Ok(access_token)
    }

    async fn fetch(&self) -> Result<CachedToken, CdcError> {
        let mut form = vec![
            ("grant_type", "client_credentials".to_string()),
            ("client_id", self.config.client_id.clone()),
            ("client_secret", self.config.client_secret.clone()),
        ];
        if let Some(scope) = &self.config.scope {
            form.push(("scope", scope.clone()));
        }
        let response = self
            .http
            .post(&self.config.token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| CdcError::connection_error(format!("oauth token request: {e}")))?;
        if !response.status().is_success() {
            return Err(CdcError::connection_error(format!(
                "oauth token endpoint returned {}",
                response.status()
            )));
        }
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| CdcError::internal(format!("oauth token response: {e}")))?;
        let ttl = Duration::from_secs(body.expires_in).saturating_sub(EXPIRY_SAFETY_MARGIN);
        Ok(CachedToken {
            access_token: body.access_token,
            expires_at: Instant::now() + ttl,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> OAuthConfig {
        OAuthConfig {
            token_endpoint: "https://example.invalid/token".to_string(),
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            scope: None,
            tenant_id: None,
        }
    }

    #[tokio::test]
    async fn token_request_failure_against_unreachable_host_is_connection_error() {
        let provider = OAuthTokenProvider::new(config());
        let result = provider.token().await;
        assert!(matches!(result, Err(CdcError::ConnectionError { .. })));
    }
}
