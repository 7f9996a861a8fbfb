use async_trait::async_trait;
use reqwest::StatusCode;

use super::traits::{OAuthProvider, TokenSet};
use crate::config::ProviderConfig;
use crate::error::ExchangeError;

pub const SMARTCAR_TOKEN_URL: &str = "https://auth.smartcar.com/oauth/token";

/// Smartcar OAuth 2.0 token endpoint.
///
/// Quirks:
/// - Token endpoint requires Basic auth (client_id:client_secret base64).
/// - Refresh tokens rotate: the old one is invalid once the exchange succeeds.
/// - Only HTTP 200 carries a token pair; every other status is an error body.
pub struct SmartcarProvider {
    client_id: String,
    client_secret: String,
    token_url: String,
    http: reqwest::Client,
}

impl SmartcarProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ExchangeError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(ExchangeError::Transport)?;

        Ok(Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            token_url: config.token_url.clone(),
            http,
        })
    }
}

#[async_trait]
impl OAuthProvider for SmartcarProvider {
    fn id(&self) -> &str {
        "smartcar"
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, ExchangeError> {
        let resp = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(ExchangeError::Transport)?;

        let status = resp.status();
        let body = resp.text().await.map_err(ExchangeError::Transport)?;

        if status != StatusCode::OK {
            return Err(ExchangeError::AuthServer {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(ExchangeError::Decode)
    }
}
