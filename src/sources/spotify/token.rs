use std::sync::Arc;

use base64::{Engine, prelude::BASE64_STANDARD};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, error};

use crate::common::{
    errors::{PlayerError, PlayerResult},
    types::SharedRw,
    utils::now_ms,
};

pub const ACCOUNTS_URL: &str = "https://accounts.spotify.com";

/// Tokens are refreshed this long before they actually expire.
const EXPIRY_MARGIN_MS: u64 = 5_000;

#[derive(Clone, Debug)]
pub struct SpotifyToken {
    pub access_token: String,
    pub expiry_ms: u64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Client-credentials token cache.
pub struct SpotifyTokenTracker {
    client: reqwest::Client,
    accounts_url: String,
    basic_auth: String,
    token: SharedRw<Option<SpotifyToken>>,
}

impl SpotifyTokenTracker {
    pub fn new(
        client: reqwest::Client,
        accounts_url: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Self {
        let basic_auth = BASE64_STANDARD.encode(format!("{}:{}", client_id, client_secret));
        Self {
            client,
            accounts_url: accounts_url.trim_end_matches('/').to_string(),
            basic_auth,
            token: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn get_token(&self) -> PlayerResult<String> {
        {
            let token_lock = self.token.read().await;
            if let Some(token) = &*token_lock {
                if token.expiry_ms > now_ms() + EXPIRY_MARGIN_MS {
                    return Ok(token.access_token.clone());
                }
            }
        }
        self.refresh_token().await
    }

    /// Drops the cached token so the next `get_token` re-authenticates.
    pub async fn invalidate(&self) {
        *self.token.write().await = None;
    }

    async fn refresh_token(&self) -> PlayerResult<String> {
        debug!("Requesting Spotify client credentials token");
        let resp = self
            .client
            .post(format!("{}/api/token", self.accounts_url))
            .header("Authorization", format!("Basic {}", self.basic_auth))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            error!("Spotify token endpoint returned status {}", status);
            return Err(PlayerError::Platform(format!(
                "spotify authentication failed with {}",
                status
            )));
        }

        let body: TokenResponse = resp.json().await?;
        let expiry_ms = now_ms() + body.expires_in.saturating_mul(1_000);

        let mut token_lock = self.token.write().await;
        *token_lock = Some(SpotifyToken {
            access_token: body.access_token.clone(),
            expiry_ms,
        });

        debug!("Successfully refreshed Spotify token. Expiry: {}", expiry_ms);
        Ok(body.access_token)
    }
}
