use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{StatusCode, Url};
use serde_json::Value;
use tracing::{debug, warn};

pub mod token;

use token::{ACCOUNTS_URL, SpotifyTokenTracker};

use crate::{
    common::errors::{PlayerError, PlayerResult},
    configs::SpotifyConfig,
    sources::plugin::{CatalogPlatform, CatalogTrack},
};

pub const API_URL: &str = "https://api.spotify.com";

const HOSTS: &[&str] = &["open.spotify.com", "play.spotify.com", "spotify.com"];

/// Spotify Web API catalog. Spotify cannot stream, so every result is
/// re-searched on a streamable platform.
pub struct SpotifyCatalog {
    client: reqwest::Client,
    api_url: String,
    market: String,
    path_regex: Regex,
    tokens: SpotifyTokenTracker,
}

impl SpotifyCatalog {
    pub fn new(config: &SpotifyConfig, timeout: Duration) -> PlayerResult<Self> {
        Self::with_endpoints(config, timeout, API_URL, ACCOUNTS_URL)
    }

    pub fn with_endpoints(
        config: &SpotifyConfig,
        timeout: Duration,
        api_url: &str,
        accounts_url: &str,
    ) -> PlayerResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let path_regex =
            Regex::new(r"^/(?:intl-[a-z]{2}/)?(track|album|playlist|artist)/([a-zA-Z0-9]+)")
                .map_err(|e| PlayerError::Internal(e.to_string()))?;

        Ok(Self {
            tokens: SpotifyTokenTracker::new(
                client.clone(),
                accounts_url,
                &config.client_id,
                &config.client_secret,
            ),
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            market: config.market.clone(),
            path_regex,
        })
    }

    /// GET against the Web API. An expired or revoked token is replaced
    /// once before giving up.
    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> PlayerResult<Value> {
        let url = format!("{}{}", self.api_url, path);
        let mut retried = false;

        loop {
            let token = self.tokens.get_token().await?;
            let resp = self
                .client
                .get(&url)
                .bearer_auth(&token)
                .query(query)
                .send()
                .await?;

            match resp.status() {
                StatusCode::UNAUTHORIZED if !retried => {
                    debug!("Spotify token rejected, re-authenticating");
                    self.tokens.invalidate().await;
                    retried = true;
                }
                StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => {
                    return Err(PlayerError::TrackSearchFailed);
                }
                status if status.is_success() => return Ok(resp.json().await?),
                status => {
                    warn!(path, %status, "Spotify API request failed");
                    return Err(PlayerError::Platform(format!(
                        "spotify returned {} for {}",
                        status, path
                    )));
                }
            }
        }
    }

    async fn track(&self, id: &str) -> PlayerResult<CatalogTrack> {
        let body = self
            .get_json(&format!("/v1/tracks/{}", id), &[("market", &self.market)])
            .await?;
        parse_track(&body).ok_or(PlayerError::TrackSearchFailed)
    }
}

fn parse_track(item: &Value) -> Option<CatalogTrack> {
    let name = item.get("name")?.as_str()?.to_string();
    let artists = item
        .get("artists")
        .and_then(|a| a.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|a| a.get("name").and_then(|n| n.as_str()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Some(CatalogTrack { name, artists })
}

#[async_trait]
impl CatalogPlatform for SpotifyCatalog {
    fn name(&self) -> &'static str {
        "spotify"
    }

    fn handles_host(&self, host: &str) -> bool {
        HOSTS.contains(&host)
    }

    async fn search_url(&self, url: &Url) -> PlayerResult<Vec<CatalogTrack>> {
        let caps = self
            .path_regex
            .captures(url.path())
            .ok_or(PlayerError::TrackSearchFailed)?;

        match (caps.get(1).map(|m| m.as_str()), caps.get(2)) {
            (Some("track"), Some(id)) => Ok(vec![self.track(id.as_str()).await?]),
            (Some("playlist" | "album"), _) => Err(PlayerError::SpotifyPlaylistsNotSupported),
            _ => Err(PlayerError::TrackSearchFailed),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use axum::{
        Json, Router,
        http::{HeaderMap, StatusCode},
        routing::{get, post},
    };
    use serde_json::json;

    use super::*;

    fn config() -> SpotifyConfig {
        SpotifyConfig {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            market: "US".to_string(),
        }
    }

    /// Fake accounts + Web API. The first token handed out is rejected by
    /// the tracks endpoint.
    async fn fake_spotify(token_requests: Arc<AtomicU32>) -> String {
        let issued = token_requests.clone();
        let app = Router::new()
            .route(
                "/api/token",
                post(move || {
                    let n = issued.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        Json(json!({
                            "access_token": format!("token-{}", n),
                            "token_type": "Bearer",
                            "expires_in": 3600
                        }))
                    }
                }),
            )
            .route(
                "/v1/tracks/{id}",
                get(|headers: HeaderMap| async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default();
                    if auth == "Bearer token-1" {
                        return (StatusCode::UNAUTHORIZED, Json(json!({})));
                    }
                    (
                        StatusCode::OK,
                        Json(json!({
                            "name": "Bohemian Rhapsody",
                            "artists": [{ "name": "Queen" }]
                        })),
                    )
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_track_link_reauthenticates_once() {
        let token_requests = Arc::new(AtomicU32::new(0));
        let base = fake_spotify(token_requests.clone()).await;
        let spotify =
            SpotifyCatalog::with_endpoints(&config(), Duration::from_secs(5), &base, &base)
                .unwrap();

        let url = Url::parse("https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC").unwrap();
        let tracks = spotify.search_url(&url).await.unwrap();

        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].search_query(), "Queen Bohemian Rhapsody");
        assert_eq!(token_requests.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_collections_are_rejected_without_requests() {
        let spotify = SpotifyCatalog::with_endpoints(
            &config(),
            Duration::from_secs(1),
            "http://127.0.0.1:9",
            "http://127.0.0.1:9",
        )
        .unwrap();

        for link in [
            "https://open.spotify.com/playlist/37i9dQZF1DXcBWIGoYBM5M",
            "https://open.spotify.com/intl-de/album/1GbtB4zTqAsyfZEsm1RZfx",
        ] {
            let err = spotify
                .search_url(&Url::parse(link).unwrap())
                .await
                .unwrap_err();
            assert!(matches!(err, PlayerError::SpotifyPlaylistsNotSupported));
        }

        let err = spotify
            .search_url(&Url::parse("https://open.spotify.com/user/someone").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, PlayerError::TrackSearchFailed));
    }
}
