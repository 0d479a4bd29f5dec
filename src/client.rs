//! Typed client for the HTTP command surface.
//!
//! Failure envelopes are decoded back into the matching [`PlayerError`]
//! variant through their `error_code`, so callers can match on errors the
//! same way the server produced them.

use std::time::Duration;

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::{
    common::{
        errors::{ErrorBody, PlayerError, PlayerResult},
        types::GuildId,
    },
    handler::{AddTrackRequest, QueueSummary, Reply, VersionInfo},
    player::{Track, TrackData},
    voice::VoiceCredentials,
};

pub struct PlayerClient {
    http: reqwest::Client,
    base_url: String,
    password: Option<String>,
}

impl PlayerClient {
    pub fn new(base_url: impl Into<String>, password: Option<String>) -> PlayerResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            password,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let req = self
            .http
            .request(method, format!("{}{}", self.base_url, path));
        match &self.password {
            Some(password) => req.header("Authorization", password),
            None => req,
        }
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> PlayerResult<Reply<T>> {
        let res = req.send().await?;
        let status = res.status();
        let body = res.bytes().await?;

        if status.is_success() {
            return Ok(serde_json::from_slice(&body)?);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(PlayerError::Unauthorized);
        }

        match serde_json::from_slice::<ErrorBody>(&body) {
            Ok(err) => Err(PlayerError::from_wire(err.error_code, err.error)),
            Err(_) => Err(PlayerError::Internal(format!(
                "unexpected {} response",
                status
            ))),
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> PlayerResult<Reply<T>> {
        self.send(self.request(Method::GET, path)).await
    }

    async fn put<T: DeserializeOwned>(&self, path: &str) -> PlayerResult<Reply<T>> {
        self.send(self.request(Method::PUT, path)).await
    }

    async fn delete<T: DeserializeOwned>(&self, path: &str) -> PlayerResult<Reply<T>> {
        self.send(self.request(Method::DELETE, path)).await
    }

    async fn with_json<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> PlayerResult<Reply<T>> {
        self.send(self.request(method, path).json(body)).await
    }

    pub async fn search(&self, query: &str) -> PlayerResult<Reply<Vec<TrackData>>> {
        self.send(
            self.request(Method::GET, "/track/search")
                .query(&[("query", query)]),
        )
        .await
    }

    pub async fn current(&self, guild_id: GuildId) -> PlayerResult<Reply<Track>> {
        self.get(&format!("/guild/{}/track", guild_id)).await
    }

    pub async fn track(&self, guild_id: GuildId, track_id: Uuid) -> PlayerResult<Reply<Track>> {
        self.get(&format!("/guild/{}/track/{}", guild_id, track_id))
            .await
    }

    pub async fn tracks(
        &self,
        guild_id: GuildId,
        offset: usize,
        limit: Option<usize>,
    ) -> PlayerResult<Reply<Vec<Track>>> {
        let mut req = self
            .request(Method::GET, &format!("/guild/{}/tracks", guild_id))
            .query(&[("offset", offset)]);
        if let Some(limit) = limit {
            req = req.query(&[("limit", limit)]);
        }
        self.send(req).await
    }

    pub async fn queue(&self, guild_id: GuildId) -> PlayerResult<Reply<QueueSummary>> {
        self.get(&format!("/guild/{}/queue", guild_id)).await
    }

    pub async fn add_tracks(
        &self,
        guild_id: GuildId,
        req: &AddTrackRequest,
    ) -> PlayerResult<Reply<Vec<Track>>> {
        self.with_json(Method::POST, &format!("/guild/{}/track", guild_id), req)
            .await
    }

    pub async fn skip(&self, guild_id: GuildId) -> PlayerResult<Reply<Track>> {
        self.put(&format!("/guild/{}/skip", guild_id)).await
    }

    pub async fn pause(&self, guild_id: GuildId) -> PlayerResult<Reply<()>> {
        self.put(&format!("/guild/{}/pause", guild_id)).await
    }

    pub async fn unpause(&self, guild_id: GuildId) -> PlayerResult<Reply<()>> {
        self.put(&format!("/guild/{}/unpause", guild_id)).await
    }

    pub async fn set_loop(&self, guild_id: GuildId, enable: bool) -> PlayerResult<Reply<bool>> {
        self.put(&format!("/guild/{}/loop?enable={}", guild_id, enable))
            .await
    }

    pub async fn set_volume(&self, guild_id: GuildId, volume: u8) -> PlayerResult<Reply<u8>> {
        self.put(&format!("/guild/{}/volume?volume={}", guild_id, volume))
            .await
    }

    pub async fn stop(&self, guild_id: GuildId) -> PlayerResult<Reply<()>> {
        self.delete(&format!("/guild/{}", guild_id)).await
    }

    pub async fn remove_track(
        &self,
        guild_id: GuildId,
        track_id: Uuid,
    ) -> PlayerResult<Reply<Track>> {
        self.delete(&format!("/guild/{}/track/{}", guild_id, track_id))
            .await
    }

    pub async fn remove_at(&self, guild_id: GuildId, position: usize) -> PlayerResult<Reply<Track>> {
        self.delete(&format!("/guild/{}/queue/{}", guild_id, position))
            .await
    }

    pub async fn set_voice(
        &self,
        guild_id: GuildId,
        credentials: &VoiceCredentials,
    ) -> PlayerResult<Reply<()>> {
        self.with_json(
            Method::PUT,
            &format!("/guild/{}/voice", guild_id),
            credentials,
        )
        .await
    }

    pub async fn version(&self) -> PlayerResult<Reply<VersionInfo>> {
        self.get("/version").await
    }
}
