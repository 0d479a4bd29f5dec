//! Transport-agnostic command operations.
//!
//! Every operation returns a [`Reply`] on success; failures are plain
//! [`PlayerError`]s whose [`ErrorCode`](crate::common::errors::ErrorCode)
//! the transport renders into the failure envelope.

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    common::{
        errors::{PlayerError, PlayerResult},
        types::{ChannelId, GuildId, UserId},
        utils::duration_ms,
    },
    player::{PlayerManager, Track, TrackData},
    sources::TrackFetcher,
    voice::{VoiceCredentials, VoiceRegistry},
};

/// Success envelope: `{ "message": "...", "changed": bool, "data": ... }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply<T> {
    pub message: String,
    pub changed: bool,
    pub data: Option<T>,
}

impl<T> Reply<T> {
    fn new(message: impl Into<String>, changed: bool, data: Option<T>) -> Self {
        Self {
            message: message.into(),
            changed,
            data,
        }
    }
}

/// Body of an enqueue request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddTrackRequest {
    pub user_id: UserId,
    /// Voice channel to play in.
    pub channel_id: ChannelId,
    /// Text channel notifications go to.
    pub text_channel_id: ChannelId,
    pub data: Vec<TrackData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSummary {
    pub total_size: usize,
    #[serde(with = "duration_ms")]
    pub total_duration: Duration,
    pub playing: Option<Track>,
    pub tracks: Vec<Track>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub commit: String,
    pub branch: String,
    pub build_time: u64,
    pub active_players: usize,
}

pub struct CommandHandler {
    manager: Arc<PlayerManager>,
    fetcher: Arc<TrackFetcher>,
    voice: Arc<VoiceRegistry>,
}

impl CommandHandler {
    pub fn new(
        manager: Arc<PlayerManager>,
        fetcher: Arc<TrackFetcher>,
        voice: Arc<VoiceRegistry>,
    ) -> Self {
        Self {
            manager,
            fetcher,
            voice,
        }
    }

    pub async fn search(&self, query: &str) -> PlayerResult<Reply<Vec<TrackData>>> {
        let tracks = self.fetcher.search(query).await?;
        Ok(Reply::new("track found", false, Some(tracks)))
    }

    /// The playing track; `data` is null while the player waits for tracks.
    pub fn get_current(&self, guild_id: GuildId) -> PlayerResult<Reply<Track>> {
        let player = self.manager.require(guild_id)?;
        Ok(match player.get_current() {
            Some(track) => Reply::new("found track", false, Some(track)),
            None => Reply::new("nothing playing", false, None),
        })
    }

    pub fn get_by_id(&self, guild_id: GuildId, id: Uuid) -> PlayerResult<Reply<Track>> {
        let track = self
            .manager
            .require(guild_id)?
            .get_by_id(id)
            .ok_or(PlayerError::TrackNotFoundInQueue)?;
        Ok(Reply::new("found track", false, Some(track)))
    }

    /// Queued tracks; empty when the guild is idle.
    pub fn list_queue(
        &self,
        guild_id: GuildId,
        offset: usize,
        limit: Option<usize>,
    ) -> Reply<Vec<Track>> {
        let tracks = self
            .manager
            .get(guild_id)
            .map(|p| p.get_queue(offset, limit))
            .unwrap_or_default();
        Reply::new(format!("{} tracks in queue", tracks.len()), false, Some(tracks))
    }

    pub fn queue_summary(&self, guild_id: GuildId) -> Reply<QueueSummary> {
        let summary = match self.manager.get(guild_id) {
            Some(player) => QueueSummary {
                total_size: player.queue_len(),
                total_duration: player.queue_duration(),
                playing: player.get_current(),
                tracks: player.get_queue(0, None),
            },
            None => QueueSummary {
                total_size: 0,
                total_duration: Duration::ZERO,
                playing: None,
                tracks: Vec::new(),
            },
        };
        Reply::new(
            format!("{} tracks in queue", summary.total_size),
            false,
            Some(summary),
        )
    }

    /// Queues resolved tracks, starting a player if the guild has none.
    pub fn add_track(
        &self,
        guild_id: GuildId,
        req: AddTrackRequest,
    ) -> PlayerResult<Reply<Vec<Track>>> {
        if guild_id.get() == 0
            || req.user_id.get() == 0
            || req.channel_id.get() == 0
            || req.text_channel_id.get() == 0
        {
            return Err(PlayerError::BadRequest(
                "guild, user and channel ids must be set".into(),
            ));
        }
        if req.data.is_empty() {
            return Err(PlayerError::BadRequest("no tracks given".into()));
        }

        let tracks: Vec<Track> = req
            .data
            .into_iter()
            .map(|data| Track::new(req.user_id, req.channel_id, data))
            .collect();
        let count = tracks.len();

        self.manager.enqueue(
            guild_id,
            req.channel_id,
            Some(req.text_channel_id),
            tracks.clone(),
        );
        info!(%guild_id, user_id = %req.user_id, count, "Queued tracks");

        let message = if count == 1 {
            "added track to queue".to_string()
        } else {
            format!("added {} tracks to queue", count)
        };
        Ok(Reply::new(message, true, Some(tracks)))
    }

    pub async fn skip(&self, guild_id: GuildId) -> PlayerResult<Reply<Track>> {
        let skipped = self.manager.require(guild_id)?.skip().await?;
        Ok(match skipped {
            Some(track) => Reply::new("skipped track", true, Some(track)),
            None => Reply::new("nothing to skip", false, None),
        })
    }

    pub async fn pause(&self, guild_id: GuildId) -> PlayerResult<Reply<()>> {
        let changed = self.manager.require(guild_id)?.pause().await?;
        let message = if changed {
            "paused queue"
        } else {
            "queue already paused"
        };
        Ok(Reply::new(message, changed, None))
    }

    pub async fn unpause(&self, guild_id: GuildId) -> PlayerResult<Reply<()>> {
        let changed = self.manager.require(guild_id)?.unpause().await?;
        let message = if changed {
            "unpaused queue"
        } else {
            "queue is not paused"
        };
        Ok(Reply::new(message, changed, None))
    }

    pub fn set_loop(&self, guild_id: GuildId, enable: bool) -> PlayerResult<Reply<bool>> {
        let changed = self.manager.require(guild_id)?.set_loop(enable);
        let message = match (enable, changed) {
            (true, true) => "loop enabled",
            (false, true) => "loop disabled",
            (true, false) => "loop already enabled",
            (false, false) => "loop already disabled",
        };
        Ok(Reply::new(message, changed, Some(enable)))
    }

    pub fn set_volume(&self, guild_id: GuildId, volume: u8) -> PlayerResult<Reply<u8>> {
        let previous = self.manager.require(guild_id)?.set_volume(volume);
        Ok(Reply::new(
            format!("volume set from {} to {}", previous, volume),
            previous != volume,
            Some(volume),
        ))
    }

    pub async fn stop(&self, guild_id: GuildId) -> PlayerResult<Reply<()>> {
        self.manager.stop(guild_id).await?;
        info!(%guild_id, "Queue stopped on request");
        Ok(Reply::new("queue stopped", true, None))
    }

    pub async fn remove_track(&self, guild_id: GuildId, id: Uuid) -> PlayerResult<Reply<Track>> {
        let removed = self.manager.require(guild_id)?.remove_track(id).await?;
        Ok(Reply::new("track removed", true, Some(removed.into_track())))
    }

    pub fn remove_at(&self, guild_id: GuildId, position: usize) -> PlayerResult<Reply<Track>> {
        let track = self.manager.require(guild_id)?.remove_at(position)?;
        Ok(Reply::new("track removed", true, Some(track)))
    }

    pub fn set_voice(&self, guild_id: GuildId, credentials: VoiceCredentials) -> Reply<()> {
        self.voice.update(guild_id, credentials);
        Reply::new("voice credentials updated", true, None)
    }

    pub fn version(&self) -> Reply<VersionInfo> {
        let info = VersionInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            commit: option_env!("GIT_COMMIT").unwrap_or("unknown").to_string(),
            branch: option_env!("GIT_BRANCH").unwrap_or("unknown").to_string(),
            build_time: option_env!("BUILD_TIME")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            active_players: self.manager.len(),
        };
        Reply::new("success", false, Some(info))
    }
}
