//! Outbound voice delivery.
//!
//! The playback job only needs two things from a voice backend: joining a
//! channel and a bounded sink for Opus frames. A sink that stays full for
//! longer than the send timeout, or that is closed, means the connection
//! is gone.
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

pub mod discord;
pub mod gateway;
pub mod udp;

pub use discord::DiscordVoiceTransport;

use crate::common::{
    errors::{PlayerError, PlayerResult},
    types::{ChannelId, GuildId},
};

/// A live voice connection owned by one playback job.
#[async_trait]
pub trait VoiceConnection: Send + Sync {
    /// Sink for encoded frames. Its capacity bounds how far ahead of real
    /// time the playback job may run.
    fn frames(&self) -> &flume::Sender<Vec<u8>>;

    async fn disconnect(self: Box<Self>);
}

#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> PlayerResult<Box<dyn VoiceConnection>>;
}

/// Voice server credentials forwarded by the bot after it joins a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceCredentials {
    pub session_id: String,
    pub token: String,
    pub endpoint: String,
}

/// Latest voice credentials per guild. Joins wait here until the bot side
/// has delivered them.
#[derive(Default)]
pub struct VoiceRegistry {
    guilds: DashMap<GuildId, watch::Sender<Option<VoiceCredentials>>>,
}

impl VoiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, guild_id: GuildId, credentials: VoiceCredentials) {
        debug!(%guild_id, endpoint = %credentials.endpoint, "Voice credentials updated");
        self.guilds
            .entry(guild_id)
            .or_insert_with(|| watch::channel(None).0)
            .send_replace(Some(credentials));
    }

    pub fn get(&self, guild_id: GuildId) -> Option<VoiceCredentials> {
        self.guilds.get(&guild_id).and_then(|tx| tx.borrow().clone())
    }

    /// Forgets the credentials of a torn down connection so the next join
    /// waits for a fresh update. Newer credentials are kept.
    pub fn release(&self, guild_id: GuildId, used: &VoiceCredentials) {
        let removed = self
            .guilds
            .remove_if(&guild_id, |_, tx| tx.borrow().as_ref() == Some(used));
        if removed.is_some() {
            debug!(%guild_id, "Voice credentials released");
        }
    }

    /// Waits up to `timeout` for credentials of `guild_id`.
    pub async fn wait(&self, guild_id: GuildId, timeout: Duration) -> PlayerResult<VoiceCredentials> {
        let mut rx = self
            .guilds
            .entry(guild_id)
            .or_insert_with(|| watch::channel(None).0)
            .subscribe();

        let found = tokio::time::timeout(timeout, rx.wait_for(|c| c.is_some())).await;
        match found {
            Ok(Ok(creds)) => creds
                .clone()
                .ok_or_else(|| PlayerError::VoiceJoin("credentials vanished".to_string())),
            Ok(Err(_)) => Err(PlayerError::VoiceJoin(
                "voice credentials were withdrawn".to_string(),
            )),
            Err(_) => Err(PlayerError::VoiceJoin(format!(
                "no voice credentials for guild {} after {:?}",
                guild_id, timeout
            ))),
        }
    }
}
