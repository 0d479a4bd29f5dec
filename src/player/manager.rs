use std::{panic::AssertUnwindSafe, sync::Arc};

use dashmap::DashMap;
use futures::FutureExt;
use tracing::{error, info, warn};

use super::{
    GuildPlayer, Notification, NotificationKind, Track,
    playback::{PlaybackContext, PlaybackJob},
};
use crate::common::{
    errors::{PlayerError, PlayerResult},
    types::{ChannelId, GuildId},
};

/// Registry of active guild players.
///
/// A player is created with its playback job on the first enqueue for a
/// guild and removed once that job exits.
pub struct PlayerManager {
    players: Arc<DashMap<GuildId, Arc<GuildPlayer>>>,
    ctx: Arc<PlaybackContext>,
}

impl PlayerManager {
    pub fn new(ctx: Arc<PlaybackContext>) -> Self {
        Self {
            players: Arc::new(DashMap::new()),
            ctx,
        }
    }

    /// The live player of `guild_id`, if any.
    pub fn get(&self, guild_id: GuildId) -> Option<Arc<GuildPlayer>> {
        self.players
            .get(&guild_id)
            .map(|p| p.value().clone())
            .filter(|p| !p.is_closed())
    }

    pub fn require(&self, guild_id: GuildId) -> PlayerResult<Arc<GuildPlayer>> {
        self.get(guild_id).ok_or(PlayerError::NoActivePlayer)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Queues `tracks`, creating the player and starting playback in
    /// `voice_channel` if the guild has none. `message_channel` is where
    /// notifications for the guild go from now on.
    pub fn enqueue(
        &self,
        guild_id: GuildId,
        voice_channel: ChannelId,
        message_channel: Option<ChannelId>,
        mut tracks: Vec<Track>,
    ) -> Arc<GuildPlayer> {
        loop {
            let mut created = None;
            let player = self
                .players
                .entry(guild_id)
                .or_insert_with(|| {
                    let (player, signals) = GuildPlayer::new(
                        guild_id,
                        voice_channel,
                        self.ctx.player.default_volume,
                    );
                    created = Some(signals);
                    Arc::new(player)
                })
                .clone();

            match player.add_tracks(tracks) {
                Ok(()) => {
                    if let Some(channel) = message_channel {
                        player.set_message_channel(channel);
                    }
                    if let Some(signals) = created {
                        info!(%guild_id, %voice_channel, "Created guild player");
                        self.spawn_job(player.clone(), signals);
                    }
                    return player;
                }
                Err(rejected) => {
                    // job is winding down; replace the player
                    tracks = rejected;
                    self.players
                        .remove_if(&guild_id, |_, p| Arc::ptr_eq(p, &player));
                }
            }
        }
    }

    /// Stops the guild's playback. Deregistration follows when the job exits.
    pub async fn stop(&self, guild_id: GuildId) -> PlayerResult<()> {
        self.require(guild_id)?.stop().await
    }

    /// Stops every guild.
    pub async fn shutdown(&self) {
        let players: Vec<_> = self.players.iter().map(|p| p.value().clone()).collect();
        for player in players {
            if let Err(e) = player.stop().await {
                warn!(guild_id = %player.guild_id(), "Stop during shutdown failed: {}", e);
            }
        }
    }

    fn spawn_job(&self, player: Arc<GuildPlayer>, signals: flume::Receiver<super::Interrupt>) {
        let players = self.players.clone();
        let ctx = self.ctx.clone();
        let job = PlaybackJob::new(self.ctx.clone(), player.clone(), signals);

        tokio::spawn(async move {
            let guild_id = player.guild_id();
            match AssertUnwindSafe(job.run()).catch_unwind().await {
                Ok(Ok(end)) => info!(%guild_id, ?end, "Stopped queue"),
                Ok(Err(e)) => warn!(
                    %guild_id,
                    error = %e,
                    code = ?e.code(),
                    "Stopped queue after fatal error"
                ),
                Err(_) => {
                    error!(%guild_id, "Playback job panicked");
                    // the job unwound before it could announce the end itself
                    if let Some(channel_id) = player.message_channel() {
                        ctx.notifier.send(Notification {
                            kind: NotificationKind::QueueEnded,
                            guild_id,
                            channel_id,
                            track: None,
                        });
                    }
                }
            }

            player.close();
            players.remove_if(&guild_id, |_, p| Arc::ptr_eq(p, &player));
        });
    }
}
