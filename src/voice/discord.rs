use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    VoiceConnection, VoiceCredentials, VoiceRegistry, VoiceTransport, gateway::VoiceGateway,
};
use crate::common::{
    errors::{PlayerError, PlayerResult},
    types::{ChannelId, GuildId, UserId},
};

/// Frames buffered between the playback job and the 20 ms pacer.
const FRAME_BUFFER: usize = 8;

/// Voice over Discord's voice gateway, using credentials the bot forwards
/// through [`VoiceRegistry`].
pub struct DiscordVoiceTransport {
    registry: Arc<VoiceRegistry>,
    user_id: UserId,
    join_timeout: Duration,
}

impl DiscordVoiceTransport {
    pub fn new(registry: Arc<VoiceRegistry>, user_id: UserId, join_timeout: Duration) -> Self {
        Self {
            registry,
            user_id,
            join_timeout,
        }
    }
}

struct DiscordConnection {
    guild_id: GuildId,
    frames: flume::Sender<Vec<u8>>,
    cancel: CancellationToken,
    registry: Arc<VoiceRegistry>,
    credentials: VoiceCredentials,
}

#[async_trait]
impl VoiceConnection for DiscordConnection {
    fn frames(&self) -> &flume::Sender<Vec<u8>> {
        &self.frames
    }

    async fn disconnect(self: Box<Self>) {
        debug!(guild_id = %self.guild_id, "Closing voice connection");
        self.cancel.cancel();
    }
}

impl Drop for DiscordConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
        // the voice session dies with the gateway, so its token is spent
        self.registry.release(self.guild_id, &self.credentials);
    }
}

#[async_trait]
impl VoiceTransport for DiscordVoiceTransport {
    async fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> PlayerResult<Box<dyn VoiceConnection>> {
        let deadline = tokio::time::Instant::now() + self.join_timeout;
        let credentials = self.registry.wait(guild_id, self.join_timeout).await?;
        debug!(%guild_id, %channel_id, "Joining voice channel");

        let (tx, rx) = flume::bounded(FRAME_BUFFER);
        let (ready_tx, ready_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        let gateway = VoiceGateway::new(
            guild_id,
            self.user_id,
            credentials.clone(),
            cancel.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = gateway.run(rx, ready_tx).await {
                warn!(%guild_id, "Voice gateway ended with error: {}", e);
            }
        });

        match tokio::time::timeout_at(deadline, ready_rx).await {
            Ok(Ok(())) => Ok(Box::new(DiscordConnection {
                guild_id,
                frames: tx,
                cancel,
                registry: self.registry.clone(),
                credentials,
            })),
            Ok(Err(_)) => {
                cancel.cancel();
                Err(PlayerError::VoiceJoin(
                    "voice gateway closed during handshake".to_string(),
                ))
            }
            Err(_) => {
                cancel.cancel();
                Err(PlayerError::VoiceJoin(format!(
                    "voice handshake timed out after {:?}",
                    self.join_timeout
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> VoiceCredentials {
        VoiceCredentials {
            session_id: "session".to_string(),
            token: "token".to_string(),
            endpoint: "voice.example:443".to_string(),
        }
    }

    #[tokio::test]
    async fn test_disconnect_spends_credentials() {
        let registry = Arc::new(VoiceRegistry::new());
        registry.update(GuildId(5), creds());
        let (frames, _rx) = flume::bounded(1);
        let cancel = CancellationToken::new();

        let conn = Box::new(DiscordConnection {
            guild_id: GuildId(5),
            frames,
            cancel: cancel.clone(),
            registry: registry.clone(),
            credentials: creds(),
        });
        conn.disconnect().await;

        assert!(cancel.is_cancelled());
        assert_eq!(registry.get(GuildId(5)), None);
    }
}
