use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::TrackData;
use crate::{
    common::types::{ChannelId, GuildId},
    configs::MessengerConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TrackStarted,
    TrackFailed,
    QueueEnded,
}

/// What the chat side needs to render a status message.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub track: Option<TrackData>,
}

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn notify(&self, notification: &Notification);
}

/// Writes notifications to the log only.
pub struct LogMessenger;

#[async_trait]
impl Messenger for LogMessenger {
    async fn notify(&self, n: &Notification) {
        info!(
            guild_id = %n.guild_id,
            channel_id = %n.channel_id,
            kind = ?n.kind,
            track = n.track.as_ref().map(|t| t.name.as_str()),
            "Player notification"
        );
    }
}

/// POSTs each notification as JSON to a webhook.
pub struct WebhookMessenger {
    client: reqwest::Client,
    url: String,
    secret: Option<String>,
}

impl WebhookMessenger {
    pub fn new(url: String, secret: Option<String>) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            url,
            secret,
        })
    }
}

#[async_trait]
impl Messenger for WebhookMessenger {
    async fn notify(&self, n: &Notification) {
        let mut req = self.client.post(&self.url).json(n);
        if let Some(secret) = &self.secret {
            req = req.header("Authorization", secret);
        }

        match req.send().await {
            Ok(res) if res.status().is_success() => {}
            Ok(res) => warn!(status = %res.status(), "Webhook rejected notification"),
            Err(e) => warn!("Webhook delivery failed: {}", e),
        }
    }
}

/// Builds the messenger described by `config`.
pub fn from_config(config: &MessengerConfig) -> Arc<dyn Messenger> {
    match &config.webhook_url {
        Some(url) => match WebhookMessenger::new(url.clone(), config.webhook_secret.clone()) {
            Ok(m) => {
                info!("Notifications delivered to webhook");
                Arc::new(m)
            }
            Err(e) => {
                warn!("Webhook messenger unavailable, logging only: {}", e);
                Arc::new(LogMessenger)
            }
        },
        None => Arc::new(LogMessenger),
    }
}

/// Queues notifications for a single delivery task so the playback job
/// never waits on the network and per-guild ordering is kept.
#[derive(Clone)]
pub struct Notifier {
    tx: flume::Sender<Notification>,
}

impl Notifier {
    pub fn spawn(messenger: Arc<dyn Messenger>) -> Self {
        let (tx, rx) = flume::unbounded::<Notification>();
        tokio::spawn(async move {
            while let Ok(n) = rx.recv_async().await {
                messenger.notify(&n).await;
            }
            debug!("Notifier stopped");
        });
        Self { tx }
    }

    pub fn send(&self, notification: Notification) {
        let _ = self.tx.send(notification);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    pub(crate) struct RecordingMessenger {
        pub seen: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl Messenger for RecordingMessenger {
        async fn notify(&self, n: &Notification) {
            self.seen.lock().push(n.clone());
        }
    }

    impl RecordingMessenger {
        pub(crate) fn kinds(&self) -> Vec<NotificationKind> {
            self.seen.lock().iter().map(|n| n.kind).collect()
        }
    }

    #[tokio::test]
    async fn test_notifier_keeps_order() {
        let messenger = Arc::new(RecordingMessenger::default());
        let notifier = Notifier::spawn(messenger.clone());

        for kind in [
            NotificationKind::TrackStarted,
            NotificationKind::TrackFailed,
            NotificationKind::QueueEnded,
        ] {
            notifier.send(Notification {
                kind,
                guild_id: GuildId(1),
                channel_id: ChannelId(2),
                track: None,
            });
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(
            messenger.kinds(),
            vec![
                NotificationKind::TrackStarted,
                NotificationKind::TrackFailed,
                NotificationKind::QueueEnded
            ]
        );
    }

    #[test]
    fn test_notification_json() {
        let n = Notification {
            kind: NotificationKind::QueueEnded,
            guild_id: GuildId(10),
            channel_id: ChannelId(20),
            track: None,
        };
        let v = serde_json::to_value(&n).unwrap();
        assert_eq!(v["kind"], "queue_ended");
        assert_eq!(v["guild_id"], "10");
    }
}
