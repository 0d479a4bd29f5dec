use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct DiscordConfig {
    /// The bot's own user id, sent when identifying on the voice gateway.
    #[serde(default)]
    pub bot_user_id: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct MessengerConfig {
    /// Track start/fail and queue-end events are POSTed here when set;
    /// otherwise they are only logged.
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
}
