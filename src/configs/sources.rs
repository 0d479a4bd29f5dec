use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct YouTubeConfig {
    /// Entries returned per playlist page request.
    #[serde(default = "default_playlist_limit")]
    pub playlist_limit: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for YouTubeConfig {
    fn default() -> Self {
        Self {
            playlist_limit: default_playlist_limit(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Client-credentials app for the Spotify Web API. Spotify links are
/// rejected as unsupported when this section is absent.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_market")]
    pub market: String,
}

fn default_playlist_limit() -> usize {
    100
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_market() -> String {
    "US".to_string()
}
