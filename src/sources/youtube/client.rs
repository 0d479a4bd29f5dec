use std::time::Duration;

use serde_json::{Value, json};

use crate::{
    common::errors::{PlayerError, PlayerResult},
    sources::http::stream_client,
};

/// YouTube InnerTube API base endpoint.
pub const INNERTUBE_API: &str = "https://youtubei.googleapis.com";

const CLIENT_NAME: &str = "ANDROID_VR";
const CLIENT_ID: &str = "28";
const CLIENT_VERSION: &str = "1.61.48";
pub const USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 14; Pixel 8 Pro Build/UQ1A.240205.002; wv) \
     AppleWebKit/537.36 (KHTML, like Gecko) Version/4.0 \
     Chrome/121.0.6167.164 Mobile Safari/537.36 YouTubeVR/1.61.48 (gzip)";

/// "Videos only" search filter.
const SEARCH_PARAMS: &str = "EgIQAQ%3D%3D";

/// Thin InnerTube client speaking as the Android VR app, which is served
/// plain (non-ciphered) stream URLs.
pub struct InnertubeClient {
    http: reqwest::Client,
    stream_http: reqwest::Client,
    base_url: String,
}

impl InnertubeClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> PlayerResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            stream_http: stream_client(USER_AGENT, timeout)?,
            base_url: base_url.into(),
        })
    }

    /// Client for audio streams, without the API request deadline.
    pub fn stream_http(&self) -> &reqwest::Client {
        &self.stream_http
    }

    fn context() -> Value {
        json!({
            "client": {
                "clientName": CLIENT_NAME,
                "clientVersion": CLIENT_VERSION,
                "userAgent": USER_AGENT,
                "androidSdkVersion": 34,
                "deviceMake": "Google",
                "deviceModel": "Pixel 8 Pro",
                "osName": "Android",
                "osVersion": "14",
                "hl": "en",
                "gl": "US"
            },
            "user": { "lockedSafetyMode": false },
            "request": { "useSsl": true }
        })
    }

    async fn post(&self, endpoint: &str, mut body: Value) -> PlayerResult<Value> {
        body["context"] = Self::context();
        let url = format!("{}/youtubei/v1/{}?prettyPrint=false", self.base_url, endpoint);

        let res = self
            .http
            .post(&url)
            .header("X-YouTube-Client-Name", CLIENT_ID)
            .header("X-YouTube-Client-Version", CLIENT_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            return Err(PlayerError::Platform(format!(
                "youtube {} request returned {}",
                endpoint, status
            )));
        }

        Ok(res.json().await?)
    }

    pub async fn player(&self, video_id: &str) -> PlayerResult<Value> {
        self.post(
            "player",
            json!({
                "videoId": video_id,
                "contentCheckOk": true,
                "racyCheckOk": true
            }),
        )
        .await
    }

    pub async fn search(&self, query: &str) -> PlayerResult<Value> {
        self.post("search", json!({ "query": query, "params": SEARCH_PARAMS }))
            .await
    }

    pub async fn browse(&self, browse_id: &str) -> PlayerResult<Value> {
        self.post("browse", json!({ "browseId": browse_id })).await
    }
}
