use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Url;
use tracing::{debug, warn};

pub mod client;
pub mod extractor;

use client::{INNERTUBE_API, InnertubeClient};

use crate::{
    common::errors::{PlayerError, PlayerResult},
    configs::YouTubeConfig,
    encoder::InputStream,
    player::TrackData,
    sources::{http::open_stream, plugin::Platform},
};

const HOSTS: &[&str] = &[
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "youtu.be",
];

/// What a YouTube link points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum YouTubeLink {
    Video(String),
    Playlist(String),
}

impl YouTubeLink {
    pub fn parse(url: &Url) -> Option<Self> {
        let host = url.host_str()?;
        let mut segments = url.path_segments().into_iter().flatten().filter(|s| !s.is_empty());

        if host == "youtu.be" {
            return segments.next().map(|id| Self::Video(id.to_string()));
        }

        let query = |key: &str| {
            url.query_pairs()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.into_owned())
                .filter(|v| !v.is_empty())
        };

        match segments.next() {
            Some("playlist") => query("list").map(Self::Playlist),
            Some("watch") => query("v")
                .map(Self::Video)
                .or_else(|| query("list").map(Self::Playlist)),
            Some("shorts" | "embed" | "live" | "v") => {
                segments.next().map(|id| Self::Video(id.to_string()))
            }
            _ => None,
        }
    }
}

pub struct YouTubePlatform {
    client: InnertubeClient,
    playlist_limit: usize,
}

impl YouTubePlatform {
    pub fn new(config: &YouTubeConfig) -> PlayerResult<Self> {
        Self::with_base_url(config, INNERTUBE_API)
    }

    pub fn with_base_url(config: &YouTubeConfig, base_url: &str) -> PlayerResult<Self> {
        Ok(Self {
            client: InnertubeClient::new(base_url, Duration::from_secs(config.timeout_secs))?,
            playlist_limit: config.playlist_limit.max(1),
        })
    }

    async fn video(&self, video_id: &str) -> PlayerResult<TrackData> {
        let body = self.client.player(video_id).await?;
        let (status, reason) = extractor::playability(&body);
        if status != "OK" {
            debug!(video_id, status, ?reason, "YouTube video is not playable");
            return Err(PlayerError::TrackSearchFailed);
        }

        extractor::extract_from_player(&body).ok_or(PlayerError::TrackSearchFailed)
    }

    async fn playlist(&self, list_id: &str) -> PlayerResult<Vec<TrackData>> {
        let browse_id = if list_id.starts_with("VL") {
            list_id.to_string()
        } else {
            format!("VL{}", list_id)
        };

        let body = self.client.browse(&browse_id).await?;
        let mut tracks = extractor::extract_from_browse(&body);
        tracks.truncate(self.playlist_limit);

        if tracks.is_empty() {
            return Err(PlayerError::TrackSearchFailed);
        }
        Ok(tracks)
    }
}

#[async_trait]
impl Platform for YouTubePlatform {
    fn name(&self) -> &'static str {
        "youtube"
    }

    fn handles_host(&self, host: &str) -> bool {
        HOSTS.contains(&host)
    }

    async fn search_string(&self, query: &str) -> PlayerResult<TrackData> {
        let start = Instant::now();
        let body = self.client.search(query).await?;
        let result = extractor::extract_from_search(&body).into_iter().next();
        debug!(took = ?start.elapsed(), found = result.is_some(), "YouTube string search");

        result.ok_or(PlayerError::TrackSearchFailed)
    }

    async fn search_url(&self, url: &Url) -> PlayerResult<Vec<TrackData>> {
        match YouTubeLink::parse(url) {
            Some(YouTubeLink::Video(id)) => Ok(vec![self.video(&id).await?]),
            Some(YouTubeLink::Playlist(id)) => self.playlist(&id).await,
            None => Err(PlayerError::InvalidUrl(url.to_string())),
        }
    }

    async fn fetch(&self, id: &str) -> PlayerResult<InputStream> {
        let body = self.client.player(id).await?;
        let (status, reason) = extractor::playability(&body);
        if status != "OK" {
            warn!(video_id = id, status, ?reason, "YouTube video not playable");
            return Err(PlayerError::TrackSearchFailed);
        }

        let format = body
            .get("streamingData")
            .and_then(extractor::select_best_audio_format)
            .ok_or(PlayerError::TrackSearchFailed)?;

        let url = format
            .get("url")
            .and_then(|u| u.as_str())
            .ok_or_else(|| PlayerError::Platform("youtube format has no direct url".to_string()))?;

        debug!(
            video_id = id,
            itag = ?format.get("itag"),
            mime = ?format.get("mimeType"),
            "Opening YouTube stream"
        );
        open_stream(self.client.stream_http(), url).await
    }
}
