use std::{sync::Arc, time::Duration};

use reqwest::Url;
use tracing::{debug, info, warn};

use super::{
    plugin::{CatalogPlatform, Platform},
    spotify::SpotifyCatalog,
    youtube::YouTubePlatform,
};
use crate::{
    common::errors::{PlayerError, PlayerResult},
    configs::Config,
    encoder::InputStream,
    player::TrackData,
};

pub type BoxedPlatform = Arc<dyn Platform>;
pub type BoxedCatalog = Arc<dyn CatalogPlatform>;

/// Resolves queries into track metadata and play queries into streams.
///
/// Free text always goes to the default platform. Links are dispatched by
/// host, and catalog results are re-searched on the default platform.
pub struct TrackFetcher {
    default: BoxedPlatform,
    platforms: Vec<BoxedPlatform>,
    catalogs: Vec<BoxedCatalog>,
}

impl TrackFetcher {
    pub fn new(config: &Config) -> PlayerResult<Self> {
        let youtube: BoxedPlatform = Arc::new(YouTubePlatform::new(&config.youtube)?);
        info!("Loaded platform: {}", youtube.name());

        let mut catalogs: Vec<BoxedCatalog> = Vec::new();
        match &config.spotify {
            Some(spotify) => {
                let timeout = Duration::from_secs(config.youtube.timeout_secs);
                match SpotifyCatalog::new(spotify, timeout) {
                    Ok(catalog) => {
                        info!("Loaded catalog: spotify");
                        catalogs.push(Arc::new(catalog));
                    }
                    Err(e) => warn!("Spotify catalog failed to initialize: {}", e),
                }
            }
            None => debug!("Spotify credentials not configured, skipping catalog"),
        }

        Ok(Self::with_platforms(youtube, Vec::new(), catalogs))
    }

    /// `default` serves free-text searches and catalog translation and is
    /// dispatched to like any other streamable platform.
    pub fn with_platforms(
        default: BoxedPlatform,
        others: Vec<BoxedPlatform>,
        catalogs: Vec<BoxedCatalog>,
    ) -> Self {
        let mut platforms = vec![default.clone()];
        platforms.extend(others);
        Self {
            default,
            platforms,
            catalogs,
        }
    }

    pub async fn search(&self, query: &str) -> PlayerResult<Vec<TrackData>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(PlayerError::BadRequest("empty search query".to_string()));
        }

        if !(query.starts_with("http://") || query.starts_with("https://")) {
            return Ok(vec![self.default.search_string(query).await?]);
        }

        let url = Url::parse(query).map_err(|_| PlayerError::InvalidUrl(query.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| PlayerError::InvalidUrl(query.to_string()))?
            .to_ascii_lowercase();

        if let Some(platform) = self.platforms.iter().find(|p| p.handles_host(&host)) {
            debug!(platform = platform.name(), %url, "Resolving link");
            return platform.search_url(&url).await;
        }

        if let Some(catalog) = self.catalogs.iter().find(|c| c.handles_host(&host)) {
            debug!(catalog = catalog.name(), %url, "Resolving catalog link");
            return self.translate(catalog.as_ref(), &url).await;
        }

        Err(PlayerError::UnsupportedPlatform(host))
    }

    async fn translate(
        &self,
        catalog: &dyn CatalogPlatform,
        url: &Url,
    ) -> PlayerResult<Vec<TrackData>> {
        let entries = catalog.search_url(url).await?;
        let mut tracks = Vec::with_capacity(entries.len());

        for entry in entries {
            let query = entry.search_query();
            match self.default.search_string(&query).await {
                Ok(track) => tracks.push(track),
                Err(e) => debug!(%query, "No streamable match for catalog entry: {}", e),
            }
        }

        if tracks.is_empty() {
            return Err(PlayerError::TrackSearchFailed);
        }
        Ok(tracks)
    }

    /// Opens a stream for a `platform:id` play query.
    pub async fn fetch(&self, play_query: &str) -> PlayerResult<InputStream> {
        let (prefix, id) = play_query
            .split_once(':')
            .filter(|(p, id)| !p.is_empty() && !id.is_empty())
            .ok_or_else(|| PlayerError::InvalidPlayQuery(play_query.to_string()))?;

        if let Some(platform) = self.platforms.iter().find(|p| p.name() == prefix) {
            return platform.fetch(id).await;
        }

        // catalog play queries must have been translated at search time
        if self.catalogs.iter().any(|c| c.name() == prefix) || prefix == "spotify" {
            return Err(PlayerError::UnsupportedPlatform(prefix.to_string()));
        }

        Err(PlayerError::InvalidPlayQuery(play_query.to_string()))
    }
}
