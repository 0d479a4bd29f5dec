use async_trait::async_trait;
use reqwest::Url;

use crate::{common::errors::PlayerResult, encoder::InputStream, player::TrackData};

/// A platform that can both resolve metadata and stream audio.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Prefix used in play queries (`<name>:<id>`).
    fn name(&self) -> &'static str;

    /// Whether links on `host` belong to this platform.
    fn handles_host(&self, host: &str) -> bool;

    /// Best single match for free text.
    async fn search_string(&self, query: &str) -> PlayerResult<TrackData>;

    /// Every resolvable track behind a link. A link to a collection yields
    /// all entries that could be parsed.
    async fn search_url(&self, url: &Url) -> PlayerResult<Vec<TrackData>>;

    /// Opens a raw audio stream for a previously resolved identifier.
    async fn fetch(&self, id: &str) -> PlayerResult<InputStream>;
}

/// Track metadata from a platform that cannot stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogTrack {
    pub name: String,
    pub artists: Vec<String>,
}

impl CatalogTrack {
    /// Free-text query used to find the same song on a streamable platform.
    pub fn search_query(&self) -> String {
        match self.artists.first() {
            Some(artist) => format!("{} {}", artist, self.name),
            None => self.name.clone(),
        }
    }
}

/// A metadata-only platform. Its results are translated into searches on a
/// streamable [`Platform`] before they can be queued.
#[async_trait]
pub trait CatalogPlatform: Send + Sync {
    fn name(&self) -> &'static str;

    fn handles_host(&self, host: &str) -> bool;

    async fn search_url(&self, url: &Url) -> PlayerResult<Vec<CatalogTrack>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_query_uses_primary_artist() {
        let t = CatalogTrack {
            name: "Song".into(),
            artists: vec!["First".into(), "Second".into()],
        };
        assert_eq!(t.search_query(), "First Song");

        let solo = CatalogTrack {
            name: "Song".into(),
            artists: vec![],
        };
        assert_eq!(solo.search_query(), "Song");
    }
}
