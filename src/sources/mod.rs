pub mod http;
pub mod manager;
pub mod plugin;
pub mod spotify;
pub mod youtube;

pub use manager::TrackFetcher;
pub use plugin::{CatalogPlatform, CatalogTrack, Platform};
