pub mod client;
pub mod common;
pub mod configs;
pub mod encoder;
pub mod handler;
pub mod player;
pub mod sources;
pub mod transport;
pub mod voice;
