use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::encoder::{EncodeMode, FrameDuration};

/// Longest a guild may stay paused before its playback job ends.
pub const MAX_PAUSED_TIME: Duration = Duration::from_secs(5 * 60);
/// Empty-queue polls before the playback job considers the queue exhausted.
pub const MAX_POOL_TRIES: u32 = 10;
pub const POOL_TRY_DELAY: Duration = Duration::from_secs(1);
/// A frame not accepted by the voice transport within this window means
/// the connection is gone.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(1);
pub const VOICE_JOIN_TIMEOUT: Duration = Duration::from_secs(10);
pub const QUEUE_END_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PlayerConfig {
    #[serde(default = "default_max_paused_secs")]
    pub max_paused_secs: u64,
    #[serde(default = "default_max_pool_tries")]
    pub max_pool_tries: u32,
    #[serde(default = "default_pool_try_delay_ms")]
    pub pool_try_delay_ms: u64,
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    #[serde(default = "default_voice_join_timeout_ms")]
    pub voice_join_timeout_ms: u64,
    #[serde(default = "default_queue_end_delay_ms")]
    pub queue_end_delay_ms: u64,
    /// 0..=255, 100 is unity gain.
    #[serde(default = "default_volume")]
    pub default_volume: u8,
}

impl PlayerConfig {
    pub fn max_paused_time(&self) -> Duration {
        Duration::from_secs(self.max_paused_secs)
    }

    pub fn pool_try_delay(&self) -> Duration {
        Duration::from_millis(self.pool_try_delay_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn voice_join_timeout(&self) -> Duration {
        Duration::from_millis(self.voice_join_timeout_ms)
    }

    pub fn queue_end_delay(&self) -> Duration {
        Duration::from_millis(self.queue_end_delay_ms)
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            max_paused_secs: default_max_paused_secs(),
            max_pool_tries: default_max_pool_tries(),
            pool_try_delay_ms: default_pool_try_delay_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            voice_join_timeout_ms: default_voice_join_timeout_ms(),
            queue_end_delay_ms: default_queue_end_delay_ms(),
            default_volume: default_volume(),
        }
    }
}

/// Transcoder settings applied to every session.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EncoderConfig {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u8,
    /// kbps
    #[serde(default = "default_bitrate")]
    pub bitrate: u16,
    #[serde(default = "default_compression_level")]
    pub compression_level: u8,
    #[serde(default = "default_packet_loss")]
    pub packet_loss: u8,
    #[serde(default)]
    pub frame_duration: FrameDuration,
    #[serde(default)]
    pub mode: EncodeMode,
    #[serde(default = "default_buffered_frames")]
    pub buffered_frames: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            frame_rate: default_frame_rate(),
            channels: default_channels(),
            bitrate: default_bitrate(),
            compression_level: default_compression_level(),
            packet_loss: default_packet_loss(),
            frame_duration: FrameDuration::default(),
            mode: EncodeMode::default(),
            buffered_frames: default_buffered_frames(),
        }
    }
}

fn default_max_paused_secs() -> u64 {
    MAX_PAUSED_TIME.as_secs()
}

fn default_max_pool_tries() -> u32 {
    MAX_POOL_TRIES
}

fn default_pool_try_delay_ms() -> u64 {
    POOL_TRY_DELAY.as_millis() as u64
}

fn default_send_timeout_ms() -> u64 {
    SEND_TIMEOUT.as_millis() as u64
}

fn default_voice_join_timeout_ms() -> u64 {
    VOICE_JOIN_TIMEOUT.as_millis() as u64
}

fn default_queue_end_delay_ms() -> u64 {
    QUEUE_END_DELAY.as_millis() as u64
}

fn default_volume() -> u8 {
    100
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_frame_rate() -> u32 {
    48_000
}

fn default_channels() -> u8 {
    2
}

fn default_bitrate() -> u16 {
    64
}

fn default_compression_level() -> u8 {
    10
}

fn default_packet_loss() -> u8 {
    1
}

fn default_buffered_frames() -> usize {
    100
}
