use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::configs::EncoderConfig;

/// Opus frame length produced by the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum FrameDuration {
    #[default]
    Ms20,
    Ms40,
    Ms60,
}

impl FrameDuration {
    pub fn as_millis(self) -> u32 {
        match self {
            Self::Ms20 => 20,
            Self::Ms40 => 40,
            Self::Ms60 => 60,
        }
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_millis(self.as_millis() as u64)
    }
}

impl TryFrom<u32> for FrameDuration {
    type Error = String;

    fn try_from(ms: u32) -> Result<Self, Self::Error> {
        match ms {
            20 => Ok(Self::Ms20),
            40 => Ok(Self::Ms40),
            60 => Ok(Self::Ms60),
            other => Err(format!("unsupported frame duration {}ms", other)),
        }
    }
}

impl From<FrameDuration> for u32 {
    fn from(d: FrameDuration) -> Self {
        d.as_millis()
    }
}

impl fmt::Display for FrameDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_millis())
    }
}

/// libopus `-application` hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodeMode {
    Voip,
    #[default]
    Audio,
    LowDelay,
}

impl fmt::Display for EncodeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Voip => "voip",
            Self::Audio => "audio",
            Self::LowDelay => "lowdelay",
        })
    }
}

#[derive(Debug, Clone)]
pub struct EncodeOptions {
    pub ffmpeg_path: String,
    pub frame_rate: u32,
    pub channels: u8,
    /// kbps
    pub bitrate: u16,
    pub compression_level: u8,
    pub packet_loss: u8,
    pub frame_duration: FrameDuration,
    pub mode: EncodeMode,
    pub buffered_frames: usize,
    pub start_time: Duration,
    /// Gain multiplier, 1.0 is unchanged.
    pub volume: f32,
}

impl EncodeOptions {
    pub fn from_config(cfg: &EncoderConfig) -> Self {
        Self {
            ffmpeg_path: cfg.ffmpeg_path.clone(),
            frame_rate: cfg.frame_rate,
            channels: cfg.channels,
            bitrate: cfg.bitrate,
            compression_level: cfg.compression_level.min(10),
            packet_loss: cfg.packet_loss.min(100),
            frame_duration: cfg.frame_duration,
            mode: cfg.mode,
            buffered_frames: cfg.buffered_frames.max(1),
            start_time: Duration::ZERO,
            volume: 1.0,
        }
    }

    /// Applies a player volume where 100 is unity gain.
    pub fn with_volume(mut self, volume: u8) -> Self {
        self.volume = volume as f32 / 100.0;
        self
    }

    pub fn with_start_time(mut self, start: Duration) -> Self {
        self.start_time = start;
        self
    }

    /// Command line for an ffmpeg reading from stdin and writing Ogg/Opus to stdout.
    pub fn ffmpeg_args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "-hide_banner",
            "-loglevel",
            "warning",
            "-stats",
            "-reconnect",
            "1",
            "-reconnect_at_eof",
            "1",
            "-reconnect_streamed",
            "1",
            "-reconnect_delay_max",
            "2",
            "-i",
            "pipe:0",
            "-map",
            "0:a",
            "-acodec",
            "libopus",
            "-f",
            "ogg",
            "-vbr",
            "on",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        args.extend([
            "-compression_level".to_string(),
            self.compression_level.to_string(),
            "-ar".to_string(),
            self.frame_rate.to_string(),
            "-ac".to_string(),
            self.channels.to_string(),
            "-b:a".to_string(),
            (self.bitrate as u32 * 1000).to_string(),
            "-application".to_string(),
            self.mode.to_string(),
            "-frame_duration".to_string(),
            self.frame_duration.to_string(),
            "-packet_loss".to_string(),
            self.packet_loss.to_string(),
            "-threads".to_string(),
            "1".to_string(),
            "-ss".to_string(),
            format!("{:.3}", self.start_time.as_secs_f64()),
            "-filter:a".to_string(),
            format!("volume={:.2}", self.volume),
            "pipe:1".to_string(),
        ]);

        args
    }
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self::from_config(&EncoderConfig::default())
    }
}
