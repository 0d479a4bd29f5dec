use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer, ser::SerializeStruct};
use uuid::Uuid;

use crate::common::{
    types::{ChannelId, UserId},
    utils::{duration_ms, now_ms},
};

/// Resolved metadata of a playable track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackData {
    pub name: String,
    pub url: String,
    /// `platform:identifier`, re-resolved into a stream when the track plays.
    pub play_query: String,
    pub thumbnail: String,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

/// Playback state of the current track.
///
/// Progress is written by the playback task and read by status queries
/// concurrently, so it lives in an atomic nanosecond counter.
#[derive(Debug)]
pub struct TrackState {
    progress_ns: AtomicU64,
    playing_start: u64,
    looping: AtomicBool,
}

impl TrackState {
    pub fn new(looping: bool) -> Self {
        Self {
            progress_ns: AtomicU64::new(0),
            playing_start: now_ms(),
            looping: AtomicBool::new(looping),
        }
    }

    pub fn progress(&self) -> Duration {
        Duration::from_nanos(self.progress_ns.load(Ordering::Acquire))
    }

    /// Unix millis at which playback of this run started.
    pub fn playing_start(&self) -> u64 {
        self.playing_start
    }

    pub fn is_looping(&self) -> bool {
        self.looping.load(Ordering::Acquire)
    }

    pub(crate) fn advance(&self, by: Duration) {
        let ns = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        // saturating so progress never wraps backwards
        let _ = self
            .progress_ns
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                Some(cur.saturating_add(ns))
            });
    }

    pub(crate) fn set_looping(&self, looping: bool) {
        self.looping.store(looping, Ordering::Release);
    }
}

impl Serialize for TrackState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("TrackState", 3)?;
        s.serialize_field("progress", &(self.progress().as_millis() as u64))?;
        s.serialize_field("play_start", &self.playing_start)?;
        s.serialize_field("looping", &self.is_looping())?;
        s.end()
    }
}

impl<'de> Deserialize<'de> for TrackState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Wire {
            progress: u64,
            play_start: u64,
            looping: bool,
        }

        let wire = Wire::deserialize(deserializer)?;
        Ok(Self {
            progress_ns: AtomicU64::new(wire.progress.saturating_mul(1_000_000)),
            playing_start: wire.play_start,
            looping: AtomicBool::new(wire.looping),
        })
    }
}

/// A queued or playing track.
///
/// `state` is `None` while the track waits in the queue and set exactly
/// while it is the guild's current track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: Uuid,
    /// Unix millis.
    pub requested_at: u64,
    pub user_id: UserId,
    pub channel_id: ChannelId,
    pub state: Option<Arc<TrackState>>,
    pub data: TrackData,
}

impl Track {
    pub fn new(user_id: UserId, channel_id: ChannelId, data: TrackData) -> Self {
        Self {
            id: Uuid::new_v4(),
            requested_at: now_ms(),
            user_id,
            channel_id,
            state: None,
            data,
        }
    }

    pub fn progress(&self) -> Duration {
        self.state
            .as_ref()
            .map(|s| s.progress())
            .unwrap_or_default()
    }

    /// Copy of the track as it sits in the queue, without playback state.
    pub(crate) fn queued(&self) -> Self {
        Self {
            state: None,
            ..self.clone()
        }
    }
}
