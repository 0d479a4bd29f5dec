use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::{Interrupt, Track, TrackState};
use crate::common::{
    errors::{PlayerError, PlayerResult},
    types::{ChannelId, GuildId},
};

/// Where a removed track was taken from.
#[derive(Debug, Clone)]
pub enum Removed {
    /// It was playing and has been skipped.
    Current(Track),
    Queued(Track),
}

impl Removed {
    pub fn into_track(self) -> Track {
        match self {
            Self::Current(t) | Self::Queued(t) => t,
        }
    }
}

#[derive(Default)]
struct PlayerInner {
    queue: VecDeque<Track>,
    current: Option<Track>,
    /// Set once the playback job has exited; no more tracks are accepted.
    closed: bool,
}

/// Queue and playback flags of one guild.
///
/// Queue and current track sit behind one lock; flags read on every frame
/// are atomics. Control events go through a zero-capacity channel whose
/// receiver is owned by the playback job.
pub struct GuildPlayer {
    guild_id: GuildId,
    voice_channel: ChannelId,
    inner: Mutex<PlayerInner>,
    looping: AtomicBool,
    paused: AtomicBool,
    volume: AtomicU8,
    /// 0 means unset.
    message_channel: AtomicU64,
    signals: flume::Sender<Interrupt>,
    /// Held from a pause flag flip until the job has taken the matching signal.
    pause_lock: tokio::sync::Mutex<()>,
}

impl GuildPlayer {
    /// Creates the player and the receiving end of its control channel.
    pub fn new(
        guild_id: GuildId,
        voice_channel: ChannelId,
        volume: u8,
    ) -> (Self, flume::Receiver<Interrupt>) {
        let (signals, rx) = flume::bounded(0);
        let player = Self {
            guild_id,
            voice_channel,
            inner: Mutex::new(PlayerInner::default()),
            looping: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            volume: AtomicU8::new(volume),
            message_channel: AtomicU64::new(0),
            signals,
            pause_lock: tokio::sync::Mutex::new(()),
        };
        (player, rx)
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn voice_channel(&self) -> ChannelId {
        self.voice_channel
    }

    pub fn add_track(&self, track: Track) -> PlayerResult<()> {
        self.add_tracks(vec![track])
            .map_err(|_| PlayerError::NoActivePlayer)
    }

    /// Appends all of `tracks` in order, or hands them back if the player
    /// has already shut down.
    pub fn add_tracks(&self, tracks: Vec<Track>) -> Result<(), Vec<Track>> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(tracks);
        }
        inner.queue.extend(tracks.into_iter().map(|t| t.queued()));
        Ok(())
    }

    /// Promotes the next track to current with fresh playback state.
    ///
    /// With loop mode on, the current track is re-armed instead and the
    /// queue is left alone. Only the playback job calls this.
    pub(crate) fn pool(&self) -> Option<Track> {
        let looping = self.is_looping();
        let mut inner = self.inner.lock();

        if looping {
            if let Some(current) = inner.current.as_mut() {
                current.state = Some(Arc::new(TrackState::new(true)));
                return Some(current.clone());
            }
        }

        let mut next = inner.queue.pop_front();
        if let Some(track) = next.as_mut() {
            track.state = Some(Arc::new(TrackState::new(looping)));
        }
        inner.current = next.clone();
        next
    }

    pub(crate) fn clear_current(&self) {
        self.inner.lock().current = None;
    }

    /// Drops all queued tracks and rejects new ones.
    pub(crate) fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.current = None;
        inner.queue.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn get_current(&self) -> Option<Track> {
        self.inner.lock().current.clone()
    }

    pub fn get_by_id(&self, id: Uuid) -> Option<Track> {
        let inner = self.inner.lock();
        inner
            .current
            .iter()
            .chain(inner.queue.iter())
            .find(|t| t.id == id)
            .cloned()
    }

    /// Snapshot of queued tracks, excluding the current one.
    pub fn get_queue(&self, offset: usize, limit: Option<usize>) -> Vec<Track> {
        let inner = self.inner.lock();
        inner
            .queue
            .iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    pub fn queue_len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Summed nominal duration of queued tracks.
    pub fn queue_duration(&self) -> Duration {
        self.inner.lock().queue.iter().map(|t| t.data.duration).sum()
    }

    /// Removes a track by id. Removing the current track skips it.
    pub async fn remove_track(&self, id: Uuid) -> PlayerResult<Removed> {
        let current = {
            let mut inner = self.inner.lock();
            match inner.current.as_ref().filter(|t| t.id == id) {
                Some(current) => current.clone(),
                None => {
                    let pos = inner
                        .queue
                        .iter()
                        .position(|t| t.id == id)
                        .ok_or(PlayerError::TrackNotFoundInQueue)?;
                    return inner
                        .queue
                        .remove(pos)
                        .map(Removed::Queued)
                        .ok_or(PlayerError::TrackNotFoundInQueue);
                }
            }
        };

        // the skip names the track, so it is void if playback moved on meanwhile
        self.signal(Interrupt::Skip(current.id)).await?;
        Ok(Removed::Current(current))
    }

    /// Removes the queued track at `position` (0 is the next to play).
    pub fn remove_at(&self, position: usize) -> PlayerResult<Track> {
        self.inner
            .lock()
            .queue
            .remove(position)
            .ok_or(PlayerError::TrackNotFoundInQueue)
    }

    /// Skips the current track. Returns `None` without signalling when
    /// nothing is playing.
    pub async fn skip(&self) -> PlayerResult<Option<Track>> {
        let Some(current) = self.get_current() else {
            return Ok(None);
        };
        self.signal(Interrupt::Skip(current.id)).await?;
        Ok(Some(current))
    }

    pub async fn stop(&self) -> PlayerResult<()> {
        self.signal(Interrupt::Stop).await
    }

    /// Returns whether the state changed.
    pub async fn pause(&self) -> PlayerResult<bool> {
        self.set_paused(true).await
    }

    pub async fn unpause(&self) -> PlayerResult<bool> {
        self.set_paused(false).await
    }

    async fn set_paused(&self, paused: bool) -> PlayerResult<bool> {
        let _guard = self.pause_lock.lock().await;
        if self
            .paused
            .compare_exchange(!paused, paused, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(false);
        }

        // with nothing playing the flag alone decides how the next track starts
        if self.inner.lock().current.is_some() {
            let signal = if paused {
                Interrupt::Pause
            } else {
                Interrupt::Unpause
            };
            self.signal(signal).await?;
        }
        Ok(true)
    }

    /// Returns whether the mode changed.
    pub fn set_loop(&self, enable: bool) -> bool {
        let inner = self.inner.lock();
        let changed = self.looping.swap(enable, Ordering::AcqRel) != enable;
        if let Some(state) = inner.current.as_ref().and_then(|t| t.state.as_ref()) {
            state.set_looping(enable);
        }
        changed
    }

    /// Returns the previous volume. Takes effect with the next track.
    pub fn set_volume(&self, volume: u8) -> u8 {
        self.volume.swap(volume, Ordering::AcqRel)
    }

    pub fn volume(&self) -> u8 {
        self.volume.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn is_looping(&self) -> bool {
        self.looping.load(Ordering::Acquire)
    }

    pub fn set_message_channel(&self, channel: ChannelId) {
        self.message_channel.store(channel.get(), Ordering::Release);
    }

    pub fn message_channel(&self) -> Option<ChannelId> {
        match self.message_channel.load(Ordering::Acquire) {
            0 => None,
            id => Some(ChannelId(id)),
        }
    }

    /// Blocks until the playback job takes `signal`. Fails once the job is gone.
    async fn signal(&self, signal: Interrupt) -> PlayerResult<()> {
        debug!(guild_id = %self.guild_id, %signal, "Sending control signal");
        self.signals
            .send_async(signal)
            .await
            .map_err(|_| PlayerError::NoActivePlayer)
    }
}
