use std::{sync::Arc, time::Duration};

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{
    GuildPlayer, Interrupt, Track, TrackState,
    messenger::{Notification, NotificationKind, Notifier},
};
use crate::{
    common::{
        errors::{PlayerError, PlayerResult},
        types::GuildId,
        utils::round_ms,
    },
    configs::{EncoderConfig, PlayerConfig},
    encoder::{EncodeOptions, InputStream, TranscodeSession},
    sources::TrackFetcher,
    voice::{VoiceConnection, VoiceTransport},
};

/// Starts a transcode session for an opened stream.
pub type SessionOpener = fn(InputStream, EncodeOptions) -> TranscodeSession;

/// Everything a playback job needs besides its player.
pub struct PlaybackContext {
    pub fetcher: Arc<TrackFetcher>,
    pub voice: Arc<dyn VoiceTransport>,
    pub notifier: Notifier,
    pub player: PlayerConfig,
    pub encoder: EncoderConfig,
    pub open_session: SessionOpener,
}

/// How a playback job ended when no fatal error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEnd {
    QueueExhausted,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackEnd {
    Finished,
    Skipped,
    Stopped,
}

enum Next {
    Track(Track),
    Exhausted,
    Stopped,
}

/// Drives one guild: joins voice, then plays tracks until the queue runs
/// dry, a stop arrives or the connection is lost.
pub struct PlaybackJob {
    ctx: Arc<PlaybackContext>,
    player: Arc<GuildPlayer>,
    signals: flume::Receiver<Interrupt>,
    guild_id: GuildId,
}

impl PlaybackJob {
    pub fn new(
        ctx: Arc<PlaybackContext>,
        player: Arc<GuildPlayer>,
        signals: flume::Receiver<Interrupt>,
    ) -> Self {
        let guild_id = player.guild_id();
        Self {
            ctx,
            player,
            signals,
            guild_id,
        }
    }

    pub async fn run(self) -> PlayerResult<JobEnd> {
        let start = Instant::now();
        let result = self.join_and_drive().await;

        // close before the receiver goes away so no track is accepted
        // that nobody would play
        self.player.close();
        let Self {
            ctx,
            player,
            signals,
            guild_id,
        } = self;
        drop(signals);

        if let Some(channel_id) = player.message_channel() {
            ctx.notifier.send(Notification {
                kind: NotificationKind::QueueEnded,
                guild_id,
                channel_id,
                track: None,
            });
        }
        tokio::time::sleep(ctx.player.queue_end_delay()).await;

        debug!(%guild_id, took = ?round_ms(start.elapsed()), "Playback job finished");
        result
    }

    async fn join_and_drive(&self) -> PlayerResult<JobEnd> {
        let channel_id = self.player.voice_channel();
        let join = tokio::time::timeout(
            self.ctx.player.voice_join_timeout(),
            self.ctx.voice.join(self.guild_id, channel_id),
        );

        let conn = tokio::select! {
            biased;
            _ = until_stopped(&self.signals) => return Ok(JobEnd::Stopped),
            res = join => match res {
                Ok(conn) => conn?,
                Err(_) => {
                    return Err(PlayerError::VoiceJoin(format!(
                        "joining channel {} timed out",
                        channel_id
                    )));
                }
            },
        };
        info!(guild_id = %self.guild_id, %channel_id, "Joined voice channel");

        let result = self.drive(conn.as_ref()).await;
        conn.disconnect().await;
        result
    }

    async fn drive(&self, conn: &dyn VoiceConnection) -> PlayerResult<JobEnd> {
        loop {
            let track = match self.next_track().await {
                Next::Track(track) => track,
                Next::Exhausted => return Ok(JobEnd::QueueExhausted),
                Next::Stopped => return Ok(JobEnd::Stopped),
            };
            let Some(state) = track.state.clone() else {
                continue;
            };

            self.announce(NotificationKind::TrackStarted, &track);
            info!(
                guild_id = %self.guild_id,
                track_id = %track.id,
                name = %track.data.name,
                looping = state.is_looping(),
                "Playing track"
            );

            match self.play(&track, &state, conn).await {
                Ok(TrackEnd::Finished) => {}
                Ok(TrackEnd::Skipped) => self.player.clear_current(),
                Ok(TrackEnd::Stopped) => return Ok(JobEnd::Stopped),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(
                        guild_id = %self.guild_id,
                        track_id = %track.id,
                        error = %e,
                        "Track failed"
                    );
                    // a failing track must not be replayed by loop mode
                    self.player.clear_current();
                    self.announce(NotificationKind::TrackFailed, &track);
                }
            }
        }
    }

    /// Pools the player, polling a bounded number of times while the queue
    /// is empty.
    async fn next_track(&self) -> Next {
        let max_tries = self.ctx.player.max_pool_tries;
        let delay = self.ctx.player.pool_try_delay();
        let mut tries = 0;

        loop {
            if let Some(track) = self.player.pool() {
                return Next::Track(track);
            }
            if tries >= max_tries {
                return Next::Exhausted;
            }
            tries += 1;

            if tokio::time::timeout(delay, until_stopped(&self.signals))
                .await
                .is_ok()
            {
                return Next::Stopped;
            }
        }
    }

    async fn play(
        &self,
        track: &Track,
        state: &TrackState,
        conn: &dyn VoiceConnection,
    ) -> PlayerResult<TrackEnd> {
        let start = Instant::now();

        let stream = {
            let fetch = self.ctx.fetcher.fetch(&track.data.play_query);
            tokio::pin!(fetch);
            loop {
                tokio::select! {
                    biased;
                    sig = self.signals.recv_async() => match sig {
                        Ok(Interrupt::Skip(id)) if id == track.id => return Ok(TrackEnd::Skipped),
                        Ok(Interrupt::Stop) | Err(_) => return Ok(TrackEnd::Stopped),
                        // the paused flag is checked once frames flow
                        Ok(_) => continue,
                    },
                    res = &mut fetch => break res?,
                }
            }
        };
        let fetched_in = start.elapsed();

        let opts = EncodeOptions::from_config(&self.ctx.encoder).with_volume(self.player.volume());
        let frame_duration = opts.frame_duration.as_duration();
        let session = (self.ctx.open_session)(stream, opts);

        let mut paused_for = Duration::ZERO;
        let mut sent: u32 = 0;
        let result = self
            .pump(track, &session, state, frame_duration, conn, &mut paused_for, &mut sent)
            .await;
        let _ = session.close();

        let took = start.elapsed();
        debug!(
            guild_id = %self.guild_id,
            track_id = %track.id,
            frame_count = sent,
            fetched_in = ?round_ms(fetched_in),
            took = ?round_ms(took),
            active = ?round_ms(took.saturating_sub(paused_for)),
            paused = ?round_ms(paused_for),
            progress = ?round_ms(state.progress()),
            "Track ended"
        );

        match result {
            Ok(TrackEnd::Finished) if sent == 0 => Err(PlayerError::Transcode(
                "stream produced no audio".to_string(),
            )),
            other => other,
        }
    }

    /// Moves frames from `session` to the voice sink until the stream ends
    /// or an interrupt ends the track.
    #[allow(clippy::too_many_arguments)]
    async fn pump(
        &self,
        track: &Track,
        session: &TranscodeSession,
        state: &TrackState,
        frame_duration: Duration,
        conn: &dyn VoiceConnection,
        paused_for: &mut Duration,
        sent: &mut u32,
    ) -> PlayerResult<TrackEnd> {
        let sink = conn.frames();
        let send_timeout = self.ctx.player.send_timeout();
        let mut pending: Option<Vec<u8>> = None;

        if self.player.is_paused() {
            if let Some(end) = self.hold(track, paused_for).await? {
                return Ok(end);
            }
        }

        loop {
            let frame = match pending.take() {
                Some(frame) => frame,
                None => tokio::select! {
                    biased;
                    sig = self.signals.recv_async() => {
                        if let Some(end) = self.interrupted(track, sig, paused_for).await? {
                            return Ok(end);
                        }
                        continue;
                    }
                    frame = session.read_opus() => match frame {
                        Some(frame) => frame,
                        None => return Ok(TrackEnd::Finished),
                    },
                },
            };

            let send = tokio::time::timeout(send_timeout, sink.send_async(frame.clone()));
            tokio::select! {
                biased;
                sig = self.signals.recv_async() => {
                    // not delivered yet, retried after the interrupt
                    pending = Some(frame);
                    if let Some(end) = self.interrupted(track, sig, paused_for).await? {
                        return Ok(end);
                    }
                }
                res = send => match res {
                    Ok(Ok(())) => {
                        state.advance(frame_duration);
                        *sent += 1;
                    }
                    Ok(Err(_)) | Err(_) => return Err(PlayerError::VoiceConnectionClosed),
                },
            }
        }
    }

    async fn interrupted(
        &self,
        track: &Track,
        sig: Result<Interrupt, flume::RecvError>,
        paused_for: &mut Duration,
    ) -> PlayerResult<Option<TrackEnd>> {
        match sig {
            Ok(Interrupt::Skip(id)) if id == track.id => Ok(Some(TrackEnd::Skipped)),
            Ok(Interrupt::Skip(id)) => {
                debug!(guild_id = %self.guild_id, skipped = %id, "Ignoring skip of a finished track");
                Ok(None)
            }
            Ok(Interrupt::Stop) | Err(_) => Ok(Some(TrackEnd::Stopped)),
            Ok(Interrupt::Pause) => self.hold(track, paused_for).await,
            Ok(Interrupt::Unpause) => Ok(None),
        }
    }

    /// Waits out a pause. Exceeding the maximum paused time is fatal.
    async fn hold(&self, track: &Track, paused_for: &mut Duration) -> PlayerResult<Option<TrackEnd>> {
        let start = Instant::now();
        let deadline = start + self.ctx.player.max_paused_time();
        debug!(guild_id = %self.guild_id, "Playback paused");

        let outcome = loop {
            match tokio::time::timeout_at(deadline, self.signals.recv_async()).await {
                Err(_) => break Err(PlayerError::TooMuchTimePaused),
                Ok(Ok(Interrupt::Unpause)) => break Ok(None),
                Ok(Ok(Interrupt::Skip(id))) if id == track.id => break Ok(Some(TrackEnd::Skipped)),
                Ok(Ok(Interrupt::Pause | Interrupt::Skip(_))) => continue,
                Ok(Ok(Interrupt::Stop)) | Ok(Err(_)) => break Ok(Some(TrackEnd::Stopped)),
            }
        };

        *paused_for += start.elapsed();
        debug!(guild_id = %self.guild_id, paused = ?round_ms(start.elapsed()), "Playback resumed");
        outcome
    }

    fn announce(&self, kind: NotificationKind, track: &Track) {
        let Some(channel_id) = self.player.message_channel() else {
            return;
        };
        self.ctx.notifier.send(Notification {
            kind,
            guild_id: self.guild_id,
            channel_id,
            track: Some(track.data.clone()),
        });
    }
}

/// Resolves once a stop arrives. Other interrupts are meaningless while no
/// track is playing and are dropped.
async fn until_stopped(signals: &flume::Receiver<Interrupt>) {
    loop {
        match signals.recv_async().await {
            Ok(Interrupt::Stop) | Err(_) => return,
            Ok(other) => debug!(signal = %other, "Ignoring signal while idle"),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::{
        common::types::ChannelId,
        encoder::demux::tests::opus_stream,
        player::{
            messenger::{Messenger, tests::RecordingMessenger},
            track::tests::{data, track},
        },
        sources::manager::tests::FakePlatform,
        voice::tests::FakeVoice,
    };

    pub(crate) fn passthrough(input: InputStream, opts: EncodeOptions) -> TranscodeSession {
        TranscodeSession::from_container(input, opts.buffered_frames)
    }

    pub(crate) fn fast_config() -> PlayerConfig {
        PlayerConfig {
            max_pool_tries: 0,
            pool_try_delay_ms: 10,
            queue_end_delay_ms: 0,
            ..PlayerConfig::default()
        }
    }

    /// Platform that knows tracks "a" and "b", each streaming `frames` frames.
    pub(crate) fn platform(frames: usize) -> FakePlatform {
        let payload = [0xfcu8, 0xff, 0xfe];
        let refs: Vec<&[u8]> = (0..frames).map(|_| &payload[..]).collect();
        let mut platform = FakePlatform::new(vec![data("a", 180), data("b", 200)]);
        platform.stream_body = opus_stream(&refs);
        platform
    }

    pub(crate) fn context(
        platform: FakePlatform,
        voice: FakeVoice,
        messenger: Arc<dyn Messenger>,
        player: PlayerConfig,
    ) -> Arc<PlaybackContext> {
        Arc::new(PlaybackContext {
            fetcher: Arc::new(TrackFetcher::with_platforms(
                Arc::new(platform),
                Vec::new(),
                Vec::new(),
            )),
            voice: Arc::new(voice),
            notifier: Notifier::spawn(messenger),
            player,
            encoder: EncoderConfig::default(),
            open_session: passthrough,
        })
    }

    fn new_player() -> (Arc<GuildPlayer>, flume::Receiver<Interrupt>) {
        let (player, rx) = GuildPlayer::new(GuildId(1), ChannelId(2), 100);
        player.set_message_channel(ChannelId(3));
        (Arc::new(player), rx)
    }

    async fn wait_current(player: &GuildPlayer, name: &str) -> Arc<TrackState> {
        for _ in 0..500 {
            if let Some(t) = player.get_current().filter(|t| t.data.name == name) {
                return t.state.unwrap();
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("track {name} never became current");
    }

    #[tokio::test]
    async fn test_progress_is_exact_across_pause() {
        let messenger = Arc::new(RecordingMessenger::default());
        let ctx = context(platform(50), FakeVoice::new(), messenger.clone(), fast_config());
        let (player, rx) = new_player();

        assert!(player.pause().await.unwrap());
        player.add_track(track("a", 180)).unwrap();
        let job = tokio::spawn(PlaybackJob::new(ctx, player.clone(), rx).run());

        let state = wait_current(&player, "a").await;
        assert_eq!(state.progress(), Duration::ZERO);
        assert!(player.unpause().await.unwrap());

        let end = tokio::time::timeout(Duration::from_secs(5), job)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(end.unwrap(), JobEnd::QueueExhausted);
        assert_eq!(state.progress(), Duration::from_millis(50 * 20));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            messenger.kinds(),
            vec![NotificationKind::TrackStarted, NotificationKind::QueueEnded]
        );
        assert!(player.is_closed());
    }

    #[tokio::test]
    async fn test_skip_while_paused_moves_to_next() {
        let messenger = Arc::new(RecordingMessenger::default());
        let ctx = context(platform(10), FakeVoice::new(), messenger.clone(), fast_config());
        let (player, rx) = new_player();

        player.pause().await.unwrap();
        player.add_track(track("a", 180)).unwrap();
        player.add_track(track("b", 200)).unwrap();
        let job = tokio::spawn(PlaybackJob::new(ctx, player.clone(), rx).run());

        let a = wait_current(&player, "a").await;
        let skipped = player.skip().await.unwrap().unwrap();
        assert_eq!(skipped.data.name, "a");

        let b = wait_current(&player, "b").await;
        player.unpause().await.unwrap();

        let end = tokio::time::timeout(Duration::from_secs(5), job)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(end.unwrap(), JobEnd::QueueExhausted);
        assert_eq!(a.progress(), Duration::ZERO);
        assert_eq!(b.progress(), Duration::from_millis(200));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_pause_and_unpause_leave_no_stray_hold() {
        let mut voice = FakeVoice::new();
        voice.stalled = true;
        let config = PlayerConfig {
            max_paused_secs: 1,
            send_timeout_ms: 60_000,
            ..fast_config()
        };
        let ctx = context(
            platform(50),
            voice,
            Arc::new(RecordingMessenger::default()),
            config,
        );
        let (player, rx) = new_player();
        player.add_track(track("a", 180)).unwrap();
        let job = tokio::spawn(PlaybackJob::new(ctx, player.clone(), rx).run());
        wait_current(&player, "a").await;

        for _ in 0..200 {
            let (p1, p2) = (player.clone(), player.clone());
            let pause = tokio::spawn(async move { p1.pause().await });
            let unpause = tokio::spawn(async move { p2.unpause().await });
            pause.await.unwrap().unwrap();
            unpause.await.unwrap().unwrap();
        }
        player.unpause().await.unwrap();
        assert!(!player.is_paused());

        // a hold out of step with the flag would hit the pause limit here
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(!player.is_closed());

        player.stop().await.unwrap();
        let end = tokio::time::timeout(Duration::from_secs(5), job)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(end.unwrap(), JobEnd::Stopped);
    }

    #[tokio::test]
    async fn test_failed_fetch_continues_with_next_track() {
        let messenger = Arc::new(RecordingMessenger::default());
        let ctx = context(platform(3), FakeVoice::new(), messenger.clone(), fast_config());
        let (player, rx) = new_player();

        player.add_track(track("missing", 10)).unwrap();
        player.add_track(track("a", 180)).unwrap();
        let end = PlaybackJob::new(ctx, player, rx).run().await;
        assert_eq!(end.unwrap(), JobEnd::QueueExhausted);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            messenger.kinds(),
            vec![
                NotificationKind::TrackStarted,
                NotificationKind::TrackFailed,
                NotificationKind::TrackStarted,
                NotificationKind::QueueEnded,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_timeout_is_fatal() {
        let messenger = Arc::new(RecordingMessenger::default());
        let ctx = context(platform(10), FakeVoice::new(), messenger, fast_config());
        let (player, rx) = new_player();

        player.pause().await.unwrap();
        player.add_track(track("a", 180)).unwrap();
        let end = PlaybackJob::new(ctx, player.clone(), rx).run().await;

        assert!(matches!(end, Err(PlayerError::TooMuchTimePaused)));
        assert!(player.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_voice_is_fatal() {
        let mut voice = FakeVoice::new();
        voice.stalled = true;
        let disconnected = voice.disconnected.clone();
        let messenger = Arc::new(RecordingMessenger::default());
        let ctx = context(platform(10), voice, messenger, fast_config());
        let (player, rx) = new_player();

        player.add_track(track("a", 180)).unwrap();
        let end = PlaybackJob::new(ctx, player, rx).run().await;

        assert!(matches!(end, Err(PlayerError::VoiceConnectionClosed)));
        assert!(disconnected.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_stop_while_waiting_for_tracks() {
        let config = PlayerConfig {
            max_pool_tries: 100,
            pool_try_delay_ms: 1_000,
            ..fast_config()
        };
        let messenger = Arc::new(RecordingMessenger::default());
        let ctx = context(platform(3), FakeVoice::new(), messenger, config);
        let (player, rx) = new_player();

        let job = tokio::spawn(PlaybackJob::new(ctx, player.clone(), rx).run());
        tokio::time::timeout(Duration::from_secs(1), player.stop())
            .await
            .unwrap()
            .unwrap();

        let end = tokio::time::timeout(Duration::from_secs(1), job)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(end.unwrap(), JobEnd::Stopped);
        // the job is gone, so further signals fail instead of blocking
        assert!(matches!(player.stop().await, Err(PlayerError::NoActivePlayer)));
    }

    #[tokio::test]
    async fn test_voice_join_failure_ends_job() {
        let mut voice = FakeVoice::new();
        voice.fail_join = true;
        let messenger = Arc::new(RecordingMessenger::default());
        let ctx = context(platform(3), voice, messenger, fast_config());
        let (player, rx) = new_player();

        player.add_track(track("a", 180)).unwrap();
        let end = PlaybackJob::new(ctx, player.clone(), rx).run().await;
        assert!(matches!(end, Err(PlayerError::VoiceJoin(_))));
        assert!(player.add_track(track("b", 10)).is_err());
    }
}
