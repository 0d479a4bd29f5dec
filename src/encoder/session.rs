use std::{
    future::Future,
    process::Stdio,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::{Duration, Instant},
};

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Command,
    sync::oneshot,
};
use tokio_util::{io::ReaderStream, sync::CancellationToken};
use tracing::{debug, trace, warn};

use super::{
    EncodeOptions,
    demux::{ChunkReader, OggOpusDemuxer},
};
use crate::common::{
    errors::{PlayerError, PlayerResult},
    utils::round_ms,
};

/// Raw compressed audio fed into the transcoder.
pub type InputStream = Box<dyn AsyncRead + Send + Unpin>;

/// Container chunks buffered between the async reader and the demuxer.
const CHUNK_BUFFER: usize = 16;

/// How often a demuxer blocked on a full frame queue checks for a kill.
const KILL_POLL: Duration = Duration::from_millis(50);

/// One transcoder run: compressed audio in, Opus frames out.
///
/// Frames are buffered in a bounded queue filled by a background task.
/// `read_opus` must only be called from a single consumer.
pub struct TranscodeSession {
    frames: flume::Receiver<Vec<u8>>,
    kill: Mutex<Option<oneshot::Sender<()>>>,
    running: Arc<AtomicBool>,
    frame_count: Arc<AtomicU32>,
}

impl TranscodeSession {
    /// Spawns ffmpeg with `input` wired to its stdin.
    pub fn new(input: InputStream, opts: EncodeOptions) -> Self {
        let capacity = opts.buffered_frames;
        Self::spawn(capacity, move |tx, kill, count| {
            run_ffmpeg(input, opts, tx, kill, count)
        })
    }

    /// Demuxes an already-encoded Ogg/Opus stream without a subprocess.
    pub fn from_container<R>(container: R, capacity: usize) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::spawn(capacity, move |tx, kill, count| async move {
            tokio::select! {
                res = pump_packets(container, &tx, &count) => res,
                _ = kill => Ok(()),
            }
        })
    }

    fn spawn<F, Fut>(capacity: usize, producer: F) -> Self
    where
        F: FnOnce(flume::Sender<Vec<u8>>, oneshot::Receiver<()>, Arc<AtomicU32>) -> Fut,
        Fut: Future<Output = PlayerResult<()>> + Send + 'static,
    {
        let (tx, rx) = flume::bounded(capacity.max(1));
        let (kill_tx, kill_rx) = oneshot::channel();
        let running = Arc::new(AtomicBool::new(true));
        let frame_count = Arc::new(AtomicU32::new(0));

        let fut = producer(tx, kill_rx, frame_count.clone());
        let running_flag = running.clone();
        let count = frame_count.clone();
        tokio::spawn(async move {
            let start = Instant::now();
            let res = fut.await;
            running_flag.store(false, Ordering::Release);

            let took = round_ms(start.elapsed());
            let frame_count = count.load(Ordering::Relaxed);
            match res {
                Ok(()) => debug!(frame_count, ?took, "Finished encoding session"),
                Err(e) => warn!(
                    frame_count,
                    ?took,
                    error = %e,
                    "Error caught in encoding session"
                ),
            }
        });

        Self {
            frames: rx,
            kill: Mutex::new(Some(kill_tx)),
            running,
            frame_count,
        }
    }

    /// Next Opus frame, or `None` once the stream has ended and the buffer is drained.
    pub async fn read_opus(&self) -> Option<Vec<u8>> {
        self.frames.recv_async().await.ok()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count.load(Ordering::Relaxed)
    }

    /// Stops the transcoder and discards buffered frames.
    ///
    /// Returns `NotRunning` when the session already finished or was closed.
    pub fn close(&self) -> PlayerResult<()> {
        let was_running = self.running.swap(false, Ordering::AcqRel);
        let kill = self.kill.lock().take();

        let result = match (was_running, kill) {
            (true, Some(kill)) => {
                let _ = kill.send(());
                Ok(())
            }
            _ => Err(PlayerError::NotRunning),
        };

        while self.frames.try_recv().is_ok() {}
        result
    }
}

impl Drop for TranscodeSession {
    fn drop(&mut self) {
        if let Some(kill) = self.kill.get_mut().take() {
            let _ = kill.send(());
        }
    }
}

async fn run_ffmpeg(
    mut input: InputStream,
    opts: EncodeOptions,
    tx: flume::Sender<Vec<u8>>,
    mut kill: oneshot::Receiver<()>,
    frame_count: Arc<AtomicU32>,
) -> PlayerResult<()> {
    let mut child = Command::new(&opts.ffmpeg_path)
        .args(opts.ffmpeg_args())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| PlayerError::Transcode(format!("spawn {}: {}", opts.ffmpeg_path, e)))?;

    debug!(pid = ?child.id(), "FFmpeg process started");

    let (Some(mut stdin), Some(stdout), Some(stderr)) =
        (child.stdin.take(), child.stdout.take(), child.stderr.take())
    else {
        let _ = child.start_kill();
        return Err(PlayerError::Transcode("ffmpeg pipes unavailable".to_string()));
    };

    // stdin is closed when the copy ends so ffmpeg sees EOF
    let feeder = tokio::spawn(async move {
        match tokio::io::copy(&mut input, &mut stdin).await {
            Ok(bytes) => trace!(bytes, "Input stream exhausted"),
            Err(e) => debug!("Input stream copy stopped: {}", e),
        }
    });

    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            trace!("FFMPEG: {}", line);
        }
    });

    let pumped = tokio::select! {
        res = pump_packets(stdout, &tx, &frame_count) => Some(res),
        _ = &mut kill => None,
    };
    drop(tx);

    let Some(pumped) = pumped else {
        feeder.abort();
        let _ = child.start_kill();
        let _ = child.wait().await;
        debug!("FFmpeg process killed");
        return Ok(());
    };

    if let Err(e) = pumped {
        feeder.abort();
        let _ = child.start_kill();
        let _ = child.wait().await;
        return Err(e);
    }

    let status = child.wait().await?;
    feeder.abort();
    if !status.success() {
        return Err(PlayerError::Transcode(format!("ffmpeg exited with {}", status)));
    }

    debug!(exit_code = ?status.code(), "FFmpeg process stopped");
    Ok(())
}

/// Demuxes the Ogg container read from `reader` and forwards its Opus
/// packets to `tx`.
///
/// Symphonia reads synchronously, so demuxing runs on a blocking thread fed
/// with chunks from here. Dropping this future ends that thread.
async fn pump_packets<R: AsyncRead + Unpin>(
    reader: R,
    tx: &flume::Sender<Vec<u8>>,
    frame_count: &Arc<AtomicU32>,
) -> PlayerResult<()> {
    let (chunk_tx, chunk_rx) = flume::bounded::<Vec<u8>>(CHUNK_BUFFER);
    let cancel = CancellationToken::new();

    let mut demux = {
        let (frames, count, cancel) = (tx.clone(), frame_count.clone(), cancel.clone());
        tokio::task::spawn_blocking(move || {
            demux_packets(ChunkReader::new(chunk_rx), &frames, &count, &cancel)
        })
    };
    // fires early only when the session is killed mid-stream
    let _cancel_on_drop = cancel.drop_guard();

    let feed = async move {
        let mut chunks = ReaderStream::new(reader);
        while let Some(chunk) = chunks.next().await {
            if chunk_tx.send_async(chunk?.to_vec()).await.is_err() {
                // demuxer gave up
                break;
            }
        }
        drop(chunk_tx);
        Ok::<_, PlayerError>(())
    };

    let fed = tokio::select! {
        fed = feed => fed,
        demuxed = &mut demux => return join_demuxer(demuxed),
    };
    join_demuxer(demux.await)?;
    fed
}

fn join_demuxer(res: Result<PlayerResult<()>, tokio::task::JoinError>) -> PlayerResult<()> {
    res.map_err(|e| PlayerError::Transcode(format!("demuxer task failed: {}", e)))?
}

fn demux_packets(
    source: ChunkReader,
    frames: &flume::Sender<Vec<u8>>,
    frame_count: &AtomicU32,
    cancel: &CancellationToken,
) -> PlayerResult<()> {
    let demux_error = |e: symphonia::core::errors::Error| PlayerError::Transcode(format!("ogg: {}", e));

    let Some(mut demuxer) = OggOpusDemuxer::open(source).map_err(demux_error)? else {
        return Err(PlayerError::Transcode("ogg: no opus track".to_string()));
    };

    while let Some(packet) = demuxer.next_packet().map_err(demux_error)? {
        if !forward(frames, packet, cancel) {
            // consumer went away
            break;
        }
        frame_count.fetch_add(1, Ordering::Relaxed);
    }

    trace!(frame_count = frame_count.load(Ordering::Relaxed), "Ogg stream ended");
    Ok(())
}

/// Blocking send that gives up once the session is killed or the consumer is gone.
fn forward(frames: &flume::Sender<Vec<u8>>, mut packet: Vec<u8>, cancel: &CancellationToken) -> bool {
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        match frames.send_timeout(packet, KILL_POLL) {
            Ok(()) => return true,
            Err(flume::SendTimeoutError::Timeout(p)) => packet = p,
            Err(flume::SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::encoder::demux::tests::opus_stream;

    #[tokio::test]
    async fn test_three_frames_then_end_of_stream() {
        let frame = [0xfcu8, 0xff, 0xfe];
        let data = opus_stream(&[&frame, &frame, &frame]);
        let session = TranscodeSession::from_container(std::io::Cursor::new(data), 100);

        for _ in 0..3 {
            assert_eq!(session.read_opus().await.as_deref(), Some(&frame[..]));
        }
        assert_eq!(session.read_opus().await, None);
        assert_eq!(session.frame_count(), 3);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        // writer half kept open so the stream never ends
        let (_writer, reader) = tokio::io::duplex(64);
        let session = TranscodeSession::from_container(reader, 4);

        assert!(session.close().is_ok());
        assert!(matches!(session.close(), Err(PlayerError::NotRunning)));
        assert!(!session.is_running());
    }

    #[tokio::test]
    async fn test_close_unblocks_full_producer() {
        let frames: Vec<[u8; 2]> = (0..10u8).map(|i| [0xfc, i]).collect();
        let refs: Vec<&[u8]> = frames.iter().map(|f| &f[..]).collect();
        let data = opus_stream(&refs);
        let session = TranscodeSession::from_container(std::io::Cursor::new(data), 2);

        // let the producer fill the two-slot queue and park
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = session.close();

        let end = tokio::time::timeout(Duration::from_secs(1), async {
            while session.read_opus().await.is_some() {}
        })
        .await;
        assert!(end.is_ok(), "producer did not shut down after close");
    }

    #[tokio::test]
    async fn test_non_ogg_input_ends_without_frames() {
        let garbage = b"RIFF\x00\x00\x00\x00WAVEfmt garbage garbage".to_vec();
        let session = TranscodeSession::from_container(std::io::Cursor::new(garbage), 4);

        assert_eq!(session.read_opus().await, None);
        assert_eq!(session.frame_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_binary_ends_without_frames() {
        let opts = EncodeOptions {
            ffmpeg_path: "/nonexistent/ffmpeg-binary".to_string(),
            ..EncodeOptions::default()
        };
        let input: InputStream = Box::new(std::io::Cursor::new(Vec::<u8>::new()));
        let session = TranscodeSession::new(input, opts);

        assert_eq!(session.read_opus().await, None);
    }
}
