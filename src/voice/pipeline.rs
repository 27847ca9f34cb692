//! Capture and playback pipelines.
//!
//! ```text
//! mic callback ─▸ FrameAssembler ─▸ capture queue ─▸ run_capture_sender ─▸ RealtimeClient
//! dispatcher   ─▸ playback queue ─▸ run_playback (thread) ─▸ PlaybackSink
//! ```
//!
//! The device callback only copies into the capture queue. Level metering
//! and barge-in evaluation happen in the sender loop, which needs the
//! engine lock.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::engine::DuplexEngine;
use super::queue::{AudioFrame, FrameQueue};
use super::RealtimeClient;

/// Upper bound on how long the playback loop blocks before re-checking shutdown.
pub const PLAYBACK_POLL: Duration = Duration::from_millis(100);

// ── Playback sink ────────────────────────────────────────────────

/// Output device accepting PCM16 frames.
pub trait PlaybackSink: Send + Sync {
    /// Write one frame. May block for a bounded time while the device drains.
    fn write(&self, frame: &AudioFrame) -> anyhow::Result<()>;

    /// Drop audio already handed to the device but not yet played.
    fn clear(&self) {}
}

// ── Frame assembly ───────────────────────────────────────────────

/// Re-chunks arbitrary device buffers into fixed-size frames.
#[derive(Debug)]
pub struct FrameAssembler {
    frame_samples: usize,
    pending: Vec<i16>,
}

impl FrameAssembler {
    pub fn new(frame_samples: usize) -> Self {
        let frame_samples = frame_samples.max(1);
        Self {
            frame_samples,
            pending: Vec::with_capacity(frame_samples * 2),
        }
    }

    /// Append samples, emitting every completed frame in order.
    pub fn push(&mut self, samples: &[i16], mut emit: impl FnMut(AudioFrame)) {
        self.pending.extend_from_slice(samples);
        let mut start = 0;
        while self.pending.len() - start >= self.frame_samples {
            let end = start + self.frame_samples;
            emit(AudioFrame::from_samples(&self.pending[start..end]));
            start = end;
        }
        self.pending.drain(..start);
    }

    /// Samples waiting for a full frame.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}

// ── Capture sender ───────────────────────────────────────────────

/// Drain the capture queue to the remote service in arrival order.
///
/// Each frame updates the mic level and runs barge-in evaluation before
/// it is sent.
pub async fn run_capture_sender(
    engine: Arc<DuplexEngine>,
    client: Arc<dyn RealtimeClient>,
    shutdown: CancellationToken,
) {
    let capture = Arc::clone(engine.capture_queue());
    let mut sent: u64 = 0;

    loop {
        let frame = tokio::select! {
            () = shutdown.cancelled() => break,
            frame = capture.pop() => frame,
        };

        engine.on_capture_frame(&frame, Instant::now());

        if let Err(e) = client.send_audio(frame).await {
            tracing::warn!(
                session_id = %engine.session_id(),
                error = %e,
                "Audio send failed, stopping capture sender"
            );
            break;
        }
        sent += 1;
    }

    tracing::debug!(
        session_id = %engine.session_id(),
        frames_sent = sent,
        frames_dropped = capture.dropped(),
        "Capture sender stopped"
    );
}

// ── Playback consumer ────────────────────────────────────────────

/// Start [`run_playback`] on its own named thread.
pub fn spawn_playback(
    queue: Arc<FrameQueue>,
    sink: Arc<dyn PlaybackSink>,
    shutdown: CancellationToken,
) -> anyhow::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("parlar-playback".into())
        .spawn(move || run_playback(queue, sink, shutdown))
        .map_err(|e| anyhow::anyhow!("Failed to spawn playback thread: {e}"))
}

/// Blocking playback loop; run it on a dedicated thread.
///
/// Write failures are logged and skipped. Returns once `shutdown` fires,
/// observed at least every [`PLAYBACK_POLL`].
pub fn run_playback(
    queue: Arc<FrameQueue>,
    sink: Arc<dyn PlaybackSink>,
    shutdown: CancellationToken,
) {
    let mut written: u64 = 0;
    let mut failures: u64 = 0;

    while !shutdown.is_cancelled() {
        let Some(frame) = queue.pop_timeout(PLAYBACK_POLL) else {
            continue;
        };
        match sink.write(&frame) {
            Ok(()) => written += 1,
            Err(e) => {
                failures += 1;
                if failures == 1 || failures.is_multiple_of(50) {
                    tracing::warn!(error = %e, failures, "Playback write failed");
                }
            }
        }
    }

    tracing::debug!(
        frames_written = written,
        failures,
        frames_evicted = queue.dropped(),
        "Playback loop stopped"
    );
}
