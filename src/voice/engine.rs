//! Shared core of a duplex session.
//!
//! [`DuplexEngine`] owns the [`SessionState`] behind one mutex, both frame
//! queues and the barge-in controller. The capture sender, dispatcher,
//! responder and command handler all go through it.

use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

use super::barge_in::{BargeInController, Interruption};
use super::events::SessionEvent;
use super::pipeline::PlaybackSink;
use super::queue::{AudioFrame, FrameQueue};
use super::responder::ResponseCommand;
use super::state::{ResponseState, SessionState};
use crate::config::{Config, ResponseConfig};

/// Receiving ends handed to the responder and the presentation layer.
pub struct EngineChannels {
    pub commands: mpsc::UnboundedReceiver<ResponseCommand>,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

pub struct DuplexEngine {
    session_id: String,
    state: Mutex<SessionState>,
    barge_in: BargeInController,
    capture: Arc<FrameQueue>,
    playback: Arc<FrameQueue>,
    pacing: ResponseConfig,
    commands: mpsc::UnboundedSender<ResponseCommand>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl DuplexEngine {
    /// Build the engine and its queues.
    ///
    /// `sink` is cleared alongside the playback queue on barge-in.
    pub fn new(
        session_id: impl Into<String>,
        config: &Config,
        sink: Option<Arc<dyn PlaybackSink>>,
    ) -> (Arc<Self>, EngineChannels) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let capture = Arc::new(FrameQueue::capture(config.audio.capture_queue_frames));
        let playback = Arc::new(FrameQueue::playback(config.audio.playback_queue_frames));
        let barge_in = BargeInController::new(
            &config.barge_in,
            Arc::clone(&playback),
            sink,
            commands_tx.clone(),
        );

        let engine = Arc::new(Self {
            session_id: session_id.into(),
            state: Mutex::new(SessionState::default()),
            barge_in,
            capture,
            playback,
            pacing: config.response.clone(),
            commands: commands_tx,
            events: events_tx,
        });

        (
            engine,
            EngineChannels {
                commands: commands_rx,
                events: events_rx,
            },
        )
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn capture_queue(&self) -> &Arc<FrameQueue> {
        &self.capture
    }

    pub fn playback_queue(&self) -> &Arc<FrameQueue> {
        &self.playback
    }

    pub fn barge_in(&self) -> &BargeInController {
        &self.barge_in
    }

    pub fn pacing(&self) -> &ResponseConfig {
        &self.pacing
    }

    /// Enter the session critical section.
    ///
    /// Never hold the guard across an `.await`.
    pub fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock()
    }

    /// Copy of the current state, for presentation.
    pub fn snapshot(&self) -> SessionState {
        self.state.lock().clone()
    }

    pub fn response_state(&self) -> ResponseState {
        self.state.lock().response
    }

    /// Meter a captured frame and evaluate barge-in on it.
    pub fn on_capture_frame(&self, frame: &AudioFrame, now: Instant) -> Option<Interruption> {
        let level = frame.level();
        let hit = {
            let mut st = self.state.lock();
            st.record_mic(level, frame.len());
            self.barge_in.on_mic_level(&mut st, level, now)
        };
        if let Some(hit) = &hit {
            self.emit(SessionEvent::Interrupted { source: hit.source });
        }
        hit
    }

    /// Manual interrupt from the command source.
    pub fn interrupt(&self, now: Instant) -> Option<Interruption> {
        let hit = {
            let mut st = self.state.lock();
            self.barge_in.manual(&mut st, now)
        };
        if let Some(hit) = &hit {
            self.emit(SessionEvent::Interrupted { source: hit.source });
        }
        hit
    }

    /// Queue a request for the responder.
    pub fn request(&self, command: ResponseCommand) {
        if self.commands.send(command).is_err() {
            tracing::debug!(session_id = %self.session_id, "Responder stopped; request dropped");
        }
    }

    /// Surface an event to presentation. Dropped if nobody listens.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}
