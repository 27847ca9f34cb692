//! Inbound event dispatcher.
//!
//! Sole reader of the realtime event stream. Events are handled one at a
//! time in arrival order, each inside a single pass through the engine
//! lock; presentation events are emitted after the lock is released.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::engine::DuplexEngine;
use super::events::{InboundEvent, ServerEvent, SessionEvent};
use super::queue::AudioFrame;
use super::responder::ResponseCommand;
use super::state::{AssistantItemRef, DeltaDisposition};

pub struct Dispatcher {
    engine: Arc<DuplexEngine>,
    audio_deltas: u64,
    suppressed: u64,
}

impl Dispatcher {
    pub fn new(engine: Arc<DuplexEngine>) -> Self {
        Self {
            engine,
            audio_deltas: 0,
            suppressed: 0,
        }
    }

    /// Apply one inbound event.
    pub fn handle(&mut self, inbound: InboundEvent) {
        let InboundEvent { event, received_at } = inbound;
        tracing::trace!(event = event.kind(), "Dispatching realtime event");
        if let Some(surfaced) = self.apply(event, received_at) {
            self.engine.emit(surfaced);
        }
    }

    fn apply(&mut self, event: ServerEvent, at: Instant) -> Option<SessionEvent> {
        let engine = Arc::clone(&self.engine);
        let mut st = engine.lock();

        match event {
            ServerEvent::SessionReady => {
                tracing::info!(session_id = %engine.session_id(), "Realtime session configured");
                Some(SessionEvent::Ready)
            }
            ServerEvent::TurnCommitted { item_id } => {
                if st.on_turn_committed(item_id.as_deref()) {
                    let delay = engine.pacing().delay_after(&st.last_heard);
                    tracing::debug!(delay_ms = delay.as_millis() as u64, "Turn committed");
                    engine.request(ResponseCommand::Create { delay });
                } else {
                    tracing::debug!(state = ?st.response, "Turn committed while response pending");
                }
                None
            }
            ServerEvent::SpeechStarted => engine
                .barge_in()
                .on_speech_started(&mut st, at)
                .map(|hit| SessionEvent::Interrupted { source: hit.source }),
            ServerEvent::SpeechStopped => None,
            ServerEvent::AssistantItem { id } => {
                st.assistant_item = Some(AssistantItemRef::new(id));
                None
            }
            ServerEvent::UserItem { transcript } => {
                if let Some(text) = transcript.filter(|t| !t.trim().is_empty()) {
                    st.last_heard = text;
                }
                None
            }
            ServerEvent::AudioDelta { pcm } => {
                if st.on_output_delta(at) == DeltaDisposition::Suppressed {
                    self.suppressed += 1;
                    tracing::trace!(suppressed = self.suppressed, "Dropped stale audio delta");
                    return None;
                }
                let frame = AudioFrame::new(pcm);
                st.record_speaker(frame.level(), frame.len());
                self.audio_deltas += 1;
                if self.audio_deltas == 1 || self.audio_deltas.is_multiple_of(50) {
                    tracing::debug!(
                        session_id = %engine.session_id(),
                        chunk = self.audio_deltas,
                        pcm_bytes = frame.len(),
                        "Received audio delta"
                    );
                }
                // Pushed under the lock so a concurrent barge-in flush cannot miss it.
                engine.playback_queue().push(frame);
                None
            }
            ServerEvent::TextDelta { text } => {
                if st.on_output_delta(at) == DeltaDisposition::Suppressed {
                    self.suppressed += 1;
                    return None;
                }
                st.assistant_transcript.push(&text);
                Some(SessionEvent::AssistantText { delta: text })
            }
            ServerEvent::ResponseCreated { id } => {
                tracing::debug!(response_id = %id, "Response created");
                st.on_response_created(id);
                None
            }
            ServerEvent::AudioDone { response_id } | ServerEvent::TextDone { response_id } => st
                .on_output_done(response_id.as_deref())
                .then_some(SessionEvent::AssistantDone),
            ServerEvent::ResponseDone { response_id } => st
                .on_response_done(response_id.as_deref())
                .then_some(SessionEvent::AssistantDone),
            ServerEvent::TranscriptionDelta { item_id, text } => engine
                .barge_in()
                .on_user_partial(&mut st, item_id.as_deref(), &text, at)
                .map(|hit| SessionEvent::Interrupted { source: hit.source }),
            ServerEvent::TranscriptionCompleted { transcript } => {
                st.user_partial.clear();
                let text = transcript.trim().to_string();
                if text.is_empty() {
                    return None;
                }
                st.last_heard = text.clone();
                Some(SessionEvent::UserTranscript { text })
            }
            ServerEvent::Error { code, message } => {
                if st.on_error(code.as_deref()) {
                    tracing::warn!(
                        session_id = %engine.session_id(),
                        code = code.as_deref().unwrap_or("-"),
                        message = %message,
                        "Realtime error"
                    );
                    Some(SessionEvent::Error { code, message })
                } else {
                    tracing::debug!("Ignoring cancel race with a finished response");
                    None
                }
            }
            ServerEvent::Unknown { kind } => {
                tracing::trace!(kind = %kind, "Unhandled realtime event");
                None
            }
        }
    }

    /// Consume the inbound stream until it ends or shutdown fires.
    ///
    /// The end of the stream means the connection is gone, so it also
    /// triggers shutdown.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<InboundEvent>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                inbound = events.recv() => match inbound {
                    Some(inbound) => self.handle(inbound),
                    None => {
                        tracing::info!(
                            session_id = %self.engine.session_id(),
                            "Realtime event stream ended"
                        );
                        self.engine.emit(SessionEvent::Disconnected);
                        shutdown.cancel();
                        break;
                    }
                },
            }
        }
    }
}
