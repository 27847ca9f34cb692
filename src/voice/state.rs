//! Session state and the response lifecycle.
//!
//! [`SessionState`] is owned by the engine behind a single mutex. Every
//! transition below runs with that lock held, so a barge-in reset and an
//! arriving output delta can never interleave.
//!
//! ```text
//!  Idle ──commit──▸ AwaitingCreate ──first delta──▸ Active ──done──▸ Idle
//!                        │                            │
//!                        └──────── barge-in ──────────┴──▸ Cancelling ──▸ Idle
//! ```

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Error code the service returns when a cancel finds no active response.
///
/// Expected whenever a local cancel races a response that already finished.
pub const CANCEL_NOT_ACTIVE: &str = "response_cancel_not_active";

/// Cancelled responses remembered while their `response.done` is outstanding.
const STALE_RESPONSE_LIMIT: usize = 8;

// ── Response state ───────────────────────────────────────────────

/// Lifecycle of the assistant's current response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseState {
    /// No response requested.
    #[default]
    Idle,
    /// Turn committed and `response.create` scheduled; no output yet.
    AwaitingCreate,
    /// At least one output delta received.
    Active,
    /// Cancel issued; only observable inside the barge-in critical section.
    Cancelling,
}

impl ResponseState {
    /// Whether a response is requested or producing output.
    pub fn in_flight(self) -> bool {
        matches!(self, Self::AwaitingCreate | Self::Active)
    }
}

// ── Guard window and item reference ──────────────────────────────

/// End of the post-cancel suppression window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelGuard {
    until: Instant,
}

impl CancelGuard {
    pub fn starting_at(now: Instant, window: Duration) -> Self {
        Self { until: now + window }
    }

    /// Whether output arriving at `at` is stale.
    pub fn suppresses(&self, at: Instant) -> bool {
        at < self.until
    }

    pub fn until(&self) -> Instant {
        self.until
    }
}

/// Identifier of the latest assistant-authored conversation item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantItemRef(String);

impl AssistantItemRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

// ── Transcript ───────────────────────────────────────────────────

/// Append-only assistant transcript.
///
/// A new response starts a new turn logically; earlier text is kept.
#[derive(Debug, Clone, Default)]
pub struct TurnTranscript {
    text: String,
    turn_start: usize,
}

impl TurnTranscript {
    pub fn begin_turn(&mut self) {
        self.turn_start = self.text.len();
    }

    pub fn push(&mut self, delta: &str) {
        self.text.push_str(delta);
    }

    /// Text of the current turn.
    pub fn current(&self) -> &str {
        &self.text[self.turn_start..]
    }

    /// Everything received this session.
    pub fn full(&self) -> &str {
        &self.text
    }
}

// ── Session state ────────────────────────────────────────────────

/// What to do with an output delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaDisposition {
    /// Inside the guard window; discard.
    Suppressed,
    /// Accepted; the response is (now) active.
    Accepted,
}

/// Mutable state shared by the sender, dispatcher and barge-in controller.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub response: ResponseState,
    /// Set once `response.create` has actually gone out for the pending turn.
    pub create_issued: bool,
    /// Server id of the response in flight, once `response.created` names it.
    pub response_id: Option<String>,
    /// Input item of the user turn the pending response answers.
    pub answered_item: Option<String>,
    /// Cancelled responses whose `response.done` has not arrived. `None`
    /// marks a cancel that happened before the service named the response.
    pub stale_responses: VecDeque<Option<String>>,
    pub cancel_guard: Option<CancelGuard>,
    /// When the last barge-in fired (cooldown reference).
    pub last_cancel_at: Option<Instant>,
    pub assistant_item: Option<AssistantItemRef>,

    pub mic_level: f32,
    pub spk_level: f32,
    pub mic_bytes: u64,
    pub spk_bytes: u64,
    /// Consecutive capture frames at or above the barge-in threshold.
    pub loud_streak: u32,

    pub assistant_transcript: TurnTranscript,
    /// Last completed transcription of the user's speech.
    pub last_heard: String,
    /// Live transcription of the user's current utterance.
    pub user_partial: String,
    /// Input item `user_partial` belongs to.
    pub partial_item: Option<String>,
}

impl SessionState {
    /// Handle a committed user turn for input item `item_id`.
    ///
    /// Returns `true` when the caller must schedule exactly one
    /// `response.create`; `false` when a response is already pending.
    pub fn on_turn_committed(&mut self, item_id: Option<&str>) -> bool {
        if self.response != ResponseState::Idle {
            return false;
        }
        self.response = ResponseState::AwaitingCreate;
        self.create_issued = false;
        self.answered_item = item_id.map(str::to_string);
        true
    }

    /// Whether a live transcription of input item `item_id` is the user's
    /// own prompt for the pending response rather than talk-over.
    ///
    /// Without an item id, transcription seen before any output is
    /// attributed to the prompt.
    pub fn is_prompt_transcript(&self, item_id: Option<&str>) -> bool {
        match item_id {
            Some(id) => self.answered_item.as_deref() == Some(id),
            None => self.response == ResponseState::AwaitingCreate,
        }
    }

    /// Handle `response.created`.
    pub fn on_response_created(&mut self, id: String) {
        // Responses are created in request order, so the oldest unnamed
        // cancel is the one this belongs to.
        if let Some(slot) = self.stale_responses.iter_mut().find(|s| s.is_none()) {
            *slot = Some(id);
            return;
        }
        if self.response.in_flight() {
            self.response_id = Some(id);
        } else {
            self.remember_stale(Some(id));
        }
    }

    /// Record that `response.create` went out. Only valid while awaiting.
    pub fn mark_create_issued(&mut self) -> bool {
        if self.response == ResponseState::AwaitingCreate {
            self.create_issued = true;
            true
        } else {
            false
        }
    }

    /// Give up on a pending create that could not be sent.
    pub fn abandon_create(&mut self) -> bool {
        if self.response == ResponseState::AwaitingCreate {
            self.reset_response();
            true
        } else {
            false
        }
    }

    /// Whether output received at `at` falls in the guard window.
    pub fn suppresses(&self, at: Instant) -> bool {
        self.cancel_guard.is_some_and(|guard| guard.suppresses(at))
    }

    /// Handle an audio or text delta that arrived at `at`.
    pub fn on_output_delta(&mut self, at: Instant) -> DeltaDisposition {
        if self.suppresses(at) {
            return DeltaDisposition::Suppressed;
        }
        if self.response != ResponseState::Active {
            self.response = ResponseState::Active;
            self.assistant_transcript.begin_turn();
        }
        DeltaDisposition::Accepted
    }

    /// Handle `response.done`. Returns `true` if a response ended.
    ///
    /// Done events of cancelled responses are dropped. While awaiting, a
    /// done event can only end our response if the create request already
    /// went out; before that it belongs to an earlier response.
    pub fn on_response_done(&mut self, response_id: Option<&str>) -> bool {
        self.end_response(response_id, true)
    }

    /// Handle `response.audio.done` or `response.text.done`.
    ///
    /// Ends the response like [`Self::on_response_done`] but leaves a
    /// cancelled response remembered until its own `response.done`.
    pub fn on_output_done(&mut self, response_id: Option<&str>) -> bool {
        self.end_response(response_id, false)
    }

    fn end_response(&mut self, response_id: Option<&str>, last_event: bool) -> bool {
        if self.is_stale(response_id, last_event) {
            tracing::debug!(
                response_id = response_id.unwrap_or("-"),
                "Ignoring done event of a cancelled response"
            );
            return false;
        }
        if let (Some(id), Some(current)) = (response_id, self.response_id.as_deref()) {
            if id != current {
                return false;
            }
        }
        let ends = match self.response {
            ResponseState::Active | ResponseState::Cancelling => true,
            ResponseState::AwaitingCreate => self.create_issued,
            ResponseState::Idle => false,
        };
        if ends {
            self.reset_response();
        }
        ends
    }

    /// Handle a remote error. Returns `true` if it should be surfaced.
    pub fn on_error(&mut self, code: Option<&str>) -> bool {
        if code == Some(CANCEL_NOT_ACTIVE) {
            return false;
        }
        self.reset_response();
        true
    }

    /// Enter `Cancelling`. Returns the item to truncate, if known.
    pub fn begin_cancel(&mut self) -> Option<AssistantItemRef> {
        let exists_remotely = match self.response {
            ResponseState::Active => true,
            ResponseState::AwaitingCreate => self.create_issued,
            ResponseState::Idle | ResponseState::Cancelling => false,
        };
        if exists_remotely {
            let id = self.response_id.take();
            self.remember_stale(id);
        }
        self.response = ResponseState::Cancelling;
        self.assistant_item.clone()
    }

    /// Finish a locally issued cancel: back to `Idle` and arm the guard window.
    pub fn finish_cancel(&mut self, now: Instant, suppression: Duration) -> CancelGuard {
        self.reset_response();
        let guard = CancelGuard::starting_at(now, suppression);
        self.cancel_guard = Some(guard);
        self.last_cancel_at = Some(now);
        self.loud_streak = 0;
        self.user_partial.clear();
        self.partial_item = None;
        guard
    }

    pub fn record_mic(&mut self, level: f32, bytes: usize) {
        self.mic_level = level;
        self.mic_bytes += bytes as u64;
    }

    pub fn record_speaker(&mut self, level: f32, bytes: usize) {
        self.spk_level = level;
        self.spk_bytes += bytes as u64;
    }

    fn reset_response(&mut self) {
        self.response = ResponseState::Idle;
        self.create_issued = false;
        self.response_id = None;
    }

    fn remember_stale(&mut self, id: Option<String>) {
        if self.stale_responses.len() == STALE_RESPONSE_LIMIT {
            self.stale_responses.pop_front();
        }
        self.stale_responses.push_back(id);
    }

    /// Whether a done event for `response_id` belongs to a cancelled
    /// response. `forget` drops the record once matched.
    fn is_stale(&mut self, response_id: Option<&str>, forget: bool) -> bool {
        let position = match response_id {
            Some(id) => self
                .stale_responses
                .iter()
                .position(|s| s.as_deref() == Some(id)),
            None if self.stale_responses.is_empty() => None,
            None => Some(0),
        };
        let Some(position) = position else {
            return false;
        };
        if forget {
            self.stale_responses.remove(position);
        }
        true
    }
}
