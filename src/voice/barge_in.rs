//! Barge-in: cancel the assistant when the user talks over it.
//!
//! Every trigger source funnels into one critical section, run with the
//! engine lock held by the caller:
//!
//! 1. in-flight check and cooldown
//! 2. queue `response.cancel` (plus truncate of the last assistant item)
//! 3. reset to `Idle` and arm the guard window
//! 4. flush the playback queue and the device buffer
//!
//! Because the dispatcher enqueues playback audio under the same lock, no
//! delta can land between the flush and the guard activation.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

use super::events::InterruptSource;
use super::pipeline::PlaybackSink;
use super::queue::FrameQueue;
use super::responder::ResponseCommand;
use super::state::{AssistantItemRef, SessionState};
use crate::config::BargeInConfig;

/// Record of a cancellation that went through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interruption {
    pub source: InterruptSource,
    pub cancelled_at: Instant,
    pub guard_until: Instant,
    pub truncated_item: Option<AssistantItemRef>,
    pub flushed_frames: usize,
}

pub struct BargeInController {
    config: BargeInConfig,
    /// Hot phrases, lowercased once.
    keywords: Vec<String>,
    playback: Arc<FrameQueue>,
    sink: Option<Arc<dyn PlaybackSink>>,
    commands: mpsc::UnboundedSender<ResponseCommand>,
}

impl BargeInController {
    pub fn new(
        config: &BargeInConfig,
        playback: Arc<FrameQueue>,
        sink: Option<Arc<dyn PlaybackSink>>,
        commands: mpsc::UnboundedSender<ResponseCommand>,
    ) -> Self {
        let keywords = config
            .keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self {
            config: config.clone(),
            keywords,
            playback,
            sink,
            commands,
        }
    }

    /// Evaluate the latest mic level.
    pub fn on_mic_level(
        &self,
        st: &mut SessionState,
        level: f32,
        now: Instant,
    ) -> Option<Interruption> {
        if !self.config.enabled || !st.response.in_flight() || level < self.config.threshold {
            st.loud_streak = 0;
            return None;
        }
        st.loud_streak = st.loud_streak.saturating_add(1);
        if st.loud_streak < self.config.min_loud_frames {
            return None;
        }
        self.trigger(st, InterruptSource::Level, now)
    }

    /// Feed a live transcription delta of the user's speech in input item
    /// `item_id`.
    ///
    /// The transcript of the turn that asked for the response never
    /// interrupts it; transcription trails the commit that starts it.
    pub fn on_user_partial(
        &self,
        st: &mut SessionState,
        item_id: Option<&str>,
        delta: &str,
        now: Instant,
    ) -> Option<Interruption> {
        if !self.config.enabled || !self.config.keyword_interrupt {
            return None;
        }
        if !st.response.in_flight() || st.is_prompt_transcript(item_id) {
            st.user_partial.clear();
            st.partial_item = None;
            return None;
        }
        if item_id.is_some() && st.partial_item.as_deref() != item_id {
            st.user_partial.clear();
            st.partial_item = item_id.map(str::to_string);
        }
        st.user_partial.push_str(delta);
        let heard = st.user_partial.to_lowercase();
        let matched = self
            .keywords
            .iter()
            .find(|phrase| contains_phrase(&heard, phrase))?;
        tracing::debug!(phrase = %matched, "Interrupt phrase detected");
        st.user_partial.clear();
        self.trigger(st, InterruptSource::Keyword, now)
    }

    /// Server VAD reported speech onset.
    pub fn on_speech_started(&self, st: &mut SessionState, now: Instant) -> Option<Interruption> {
        if !self.config.enabled || !self.config.server_vad_interrupt {
            return None;
        }
        self.trigger(st, InterruptSource::ServerVad, now)
    }

    /// Explicit interrupt command. Ignores the level threshold.
    pub fn manual(&self, st: &mut SessionState, now: Instant) -> Option<Interruption> {
        self.trigger(st, InterruptSource::Manual, now)
    }

    fn trigger(
        &self,
        st: &mut SessionState,
        source: InterruptSource,
        now: Instant,
    ) -> Option<Interruption> {
        if !st.response.in_flight() {
            return None;
        }
        if let Some(last) = st.last_cancel_at {
            if now.saturating_duration_since(last) < self.config.cooldown() {
                tracing::trace!(source = source.as_str(), "Barge-in suppressed by cooldown");
                return None;
            }
        }

        let item = st.begin_cancel();
        // Remote outcome never blocks local recovery.
        if self
            .commands
            .send(ResponseCommand::Cancel {
                truncate: item.clone(),
            })
            .is_err()
        {
            tracing::debug!("Responder stopped; cancel not sent");
        }

        let guard = st.finish_cancel(now, self.config.suppression());
        let flushed_frames = self.playback.flush();
        if let Some(sink) = &self.sink {
            sink.clear();
        }

        tracing::info!(
            source = source.as_str(),
            flushed_frames,
            truncate = item.as_ref().map(AssistantItemRef::id).unwrap_or("-"),
            "Barge-in: cancelled assistant response"
        );

        Some(Interruption {
            source,
            cancelled_at: now,
            guard_until: guard.until(),
            truncated_item: item,
            flushed_frames,
        })
    }
}

/// Case-sensitive phrase search on word boundaries.
fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    haystack.match_indices(phrase).any(|(start, _)| {
        let end = start + phrase.len();
        let before = haystack[..start].chars().next_back();
        let after = haystack[end..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}
