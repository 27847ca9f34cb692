use serde::{Deserialize, Serialize};
use std::time::Duration;

// ── Top-level config ─────────────────────────────────────────────

/// Complete client configuration.
///
/// Every section falls back to its defaults when absent from the TOML file,
/// so an empty file (or no file at all) is a valid configuration apart from
/// the API key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Realtime service connection and session options.
    pub remote: RemoteConfig,
    /// Device format and queue sizing.
    pub audio: AudioConfig,
    /// Interruption detection and cancellation timing.
    pub barge_in: BargeInConfig,
    /// Response creation pacing.
    pub response: ResponseConfig,
}

// ── Remote service ───────────────────────────────────────────────

/// Realtime service options sent with `session.update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// API key. Usually supplied through `OPENAI_API_KEY` rather than the file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Realtime model identifier.
    pub model: String,
    /// Synthesized voice name.
    pub voice: String,
    /// System instructions for the assistant.
    pub instructions: String,
    /// Model used for transcribing the user's own speech.
    pub transcription_model: String,
    /// Server-side turn detection.
    pub turn_detection: TurnDetectionConfig,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gpt-realtime".into(),
            voice: "alloy".into(),
            instructions: "You are a concise, helpful assistant.".into(),
            transcription_model: "whisper-1".into(),
            turn_detection: TurnDetectionConfig::default(),
        }
    }
}

/// Server VAD tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnDetectionConfig {
    /// Speech probability threshold (0..1). Higher is less sensitive.
    pub threshold: f32,
    /// Trailing silence before the server commits the user's turn.
    pub silence_duration_ms: u64,
    /// Audio kept before detected speech onset.
    pub prefix_padding_ms: u64,
    /// Let the server create responses on its own. Off by default: the
    /// client issues `response.create` itself, once per committed turn.
    pub create_response: bool,
}

impl Default for TurnDetectionConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            silence_duration_ms: 350,
            prefix_padding_ms: 100,
            create_response: false,
        }
    }
}

// ── Audio ────────────────────────────────────────────────────────

/// PCM16 mono stream format and queue capacities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate in Hz for both capture and playback.
    pub sample_rate: u32,
    /// Duration of one captured frame in milliseconds.
    pub frame_ms: u32,
    /// Capture → network queue capacity, in frames.
    pub capture_queue_frames: usize,
    /// Network → playback queue capacity, in frames.
    pub playback_queue_frames: usize,
    /// Input device name; the host default when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_device: Option<String>,
    /// Output device name; the host default when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            frame_ms: 20,
            capture_queue_frames: 96,
            playback_queue_frames: 256,
            input_device: None,
            output_device: None,
        }
    }
}

impl AudioConfig {
    /// Samples in one frame (480 at 24 kHz / 20 ms).
    pub fn samples_per_frame(&self) -> usize {
        ((self.sample_rate as u64 * self.frame_ms as u64) / 1000).max(1) as usize
    }
}

// ── Barge-in ─────────────────────────────────────────────────────

/// Interruption detection and cancellation timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BargeInConfig {
    /// Master switch for level-based interruption.
    pub enabled: bool,
    /// Mic peak level (0..1) that counts as the user talking over the assistant.
    pub threshold: f32,
    /// Consecutive loud frames required before triggering.
    pub min_loud_frames: u32,
    /// Minimum spacing between two cancellations.
    pub cooldown_ms: u64,
    /// Window after a cancellation during which output deltas are discarded.
    pub suppress_ms: u64,
    /// Interrupt when the user's live transcript contains a hot phrase.
    pub keyword_interrupt: bool,
    /// Hot phrases for keyword interruption (case-insensitive, whole words).
    pub keywords: Vec<String>,
    /// Interrupt on the server's `speech_started` VAD event.
    pub server_vad_interrupt: bool,
}

impl Default for BargeInConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.20,
            min_loud_frames: 1,
            cooldown_ms: 400,
            suppress_ms: 800,
            keyword_interrupt: true,
            keywords: vec!["stop".into(), "wait".into(), "hold on".into(), "hey".into()],
            server_vad_interrupt: false,
        }
    }
}

impl BargeInConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn suppression(&self) -> Duration {
        Duration::from_millis(self.suppress_ms)
    }
}

// ── Response pacing ──────────────────────────────────────────────

/// Endpointing delay applied before `response.create`.
///
/// A finished-sounding utterance (ending in `.`, `!` or `?`) gets the short
/// delay; anything else gets the long one, giving the user room to continue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseConfig {
    pub short_delay_ms: u64,
    pub long_delay_ms: u64,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            short_delay_ms: 200,
            long_delay_ms: 700,
        }
    }
}

impl ResponseConfig {
    /// No endpointing delay at all.
    pub fn immediate() -> Self {
        Self {
            short_delay_ms: 0,
            long_delay_ms: 0,
        }
    }

    /// Delay to apply given the user's last finished utterance.
    pub fn delay_after(&self, last_user_text: &str) -> Duration {
        let trimmed = last_user_text.trim_end();
        if trimmed.ends_with(['.', '!', '?']) {
            Duration::from_millis(self.short_delay_ms)
        } else {
            Duration::from_millis(self.long_delay_ms)
        }
    }
}
