//! Event types flowing through the engine.
//!
//! ```text
//! Realtime WS ──json──▸ ServerEvent ──▸ Dispatcher ──▸ SessionEvent ──▸ console
//! ```
//!
//! [`ServerEvent`] is the closed set of inbound events the engine reacts
//! to; anything else from the wire becomes [`ServerEvent::Unknown`].
//! [`SessionEvent`] is what the engine surfaces to presentation.

use base64::Engine;
use serde::Deserialize;
use std::time::Instant;

// ── Inbound (service → client) ────────────────────────────────────

/// A typed event from the realtime service.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// `session.created` / `session.updated`.
    SessionReady,
    /// Server VAD committed the user's input buffer (turn ended).
    TurnCommitted { item_id: Option<String> },
    /// Server VAD detected the user starting to speak.
    SpeechStarted,
    SpeechStopped,
    /// A new assistant item was announced (truncate target).
    AssistantItem { id: String },
    /// A user item was created, possibly carrying its transcript.
    UserItem { transcript: Option<String> },
    /// Decoded PCM16 output audio.
    AudioDelta { pcm: Vec<u8> },
    AudioDone { response_id: Option<String> },
    /// Assistant text or spoken-audio transcript delta.
    TextDelta { text: String },
    TextDone { response_id: Option<String> },
    /// The service started generating a response.
    ResponseCreated { id: String },
    ResponseDone { response_id: Option<String> },
    /// Incremental transcription of the user's speech in input item `item_id`.
    TranscriptionDelta {
        item_id: Option<String>,
        text: String,
    },
    /// Final transcription of the user's speech.
    TranscriptionCompleted { transcript: String },
    Error {
        code: Option<String>,
        message: String,
    },
    /// Event type the engine does not act on.
    Unknown { kind: String },
}

impl ServerEvent {
    /// Short name for logs.
    pub fn kind(&self) -> &str {
        match self {
            Self::SessionReady => "session_ready",
            Self::TurnCommitted { .. } => "turn_committed",
            Self::SpeechStarted => "speech_started",
            Self::SpeechStopped => "speech_stopped",
            Self::AssistantItem { .. } => "assistant_item",
            Self::UserItem { .. } => "user_item",
            Self::AudioDelta { .. } => "audio_delta",
            Self::AudioDone { .. } => "audio_done",
            Self::TextDelta { .. } => "text_delta",
            Self::TextDone { .. } => "text_done",
            Self::ResponseCreated { .. } => "response_created",
            Self::ResponseDone { .. } => "response_done",
            Self::TranscriptionDelta { .. } => "transcription_delta",
            Self::TranscriptionCompleted { .. } => "transcription_completed",
            Self::Error { .. } => "error",
            Self::Unknown { kind } => kind,
        }
    }
}

/// A [`ServerEvent`] stamped with its local arrival time.
///
/// The guard window is evaluated against `received_at`, not the time the
/// dispatcher gets around to it.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub event: ServerEvent,
    pub received_at: Instant,
}

impl InboundEvent {
    pub fn now(event: ServerEvent) -> Self {
        Self {
            event,
            received_at: Instant::now(),
        }
    }
}

// ── Wire format ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum WireEvent {
    #[serde(rename = "session.created", alias = "session.updated")]
    Session {},
    #[serde(rename = "input_audio_buffer.committed")]
    Committed { item_id: Option<String> },
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {},
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {},
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded { item: WireItem },
    #[serde(rename = "conversation.item.created")]
    ItemCreated { item: WireItem },
    #[serde(rename = "response.audio.delta", alias = "response.output_audio.delta")]
    AudioDelta { delta: String },
    #[serde(rename = "response.audio.done", alias = "response.output_audio.done")]
    AudioDone { response_id: Option<String> },
    #[serde(
        rename = "response.text.delta",
        alias = "response.audio_transcript.delta",
        alias = "response.output_text.delta",
        alias = "response.output_audio_transcript.delta"
    )]
    TextDelta { delta: String },
    #[serde(rename = "response.text.done", alias = "response.output_text.done")]
    TextDone { response_id: Option<String> },
    #[serde(rename = "response.created")]
    ResponseCreated { response: WireResponse },
    #[serde(rename = "response.done")]
    ResponseDone { response: Option<WireResponse> },
    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    TranscriptionDelta {
        item_id: Option<String>,
        delta: String,
    },
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted { transcript: Option<String> },
    #[serde(rename = "error")]
    Error { error: WireError },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct WireItem {
    id: Option<String>,
    role: Option<String>,
    #[serde(default)]
    content: Vec<WireContent>,
}

#[derive(Debug, Deserialize)]
struct WireContent {
    transcript: Option<String>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    code: Option<String>,
    message: Option<String>,
}

/// Parse one JSON text frame from the realtime service.
///
/// Fails on malformed JSON or an undecodable audio payload; unrecognized
/// event types are not an error.
pub fn parse_server_event(json_text: &str) -> anyhow::Result<ServerEvent> {
    let value: serde_json::Value = serde_json::from_str(json_text)
        .map_err(|e| anyhow::anyhow!("Failed to parse realtime event: {e}"))?;
    let kind = value
        .get("type")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let wire: WireEvent = serde_json::from_value(value)
        .map_err(|e| anyhow::anyhow!("Malformed realtime event '{kind}': {e}"))?;

    let event = match wire {
        WireEvent::Session {} => ServerEvent::SessionReady,
        WireEvent::Committed { item_id } => ServerEvent::TurnCommitted { item_id },
        WireEvent::SpeechStarted {} => ServerEvent::SpeechStarted,
        WireEvent::SpeechStopped {} => ServerEvent::SpeechStopped,
        WireEvent::OutputItemAdded { item } => match item.id {
            Some(id) => ServerEvent::AssistantItem { id },
            None => ServerEvent::Unknown { kind },
        },
        WireEvent::ItemCreated { item } => match (item.role.as_deref(), item.id) {
            (Some("assistant"), Some(id)) => ServerEvent::AssistantItem { id },
            (Some("user"), _) => {
                let transcript = item
                    .content
                    .into_iter()
                    .find_map(|c| c.transcript.or(c.text))
                    .filter(|t| !t.is_empty());
                ServerEvent::UserItem { transcript }
            }
            _ => ServerEvent::Unknown { kind },
        },
        WireEvent::AudioDelta { delta } => {
            let pcm = base64::engine::general_purpose::STANDARD
                .decode(delta.as_bytes())
                .map_err(|e| anyhow::anyhow!("Invalid audio delta payload: {e}"))?;
            ServerEvent::AudioDelta { pcm }
        }
        WireEvent::AudioDone { response_id } => ServerEvent::AudioDone { response_id },
        WireEvent::TextDelta { delta } => ServerEvent::TextDelta { text: delta },
        WireEvent::TextDone { response_id } => ServerEvent::TextDone { response_id },
        WireEvent::ResponseCreated { response } => match response.id {
            Some(id) => ServerEvent::ResponseCreated { id },
            None => ServerEvent::Unknown { kind },
        },
        WireEvent::ResponseDone { response } => ServerEvent::ResponseDone {
            response_id: response.and_then(|r| r.id),
        },
        WireEvent::TranscriptionDelta { item_id, delta } => ServerEvent::TranscriptionDelta {
            item_id,
            text: delta,
        },
        WireEvent::TranscriptionCompleted { transcript } => ServerEvent::TranscriptionCompleted {
            transcript: transcript.unwrap_or_default(),
        },
        WireEvent::Error { error } => ServerEvent::Error {
            code: error.code,
            message: error
                .message
                .unwrap_or_else(|| "Unknown realtime error".to_string()),
        },
        WireEvent::Other => ServerEvent::Unknown { kind },
    };
    Ok(event)
}

// ── Outbound to presentation ─────────────────────────────────────

/// What started an interruption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptSource {
    /// Mic level crossed the barge-in threshold.
    Level,
    /// The user's live transcript contained a hot phrase.
    Keyword,
    /// Server VAD reported speech onset.
    ServerVad,
    /// Explicit interrupt command.
    Manual,
}

impl InterruptSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Level => "level",
            Self::Keyword => "keyword",
            Self::ServerVad => "server_vad",
            Self::Manual => "manual",
        }
    }
}

/// Event surfaced by the engine to transcript and telemetry sinks.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The service acknowledged the session configuration.
    Ready,
    /// Incremental assistant text.
    AssistantText { delta: String },
    /// The assistant finished a response.
    AssistantDone,
    /// Final transcript of what the user said ("last heard").
    UserTranscript { text: String },
    /// The in-flight response was cancelled locally.
    Interrupted { source: InterruptSource },
    /// A non-benign remote error.
    Error {
        code: Option<String>,
        message: String,
    },
    /// The inbound stream ended.
    Disconnected,
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_session_created() {
        let event = parse_server_event(r#"{"type": "session.created", "session": {}}"#).unwrap();
        assert_eq!(event, ServerEvent::SessionReady);
        let event = parse_server_event(r#"{"type": "session.updated", "session": {}}"#).unwrap();
        assert_eq!(event, ServerEvent::SessionReady);
    }

    #[test]
    fn parse_committed() {
        let json = r#"{"type": "input_audio_buffer.committed", "event_id": "e1", "item_id": "i1"}"#;
        assert_eq!(
            parse_server_event(json).unwrap(),
            ServerEvent::TurnCommitted {
                item_id: Some("i1".into())
            }
        );
        let json = r#"{"type": "input_audio_buffer.committed"}"#;
        assert_eq!(
            parse_server_event(json).unwrap(),
            ServerEvent::TurnCommitted { item_id: None }
        );
    }

    #[test]
    fn parse_response_lifecycle_ids() {
        let json = r#"{"type": "response.created", "response": {"id": "resp_1", "status": "in_progress"}}"#;
        assert_eq!(
            parse_server_event(json).unwrap(),
            ServerEvent::ResponseCreated {
                id: "resp_1".into()
            }
        );
        let json = r#"{"type": "response.done", "response": {"id": "resp_1", "status": "cancelled"}}"#;
        assert_eq!(
            parse_server_event(json).unwrap(),
            ServerEvent::ResponseDone {
                response_id: Some("resp_1".into())
            }
        );
        let json = r#"{"type": "response.audio.done", "response_id": "resp_1", "item_id": "a1"}"#;
        assert_eq!(
            parse_server_event(json).unwrap(),
            ServerEvent::AudioDone {
                response_id: Some("resp_1".into())
            }
        );
    }

    #[test]
    fn parse_transcription_delta_keeps_item() {
        let json = r#"{"type": "conversation.item.input_audio_transcription.delta", "item_id": "u7", "content_index": 0, "delta": "Hey"}"#;
        assert_eq!(
            parse_server_event(json).unwrap(),
            ServerEvent::TranscriptionDelta {
                item_id: Some("u7".into()),
                text: "Hey".into()
            }
        );
    }

    #[test]
    fn parse_audio_delta() {
        let audio_b64 = base64::engine::general_purpose::STANDARD.encode([10u8, 20, 30, 40]);
        let json = format!(r#"{{"type": "response.audio.delta", "delta": "{audio_b64}"}}"#);
        assert_eq!(
            parse_server_event(&json).unwrap(),
            ServerEvent::AudioDelta {
                pcm: vec![10, 20, 30, 40]
            }
        );
    }

    #[test]
    fn invalid_audio_payload_is_an_error() {
        let json = r#"{"type": "response.audio.delta", "delta": "not base64!!"}"#;
        assert!(parse_server_event(json).is_err());
    }

    #[test]
    fn parse_text_and_transcript_deltas() {
        let json = r#"{"type": "response.text.delta", "delta": "Hel"}"#;
        assert_eq!(
            parse_server_event(json).unwrap(),
            ServerEvent::TextDelta { text: "Hel".into() }
        );
        let json = r#"{"type": "response.audio_transcript.delta", "delta": "lo"}"#;
        assert_eq!(
            parse_server_event(json).unwrap(),
            ServerEvent::TextDelta { text: "lo".into() }
        );
    }

    #[test]
    fn parse_output_item_added() {
        let json = r#"{"type": "response.output_item.added", "item": {"id": "item_42", "type": "message", "role": "assistant"}}"#;
        assert_eq!(
            parse_server_event(json).unwrap(),
            ServerEvent::AssistantItem {
                id: "item_42".into()
            }
        );
    }

    #[test]
    fn parse_item_created_by_role() {
        let json = r#"{"type": "conversation.item.created", "item": {"id": "a1", "role": "assistant", "content": []}}"#;
        assert_eq!(
            parse_server_event(json).unwrap(),
            ServerEvent::AssistantItem { id: "a1".into() }
        );

        let json = r#"{"type": "conversation.item.created", "item": {"id": "u1", "role": "user", "content": [{"type": "input_audio", "transcript": "hi there"}]}}"#;
        assert_eq!(
            parse_server_event(json).unwrap(),
            ServerEvent::UserItem {
                transcript: Some("hi there".into())
            }
        );

        let json = r#"{"type": "conversation.item.created", "item": {"id": "f1", "type": "function_call"}}"#;
        assert!(matches!(
            parse_server_event(json).unwrap(),
            ServerEvent::Unknown { .. }
        ));
    }

    #[test]
    fn parse_transcription_completed() {
        let json = r#"{"type": "conversation.item.input_audio_transcription.completed", "item_id": "u1", "transcript": "안녕하세요"}"#;
        assert_eq!(
            parse_server_event(json).unwrap(),
            ServerEvent::TranscriptionCompleted {
                transcript: "안녕하세요".into()
            }
        );
    }

    #[test]
    fn parse_error_with_code() {
        let json = r#"{"type": "error", "error": {"type": "invalid_request_error", "code": "response_cancel_not_active", "message": "Cancellation failed: no active response found."}}"#;
        match parse_server_event(json).unwrap() {
            ServerEvent::Error { code, message } => {
                assert_eq!(code.as_deref(), Some("response_cancel_not_active"));
                assert!(message.contains("no active response"));
            }
            other => panic!("Expected Error, got {other:?}"),
        }
    }

    #[test]
    fn parse_error_without_message() {
        let json = r#"{"type": "error", "error": {}}"#;
        assert_eq!(
            parse_server_event(json).unwrap(),
            ServerEvent::Error {
                code: None,
                message: "Unknown realtime error".into()
            }
        );
    }

    #[test]
    fn unknown_event_type_keeps_name() {
        let json = r#"{"type": "rate_limits.updated", "rate_limits": []}"#;
        let event = parse_server_event(json).unwrap();
        assert_eq!(
            event,
            ServerEvent::Unknown {
                kind: "rate_limits.updated".into()
            }
        );
        assert_eq!(event.kind(), "rate_limits.updated");
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(parse_server_event("{not json").is_err());
    }
}
