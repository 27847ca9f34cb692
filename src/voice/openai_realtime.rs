//! OpenAI Realtime WebSocket client.
//!
//! ## Protocol Overview
//!
//! 1. **Connect**: WebSocket to `wss://api.openai.com/v1/realtime?model=...`
//! 2. **Configure**: send `session.update` with voice, PCM16 formats and
//!    server VAD that does *not* create responses on its own
//! 3. **Stream**: send `input_audio_buffer.append` (Base64 PCM16 24kHz),
//!    receive `response.audio.delta` (Base64 PCM16 24kHz) and friends
//! 4. **Control**: `response.create`, `response.cancel`,
//!    `conversation.item.truncate`
//! 5. **Close**: send a close frame

use async_trait::async_trait;
use base64::Engine;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::events::{parse_server_event, InboundEvent};
use super::queue::AudioFrame;
use super::RealtimeClient;
use crate::config::{RemoteConfig, TurnDetectionConfig};

// ── Constants ──────────────────────────────────────────────────────

/// OpenAI Realtime WebSocket endpoint.
const OPENAI_REALTIME_WS_URL: &str = "wss://api.openai.com/v1/realtime";

/// Outbound and inbound channel depth.
const CHANNEL_CAPACITY: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;
type WsSource = SplitStream<WsStream>;

// ── Session options ────────────────────────────────────────────────

/// Options carried by `session.update`.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub voice: String,
    pub instructions: String,
    pub transcription_model: String,
    pub turn_detection: TurnDetectionConfig,
}

impl From<&RemoteConfig> for SessionOptions {
    fn from(remote: &RemoteConfig) -> Self {
        Self {
            voice: remote.voice.clone(),
            instructions: remote.instructions.clone(),
            transcription_model: remote.transcription_model.clone(),
            turn_detection: remote.turn_detection.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SessionUpdate<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    session: SessionPayload<'a>,
}

#[derive(Debug, Serialize)]
struct SessionPayload<'a> {
    modalities: [&'static str; 2],
    voice: &'a str,
    instructions: &'a str,
    input_audio_format: &'static str,
    output_audio_format: &'static str,
    input_audio_transcription: TranscriptionPayload<'a>,
    turn_detection: TurnDetectionPayload,
}

#[derive(Debug, Serialize)]
struct TranscriptionPayload<'a> {
    model: &'a str,
}

#[derive(Debug, Serialize)]
struct TurnDetectionPayload {
    #[serde(rename = "type")]
    kind: &'static str,
    threshold: f32,
    silence_duration_ms: u64,
    prefix_padding_ms: u64,
    create_response: bool,
}

/// Build the `session.update` message.
pub fn build_session_update(options: &SessionOptions) -> serde_json::Value {
    let td = &options.turn_detection;
    let update = SessionUpdate {
        kind: "session.update",
        session: SessionPayload {
            modalities: ["audio", "text"],
            voice: &options.voice,
            instructions: &options.instructions,
            input_audio_format: "pcm16",
            output_audio_format: "pcm16",
            input_audio_transcription: TranscriptionPayload {
                model: &options.transcription_model,
            },
            turn_detection: TurnDetectionPayload {
                kind: "server_vad",
                threshold: td.threshold,
                silence_duration_ms: td.silence_duration_ms,
                prefix_padding_ms: td.prefix_padding_ms,
                create_response: td.create_response,
            },
        },
    };
    serde_json::to_value(update).unwrap_or(serde_json::Value::Null)
}

// ── Outbound message ───────────────────────────────────────────────

/// Outbound message to send to the OpenAI Realtime WebSocket.
#[derive(Debug)]
enum OutboundMessage {
    /// PCM16 audio → `input_audio_buffer.append`.
    Audio(AudioFrame),
    /// Pre-built control event.
    Control(serde_json::Value),
    /// Close the connection.
    Close,
}

fn audio_append_message(frame: &AudioFrame) -> serde_json::Value {
    let b64 = base64::engine::general_purpose::STANDARD.encode(frame.as_bytes());
    serde_json::json!({
        "type": "input_audio_buffer.append",
        "audio": b64,
    })
}

fn truncate_message(item_id: &str, content_index: u32, played_ms: u64) -> serde_json::Value {
    serde_json::json!({
        "type": "conversation.item.truncate",
        "item_id": item_id,
        "content_index": content_index,
        "audio_end_ms": played_ms,
    })
}

// ── Client ─────────────────────────────────────────────────────────

/// Handle to a connected OpenAI Realtime session.
///
/// All requests are queued to a single writer task, so calls never touch
/// the socket directly and complete as soon as the request is queued.
pub struct OpenAiRealtimeClient {
    outbound_tx: mpsc::Sender<OutboundMessage>,
    session_id: String,
}

impl OpenAiRealtimeClient {
    /// Connect and spawn the reader/writer tasks.
    ///
    /// Returns the client and the ordered stream of inbound events. The
    /// stream ends when the connection closes.
    pub async fn connect(
        session_id: String,
        remote: &RemoteConfig,
    ) -> anyhow::Result<(Self, mpsc::Receiver<InboundEvent>)> {
        let api_key = remote
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("No API key configured"))?;
        let url = format!("{OPENAI_REALTIME_WS_URL}?model={}", remote.model);

        tracing::info!(
            session_id = %session_id,
            model = %remote.model,
            voice = %remote.voice,
            "Connecting to OpenAI Realtime"
        );

        // Build WebSocket request with auth headers
        let mut request = url
            .into_client_request()
            .map_err(|e| anyhow::anyhow!("Failed to build WebSocket request: {e}"))?;
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {api_key}")
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid auth header: {e}"))?,
        );
        request.headers_mut().insert(
            "OpenAI-Beta",
            "realtime=v1"
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid header: {e}"))?,
        );

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to OpenAI Realtime: {e}"))?;

        let (ws_sender, ws_receiver) = ws_stream.split();

        let (outbound_tx, outbound_rx) = mpsc::channel::<OutboundMessage>(CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel::<InboundEvent>(CHANNEL_CAPACITY);

        let sid_out = session_id.clone();
        tokio::spawn(async move {
            outbound_loop(outbound_rx, ws_sender, sid_out).await;
        });

        let sid_in = session_id.clone();
        tokio::spawn(async move {
            inbound_loop(ws_receiver, event_tx, sid_in).await;
        });

        Ok((
            Self {
                outbound_tx,
                session_id,
            },
            event_rx,
        ))
    }

    async fn enqueue(&self, msg: OutboundMessage) -> anyhow::Result<()> {
        self.outbound_tx
            .send(msg)
            .await
            .map_err(|_| anyhow::anyhow!("Realtime connection closed"))
    }
}

#[async_trait]
impl RealtimeClient for OpenAiRealtimeClient {
    async fn configure(&self, options: &SessionOptions) -> anyhow::Result<()> {
        tracing::debug!(session_id = %self.session_id, "Sending OpenAI session.update");
        self.enqueue(OutboundMessage::Control(build_session_update(options)))
            .await
    }

    async fn send_audio(&self, frame: AudioFrame) -> anyhow::Result<()> {
        if frame.is_empty() {
            return Ok(());
        }
        self.enqueue(OutboundMessage::Audio(frame)).await
    }

    async fn create_response(&self) -> anyhow::Result<()> {
        self.enqueue(OutboundMessage::Control(
            serde_json::json!({"type": "response.create"}),
        ))
        .await
    }

    async fn cancel_response(&self) -> anyhow::Result<()> {
        self.enqueue(OutboundMessage::Control(
            serde_json::json!({"type": "response.cancel"}),
        ))
        .await
    }

    async fn truncate_item(
        &self,
        item_id: &str,
        content_index: u32,
        played_ms: u64,
    ) -> anyhow::Result<()> {
        self.enqueue(OutboundMessage::Control(truncate_message(
            item_id,
            content_index,
            played_ms,
        )))
        .await
    }

    async fn close(&self) {
        let _ = self.outbound_tx.send(OutboundMessage::Close).await;
    }
}

// ── Internal loops ────────────────────────────────────────────────

/// Outbound loop: serialize requests and write them to the socket.
async fn outbound_loop(
    mut rx: mpsc::Receiver<OutboundMessage>,
    mut ws_sender: WsSink,
    session_id: String,
) {
    let mut audio_chunk_count: u64 = 0;

    while let Some(msg) = rx.recv().await {
        let payload = match msg {
            OutboundMessage::Audio(frame) => {
                audio_chunk_count += 1;
                if audio_chunk_count == 1 || audio_chunk_count.is_multiple_of(50) {
                    tracing::debug!(
                        session_id = %session_id,
                        chunk = audio_chunk_count,
                        pcm_bytes = frame.len(),
                        "Sending audio chunk to OpenAI Realtime"
                    );
                }
                audio_append_message(&frame)
            }
            OutboundMessage::Control(event) => {
                tracing::debug!(
                    session_id = %session_id,
                    event_type = event.get("type").and_then(|v| v.as_str()).unwrap_or(""),
                    "Sending control event"
                );
                event
            }
            OutboundMessage::Close => {
                let _ = ws_sender.send(WsMessage::Close(None)).await;
                break;
            }
        };

        let json = match serde_json::to_string(&payload) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to encode event");
                continue;
            }
        };
        if ws_sender.send(WsMessage::Text(json.into())).await.is_err() {
            tracing::warn!(
                session_id = %session_id,
                "WebSocket send failed, closing outbound loop"
            );
            break;
        }
    }

    tracing::debug!(session_id = %session_id, "OpenAI Realtime outbound loop terminated");
}

/// Inbound loop: parse frames into typed events, stamped on arrival.
async fn inbound_loop(
    mut ws_receiver: WsSource,
    event_tx: mpsc::Sender<InboundEvent>,
    session_id: String,
) {
    while let Some(msg_result) = ws_receiver.next().await {
        match msg_result {
            Ok(WsMessage::Text(text)) => match parse_server_event(text.as_str()) {
                Ok(event) => {
                    if event_tx.send(InboundEvent::now(event)).await.is_err() {
                        tracing::debug!(
                            session_id = %session_id,
                            "Event receiver dropped, closing inbound loop"
                        );
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Skipping realtime frame");
                }
            },
            Ok(WsMessage::Close(frame)) => {
                tracing::info!(
                    session_id = %session_id,
                    close_frame = ?frame,
                    "OpenAI Realtime connection closed"
                );
                break;
            }
            Ok(
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) | WsMessage::Binary(_),
            ) => {
                // Binary frames not expected from OpenAI Realtime; ping/pong handled by tungstenite
            }
            Err(e) => {
                tracing::error!(
                    session_id = %session_id,
                    error = %e,
                    "OpenAI Realtime WebSocket error"
                );
                break;
            }
        }
    }

    tracing::debug!(session_id = %session_id, "OpenAI Realtime inbound loop terminated");
}

// ── Tests ──────────────────────────────────────────────────────────
