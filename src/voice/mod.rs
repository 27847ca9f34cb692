//! Full-duplex voice conversation engine.
//!
//! Streams microphone audio to a realtime speech model while playing its
//! reply, and cancels the reply when the user talks over it.
//!
//! ## Design
//! - One mutex-guarded [`state::SessionState`] owned by [`engine::DuplexEngine`]
//! - Bounded frame queues between device callbacks and async tasks
//! - Closed [`events::ServerEvent`] type, dispatched in arrival order
//! - Response control funnelled through one [`responder::Responder`] task
//! - Transport behind the [`RealtimeClient`] trait (OpenAI Realtime over WebSocket)

pub mod barge_in;
pub mod dispatcher;
pub mod engine;
pub mod events;
pub mod level;
pub mod openai_realtime;
pub mod pipeline;
pub mod queue;
pub mod responder;
pub mod session;
pub mod state;

use async_trait::async_trait;

pub use engine::DuplexEngine;
pub use events::{InterruptSource, ServerEvent, SessionEvent};
pub use openai_realtime::{OpenAiRealtimeClient, SessionOptions};
pub use queue::{AudioFrame, FrameQueue, OverflowPolicy};
pub use state::{ResponseState, SessionState};

// ── Remote service ───────────────────────────────────────────────

/// Requests the engine makes of the realtime conversational service.
///
/// Inbound events arrive separately, as an ordered channel returned when
/// the client connects.
#[async_trait]
pub trait RealtimeClient: Send + Sync {
    /// Audio encoding, voice and turn-detection settings.
    async fn configure(&self, options: &SessionOptions) -> anyhow::Result<()>;

    /// Append a captured frame to the server-side input buffer.
    async fn send_audio(&self, frame: AudioFrame) -> anyhow::Result<()>;

    async fn create_response(&self) -> anyhow::Result<()>;

    /// May race benignly with a response that already finished.
    async fn cancel_response(&self) -> anyhow::Result<()>;

    /// Tell the service how much of an assistant audio item was heard.
    async fn truncate_item(
        &self,
        item_id: &str,
        content_index: u32,
        played_ms: u64,
    ) -> anyhow::Result<()>;

    /// Best-effort close.
    async fn close(&self);
}
