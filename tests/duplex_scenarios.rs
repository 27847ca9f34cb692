//! End-to-end duplex scenarios against a recording client.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use parlar::config::{Config, ResponseConfig};
use parlar::voice::dispatcher::Dispatcher;
use parlar::voice::events::{parse_server_event, InboundEvent, InterruptSource};
use parlar::voice::responder::Responder;
use parlar::voice::{
    AudioFrame, DuplexEngine, RealtimeClient, ResponseState, ServerEvent, SessionEvent,
    SessionOptions,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Request {
    Create,
    Cancel,
    Truncate { item_id: String, played_ms: u64 },
}

#[derive(Default)]
struct Recorder {
    requests: Mutex<Vec<Request>>,
}

impl Recorder {
    fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    fn count(&self, wanted: &Request) -> usize {
        self.requests.lock().iter().filter(|r| *r == wanted).count()
    }
}

#[async_trait]
impl RealtimeClient for Recorder {
    async fn configure(&self, _options: &SessionOptions) -> anyhow::Result<()> {
        Ok(())
    }

    async fn send_audio(&self, _frame: AudioFrame) -> anyhow::Result<()> {
        Ok(())
    }

    async fn create_response(&self) -> anyhow::Result<()> {
        self.requests.lock().push(Request::Create);
        Ok(())
    }

    async fn cancel_response(&self) -> anyhow::Result<()> {
        self.requests.lock().push(Request::Cancel);
        // The service answers a late cancel with an error; callers must not care.
        anyhow::bail!("response_cancel_not_active")
    }

    async fn truncate_item(
        &self,
        item_id: &str,
        _content_index: u32,
        played_ms: u64,
    ) -> anyhow::Result<()> {
        self.requests.lock().push(Request::Truncate {
            item_id: item_id.to_string(),
            played_ms,
        });
        Ok(())
    }

    async fn close(&self) {}
}

struct Session {
    engine: Arc<DuplexEngine>,
    dispatcher: Dispatcher,
    client: Arc<Recorder>,
    events: tokio::sync::mpsc::UnboundedReceiver<SessionEvent>,
    shutdown: CancellationToken,
}

impl Session {
    fn start() -> Self {
        let mut config = Config::default();
        config.response = ResponseConfig::immediate();

        let (engine, channels) = DuplexEngine::new("scenario", &config, None);
        let client = Arc::new(Recorder::default());
        let shutdown = CancellationToken::new();
        tokio::spawn(
            Responder::new(
                Arc::clone(&engine),
                Arc::clone(&client) as Arc<dyn RealtimeClient>,
                channels.commands,
            )
            .run(shutdown.clone()),
        );

        Self {
            dispatcher: Dispatcher::new(Arc::clone(&engine)),
            engine,
            client,
            events: channels.events,
            shutdown,
        }
    }

    fn feed(&mut self, event: ServerEvent, at: Instant) {
        self.dispatcher.handle(InboundEvent {
            event,
            received_at: at,
        });
    }

    fn feed_json(&mut self, json: &str) {
        let event = parse_server_event(json).expect("valid event");
        self.dispatcher.handle(InboundEvent::now(event));
    }

    async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    fn surfaced(&mut self) -> Vec<SessionEvent> {
        std::iter::from_fn(|| self.events.try_recv().ok()).collect()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn frame_at_level(level: f32) -> AudioFrame {
    let peak = (level * 32_767.0).round() as i16;
    AudioFrame::from_samples(&[0, peak / 2, peak, -peak / 3])
}

fn audio_delta(samples: &[i16]) -> ServerEvent {
    ServerEvent::AudioDelta {
        pcm: AudioFrame::from_samples(samples).into_bytes(),
    }
}

#[tokio::test]
async fn scenario_a_turn_runs_to_completion() {
    let mut s = Session::start();

    s.feed_json(r#"{"type":"input_audio_buffer.committed","item_id":"item_u1"}"#);
    assert_eq!(s.engine.response_state(), ResponseState::AwaitingCreate);
    // A repeated commit for the same turn must not ask twice.
    s.feed_json(r#"{"type":"input_audio_buffer.committed","item_id":"item_u1"}"#);
    s.settle().await;
    assert_eq!(s.client.requests(), vec![Request::Create]);

    s.feed_json(r#"{"type":"response.output_item.added","item":{"id":"item_a1","role":"assistant"}}"#);
    s.feed_json(r#"{"type":"response.audio.delta","delta":"AAD/fw=="}"#);
    assert_eq!(s.engine.response_state(), ResponseState::Active);
    assert_eq!(s.engine.playback_queue().len(), 1);

    s.feed_json(r#"{"type":"response.audio_transcript.delta","delta":"Hello!"}"#);
    s.feed_json(r#"{"type":"response.done","response":{"status":"completed"}}"#);
    assert_eq!(s.engine.response_state(), ResponseState::Idle);

    assert_eq!(
        s.surfaced(),
        vec![
            SessionEvent::AssistantText {
                delta: "Hello!".into()
            },
            SessionEvent::AssistantDone,
        ]
    );

    // The next turn is free to start.
    s.feed_json(r#"{"type":"input_audio_buffer.committed"}"#);
    s.settle().await;
    assert_eq!(s.client.count(&Request::Create), 2);
}

#[tokio::test]
async fn scenario_b_loud_mic_interrupts_active_response() {
    let mut s = Session::start();
    let t0 = Instant::now();

    s.feed(ServerEvent::TurnCommitted { item_id: None }, t0);
    s.settle().await;
    s.feed(
        ServerEvent::AssistantItem {
            id: "item_a1".into(),
        },
        t0,
    );
    for _ in 0..5 {
        s.feed(audio_delta(&[1_000, -1_000]), t0);
    }
    assert_eq!(s.engine.playback_queue().len(), 5);

    let trigger_at = Instant::now();
    let hit = s
        .engine
        .on_capture_frame(&frame_at_level(0.35), trigger_at)
        .expect("barge-in fires");
    assert_eq!(hit.source, InterruptSource::Level);
    assert_eq!(hit.guard_until, trigger_at + Duration::from_millis(800));

    assert!(s.engine.playback_queue().is_empty());
    assert_eq!(s.engine.response_state(), ResponseState::Idle);
    let st = s.engine.snapshot();
    assert!(st.suppresses(trigger_at + Duration::from_millis(799)));
    assert!(!st.suppresses(trigger_at + Duration::from_millis(800)));

    s.settle().await;
    assert_eq!(
        s.client.requests(),
        vec![
            Request::Create,
            Request::Cancel,
            Request::Truncate {
                item_id: "item_a1".into(),
                played_ms: 0,
            },
        ]
    );
    assert!(s.surfaced().contains(&SessionEvent::Interrupted {
        source: InterruptSource::Level
    }));
}

#[tokio::test]
async fn scenario_c_only_real_errors_surface() {
    let mut s = Session::start();

    s.feed_json(
        r#"{"type":"error","error":{"type":"invalid_request_error","code":"response_cancel_not_active","message":"Cancellation failed: no active response found"}}"#,
    );
    assert!(s.surfaced().is_empty());

    s.feed_json(r#"{"type":"input_audio_buffer.committed"}"#);
    s.feed_json(
        r#"{"type":"error","error":{"type":"server_error","code":"server_error","message":"The server had an error"}}"#,
    );
    assert_eq!(
        s.surfaced(),
        vec![SessionEvent::Error {
            code: Some("server_error".into()),
            message: "The server had an error".into(),
        }]
    );
    assert_eq!(s.engine.response_state(), ResponseState::Idle);
}

#[tokio::test]
async fn cancellation_is_rate_limited_by_cooldown() {
    let s = Session::start();
    let t0 = Instant::now();
    let loud = frame_at_level(0.6);

    s.engine.lock().response = ResponseState::Active;
    assert!(s.engine.on_capture_frame(&loud, t0).is_some());

    // A new response starts right away and the user is still loud.
    s.engine.lock().response = ResponseState::Active;
    let within = t0 + Duration::from_millis(150);
    assert!(s.engine.on_capture_frame(&loud, within).is_none());
    assert_eq!(s.engine.response_state(), ResponseState::Active);

    let after = t0 + Duration::from_millis(450);
    assert!(s.engine.on_capture_frame(&loud, after).is_some());

    s.settle().await;
    assert_eq!(s.client.count(&Request::Cancel), 2);
}

#[tokio::test]
async fn guard_window_drops_only_stale_output() {
    let mut s = Session::start();
    let t0 = Instant::now();

    s.engine.lock().response = ResponseState::Active;
    s.engine.interrupt(t0);
    s.surfaced();

    s.feed(audio_delta(&[7, 7]), t0 + Duration::from_millis(500));
    s.feed(
        ServerEvent::TextDelta {
            text: "stale".into(),
        },
        t0 + Duration::from_millis(600),
    );
    assert!(s.engine.playback_queue().is_empty());
    assert!(s.surfaced().is_empty());

    s.feed(audio_delta(&[7, 7]), t0 + Duration::from_millis(801));
    assert_eq!(s.engine.playback_queue().len(), 1);
    assert_eq!(s.engine.response_state(), ResponseState::Active);
}

#[tokio::test]
async fn quiet_mic_never_interrupts() {
    let s = Session::start();
    s.engine.lock().response = ResponseState::Active;
    for _ in 0..20 {
        assert!(s
            .engine
            .on_capture_frame(&frame_at_level(0.1), Instant::now())
            .is_none());
    }
    s.settle().await;
    assert!(s.client.requests().is_empty());
    assert!((s.engine.snapshot().mic_level - 0.1).abs() < 1e-3);
}

#[tokio::test]
async fn question_with_hot_phrase_still_gets_an_answer() {
    let mut s = Session::start();

    s.feed_json(r#"{"type":"input_audio_buffer.committed","item_id":"item_u1"}"#);
    s.feed_json(
        r#"{"type":"conversation.item.input_audio_transcription.delta","item_id":"item_u1","content_index":0,"delta":"Hey, what's the weather?"}"#,
    );
    s.settle().await;

    assert_eq!(s.engine.response_state(), ResponseState::AwaitingCreate);
    assert_eq!(s.client.requests(), vec![Request::Create]);
    assert!(s.surfaced().is_empty());
}

#[tokio::test]
async fn cancelled_response_finishing_late_keeps_the_next_turn() {
    let mut s = Session::start();

    s.feed_json(r#"{"type":"input_audio_buffer.committed","item_id":"item_u1"}"#);
    s.settle().await;
    s.feed_json(r#"{"type":"response.created","response":{"id":"resp_1"}}"#);
    s.feed_json(r#"{"type":"response.audio.delta","response_id":"resp_1","delta":"AAD/fw=="}"#);
    assert!(s.engine.interrupt(Instant::now()).is_some());

    s.feed_json(r#"{"type":"input_audio_buffer.committed","item_id":"item_u2"}"#);
    s.settle().await;
    assert_eq!(s.client.count(&Request::Create), 2);

    s.feed_json(r#"{"type":"response.done","response":{"id":"resp_1","status":"cancelled"}}"#);
    assert_eq!(s.engine.response_state(), ResponseState::AwaitingCreate);

    s.feed_json(r#"{"type":"input_audio_buffer.committed","item_id":"item_u3"}"#);
    s.settle().await;
    assert_eq!(s.client.count(&Request::Create), 2);

    s.feed_json(r#"{"type":"response.created","response":{"id":"resp_2"}}"#);
    s.feed_json(r#"{"type":"response.done","response":{"id":"resp_2","status":"completed"}}"#);
    assert_eq!(s.engine.response_state(), ResponseState::Idle);
}
