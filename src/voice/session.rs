//! Session wiring: devices, connection, tasks and teardown.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::dispatcher::Dispatcher;
use super::engine::DuplexEngine;
use super::events::SessionEvent;
use super::openai_realtime::{OpenAiRealtimeClient, SessionOptions};
use super::pipeline::{self, PlaybackSink};
use super::responder::Responder;
use super::RealtimeClient;
use crate::audio::{MicCapture, SpeakerOutput};
use crate::commands::UserCommand;
use crate::config::Config;

/// How long teardown waits on each remote request or task.
const TEARDOWN_TIMEOUT: Duration = Duration::from_millis(500);

/// Run one conversation until `shutdown` fires or the user quits.
///
/// Opening a device, connecting, or configuring the remote session are the
/// only failures returned; everything after that is absorbed and logged.
/// Device streams are released on every exit path.
pub async fn run_session<F>(
    config: Config,
    shutdown: CancellationToken,
    mut commands: mpsc::Receiver<UserCommand>,
    mut on_event: F,
) -> anyhow::Result<()>
where
    F: FnMut(&SessionEvent) + Send + 'static,
{
    config.validate()?;
    let session_id = uuid::Uuid::new_v4().to_string();

    let speaker = SpeakerOutput::open(&config.audio)?;
    let sink: Arc<dyn PlaybackSink> = speaker.sink();
    let (engine, channels) =
        DuplexEngine::new(session_id.clone(), &config, Some(Arc::clone(&sink)));
    let mic = MicCapture::start(&config.audio, Arc::clone(engine.capture_queue()))?;

    tracing::info!(
        session_id = %session_id,
        input = %mic.device_name(),
        output = %speaker.device_name(),
        sample_rate = config.audio.sample_rate,
        frame_ms = config.audio.frame_ms,
        barge_threshold = config.barge_in.threshold,
        "Audio devices open"
    );

    let (client, inbound) =
        OpenAiRealtimeClient::connect(session_id.clone(), &config.remote).await?;
    let client: Arc<dyn RealtimeClient> = Arc::new(client);
    client
        .configure(&SessionOptions::from(&config.remote))
        .await?;

    // Started before any task so a spawn failure leaves nothing running.
    let playback = pipeline::spawn_playback(
        Arc::clone(engine.playback_queue()),
        Arc::clone(&sink),
        shutdown.clone(),
    )?;

    let mut tasks = Vec::new();
    tasks.push(tokio::spawn(
        Dispatcher::new(Arc::clone(&engine)).run(inbound, shutdown.clone()),
    ));
    tasks.push(tokio::spawn(
        Responder::new(Arc::clone(&engine), Arc::clone(&client), channels.commands)
            .run(shutdown.clone()),
    ));
    tasks.push(tokio::spawn(pipeline::run_capture_sender(
        Arc::clone(&engine),
        Arc::clone(&client),
        shutdown.clone(),
    )));

    let mut events = channels.events;
    let presenter_stop = shutdown.clone();
    tasks.push(tokio::spawn(async move {
        loop {
            tokio::select! {
                () = presenter_stop.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => on_event(&event),
                    None => break,
                },
            }
        }
        // Flush whatever was already queued, e.g. Disconnected.
        while let Ok(event) = events.try_recv() {
            on_event(&event);
        }
    }));

    tracing::info!(session_id = %session_id, "Session running");

    let mut commands_open = true;
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            command = commands.recv(), if commands_open => match command {
                Some(UserCommand::Interrupt) => {
                    if engine.interrupt(Instant::now()).is_none() {
                        tracing::info!("Nothing to interrupt");
                    }
                }
                Some(UserCommand::Quit) => {
                    tracing::info!(session_id = %session_id, "Quit requested");
                    break;
                }
                None => commands_open = false,
            },
        }
    }

    // ── Teardown ──
    shutdown.cancel();

    if engine.response_state().in_flight() {
        let _ = tokio::time::timeout(TEARDOWN_TIMEOUT, client.cancel_response()).await;
    }
    let _ = tokio::time::timeout(TEARDOWN_TIMEOUT, client.close()).await;

    for task in tasks {
        if tokio::time::timeout(TEARDOWN_TIMEOUT, task).await.is_err() {
            tracing::debug!("Task did not stop in time");
        }
    }
    if let Ok(Err(_)) = tokio::task::spawn_blocking(move || playback.join()).await {
        tracing::warn!("Playback thread panicked");
    }

    drop(mic);
    drop(speaker);

    let snapshot = engine.snapshot();
    tracing::info!(
        session_id = %session_id,
        mic_bytes = snapshot.mic_bytes,
        spk_bytes = snapshot.spk_bytes,
        capture_dropped = engine.capture_queue().dropped(),
        playback_evicted = engine.playback_queue().dropped(),
        "Session ended"
    );
    Ok(())
}
