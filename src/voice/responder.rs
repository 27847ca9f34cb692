//! Single consumer of response-control requests.
//!
//! The dispatcher and the barge-in controller never talk to the remote
//! service directly. They queue [`ResponseCommand`]s here, and this one
//! task issues them in order, so at most one `response.create` is pending
//! for any committed turn.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::engine::DuplexEngine;
use super::state::AssistantItemRef;
use super::RealtimeClient;

/// Played duration reported when truncating an interrupted item.
///
/// The playback queue is flushed at the moment of interruption, so the
/// audible part is approximated as nothing.
pub const TRUNCATE_PLAYED_MS: u64 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseCommand {
    /// Issue `response.create` after `delay`, if the turn is still waiting.
    Create { delay: Duration },
    /// Cancel the in-flight response and truncate the given item.
    Cancel { truncate: Option<AssistantItemRef> },
}

pub struct Responder {
    engine: Arc<DuplexEngine>,
    client: Arc<dyn RealtimeClient>,
    commands: mpsc::UnboundedReceiver<ResponseCommand>,
}

impl Responder {
    pub fn new(
        engine: Arc<DuplexEngine>,
        client: Arc<dyn RealtimeClient>,
        commands: mpsc::UnboundedReceiver<ResponseCommand>,
    ) -> Self {
        Self {
            engine,
            client,
            commands,
        }
    }

    /// Process requests until shutdown or until every sender is gone.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut pending_create: Option<Instant> = None;

        loop {
            let deadline = pending_create.unwrap_or_else(Instant::now);
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(ResponseCommand::Create { delay }) => {
                        pending_create = Some(Instant::now() + delay);
                    }
                    Some(ResponseCommand::Cancel { truncate }) => {
                        pending_create = None;
                        self.cancel(truncate).await;
                    }
                    None => break,
                },
                () = tokio::time::sleep_until(deadline), if pending_create.is_some() => {
                    pending_create = None;
                    self.create().await;
                }
            }
        }

        tracing::debug!(session_id = %self.engine.session_id(), "Responder stopped");
    }

    async fn create(&self) {
        if !self.engine.lock().mark_create_issued() {
            tracing::debug!(
                session_id = %self.engine.session_id(),
                "Turn no longer awaiting a response, skipping create"
            );
            return;
        }

        tracing::debug!(session_id = %self.engine.session_id(), "Requesting response");
        if let Err(e) = self.client.create_response().await {
            tracing::warn!(
                session_id = %self.engine.session_id(),
                error = %e,
                "response.create failed"
            );
            self.engine.lock().abandon_create();
        }
    }

    async fn cancel(&self, truncate: Option<AssistantItemRef>) {
        if let Err(e) = self.client.cancel_response().await {
            tracing::debug!(error = %e, "response.cancel failed");
        }
        if let Some(item) = truncate {
            if let Err(e) = self
                .client
                .truncate_item(item.id(), 0, TRUNCATE_PLAYED_MS)
                .await
            {
                tracing::debug!(item_id = item.id(), error = %e, "Item truncate failed");
            }
        }
    }
}
