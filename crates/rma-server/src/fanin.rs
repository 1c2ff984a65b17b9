//! Routes orchestrator responses from the message channel to the connected
//! client that owns the session.

use futures::StreamExt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use rma_core::broker::MessageStream;
use rma_core::contracts::Envelope;
use rma_core::RelayError;

use crate::state::AppState;

/// Pause between attempts to re-establish a lost subscription.
pub const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Subscribe to the message channel and spawn the routing loop.
///
/// The subscription is in place when this returns, so callers can start
/// accepting connections without missing responses. If the channel ends
/// later, the loop subscribes again until it succeeds.
pub async fn start(state: AppState) -> anyhow::Result<JoinHandle<()>> {
    let messages = state.broker.messages.subscribe().await?;
    info!("subscribed to response channel");
    Ok(tokio::spawn(run(state, messages)))
}

async fn run(state: AppState, mut messages: MessageStream) {
    loop {
        while let Some(raw) = messages.next().await {
            route(&state, &raw).await;
        }
        warn!("response channel closed, resubscribing");
        messages = resubscribe(&state).await;
    }
}

async fn resubscribe(state: &AppState) -> MessageStream {
    let mut attempt: u32 = 0;
    loop {
        tokio::time::sleep(RESUBSCRIBE_DELAY).await;
        attempt += 1;
        match state.broker.messages.subscribe().await {
            Ok(messages) => {
                info!(attempt, "resubscribed to response channel");
                return messages;
            }
            Err(e) => error!(attempt, error = %e, "failed to resubscribe to response channel"),
        }
    }
}

/// Deliver one raw channel message. Messages for sessions without a
/// connection on this instance are dropped. A connection whose outbound queue
/// is full is released so one stalled client cannot hold up the others.
pub async fn route(state: &AppState, raw: &str) {
    let response = match Envelope::parse(raw) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "dropping malformed response message");
            return;
        }
    };

    let Some(session) = state.sessions.get(&response.session_id).await else {
        debug!(
            session_id = %response.session_id,
            dialog_id = %response.dialog_id,
            "no connection for session"
        );
        return;
    };

    match session.deliver(response) {
        Ok(()) => {}
        Err(RelayError::SlowConsumer(session_id)) => {
            warn!(
                session_id = %session_id,
                connection_id = session.connection_id,
                "outbound queue full, dropping connection"
            );
            state
                .sessions
                .remove_if(&session_id, |s| s.connection_id == session.connection_id)
                .await;
        }
        Err(e) => debug!(error = %e, "connection went away before delivery"),
    }
}
