//! One WebSocket connection between a chat client and the session manager.
//!
//! Inbound frames become orchestrator requests on the task queue. Responses
//! for the session arrive from the fan-in task through an mpsc channel and
//! are written to the socket in arrival order. A request that has no final
//! response within the configured timeout of being queued is answered with a
//! timeout error, and anything that arrives for it afterwards is dropped.

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use rma_core::contracts::{ClientMessage, ClientUpdate, Response};
use rma_core::{RelayError, Result};

use crate::state::AppState;

pub const TIMEOUT_MESSAGE: &str = "Request timed out. Please retry.";
pub const SUBMIT_FAILED_MESSAGE: &str = "Failed to submit request. Please retry.";

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// ClientSession
// ---------------------------------------------------------------------------

/// Handle registered in the session cache for a live connection.
#[derive(Clone)]
pub struct ClientSession {
    pub connection_id: u64,
    tx: mpsc::Sender<Response>,
}

impl ClientSession {
    pub fn new(tx: mpsc::Sender<Response>) -> Self {
        Self {
            connection_id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            tx,
        }
    }

    /// Queue a response for the connection's writer without waiting.
    ///
    /// A full outbound queue means the client stopped reading; the caller
    /// gets `SlowConsumer` and is expected to drop the connection.
    pub fn deliver(&self, response: Response) -> Result<()> {
        self.tx.try_send(response).map_err(|e| match e {
            TrySendError::Full(r) => RelayError::SlowConsumer(r.session_id),
            TrySendError::Closed(r) => RelayError::SessionNotFound(r.session_id),
        })
    }
}

// ---------------------------------------------------------------------------
// PendingDialogs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct PendingRequest {
    deadline: Instant,
    expired: bool,
}

/// Requests a connection is waiting on, oldest first per dialog.
///
/// Responses carry no request id, so a terminal response settles the oldest
/// outstanding request of its dialog. An expired request stays queued until
/// its terminal response shows up, which keeps a late answer from being
/// credited to a newer request that reuses the dialog id.
#[derive(Debug)]
pub(crate) struct PendingDialogs {
    timeout: Duration,
    requests: HashMap<String, VecDeque<PendingRequest>>,
}

impl PendingDialogs {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            requests: HashMap::new(),
        }
    }

    pub(crate) fn track(&mut self, dialog_id: &str, now: Instant) {
        self.requests
            .entry(dialog_id.to_string())
            .or_default()
            .push_back(PendingRequest {
                deadline: now + self.timeout,
                expired: false,
            });
    }

    /// Decide whether `response` should reach the client. Deadlines are
    /// fixed at submission; only a terminal response settles a request.
    pub(crate) fn accept(&mut self, response: &Response) -> bool {
        let Some(queue) = self.requests.get_mut(&response.dialog_id) else {
            return true;
        };
        let Some(oldest) = queue.front().copied() else {
            self.requests.remove(&response.dialog_id);
            return true;
        };
        if response.is_terminal() {
            queue.pop_front();
            if queue.is_empty() {
                self.requests.remove(&response.dialog_id);
            }
        }
        !oldest.expired
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.requests
            .values()
            .flatten()
            .filter(|r| !r.expired)
            .map(|r| r.deadline)
            .min()
    }

    /// Mark every request whose deadline has passed and return its dialog
    /// id, once per request.
    pub(crate) fn expire(&mut self, now: Instant) -> Vec<String> {
        let mut due = Vec::new();
        for (dialog_id, queue) in self.requests.iter_mut() {
            for request in queue.iter_mut().filter(|r| !r.expired && r.deadline <= now) {
                request.expired = true;
                due.push(dialog_id.clone());
            }
        }
        due
    }
}

// ---------------------------------------------------------------------------
// Connection driver
// ---------------------------------------------------------------------------

type WsSink = SplitSink<WebSocket, Message>;

/// Drive one upgraded connection until either side closes it.
pub async fn run_connection(socket: WebSocket, session_id: String, state: AppState) {
    let (tx, mut rx) = mpsc::channel(state.settings.outbound_buffer.max(1));
    let session = ClientSession::new(tx);
    let connection_id = session.connection_id;
    if state.sessions.add(session_id.clone(), session).await.is_some() {
        warn!(session_id = %session_id, "replacing existing connection for session");
    }
    info!(session_id = %session_id, connection_id, "client connected");

    let (mut sink, mut stream) = socket.split();
    let mut pending = PendingDialogs::new(state.settings.max_response_timeout);

    'conn: loop {
        let deadline = pending.next_deadline();
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Err(update) =
                        submit(&state, &session_id, text.as_str(), &mut pending).await
                    {
                        if send(&mut sink, &update).await.is_err() {
                            break 'conn;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break 'conn,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(session_id = %session_id, error = %e, "websocket receive failed");
                    break 'conn;
                }
            },
            response = rx.recv() => match response {
                Some(response) => {
                    if !pending.accept(&response) {
                        debug!(
                            session_id = %session_id,
                            dialog_id = %response.dialog_id,
                            "dropping response for expired dialog"
                        );
                        continue;
                    }
                    if send(&mut sink, &ClientUpdate::from(response)).await.is_err() {
                        break 'conn;
                    }
                }
                None => {
                    info!(session_id = %session_id, connection_id, "connection released by relay");
                    break 'conn;
                }
            },
            _ = sleep_until(deadline) => {
                for dialog_id in pending.expire(Instant::now()) {
                    warn!(session_id = %session_id, dialog_id = %dialog_id, "response timed out");
                    if send(&mut sink, &ClientUpdate::error(TIMEOUT_MESSAGE)).await.is_err() {
                        break 'conn;
                    }
                }
            }
        }
    }

    let _ = sink.close().await;
    state
        .sessions
        .remove_if(&session_id, |s| s.connection_id == connection_id)
        .await;
    info!(session_id = %session_id, connection_id, "client disconnected");
}

/// Turn a client frame into a queued request. On failure, returns the error
/// frame to send back; the connection stays open.
async fn submit(
    state: &AppState,
    session_id: &str,
    raw: &str,
    pending: &mut PendingDialogs,
) -> std::result::Result<(), ClientUpdate> {
    let request = serde_json::from_str::<ClientMessage>(raw)
        .map_err(RelayError::from)
        .and_then(|m| m.into_request(session_id))
        .map_err(|e| {
            warn!(session_id, error = %e, "rejecting client frame");
            ClientUpdate::error(format!("Invalid message: {e}"))
        })?;

    let task = serde_json::to_string(&request).map_err(|e| {
        error!(session_id, error = %e, "failed to encode request");
        ClientUpdate::error(SUBMIT_FAILED_MESSAGE)
    })?;
    state.broker.tasks.push(&task).await.map_err(|e| {
        error!(session_id, error = %e, "failed to enqueue request");
        ClientUpdate::error(SUBMIT_FAILED_MESSAGE)
    })?;

    pending.track(&request.dialog_id, Instant::now());
    info!(session_id, dialog_id = %request.dialog_id, "request queued");
    Ok(())
}

async fn send(sink: &mut WsSink, update: &ClientUpdate) -> std::result::Result<(), axum::Error> {
    let json = match serde_json::to_string(update) {
        Ok(json) => json,
        Err(e) => {
            error!(error = %e, "failed to encode client update");
            return Ok(());
        }
    };
    sink.send(Message::Text(json.into())).await
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}
