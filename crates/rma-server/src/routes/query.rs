use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::info;

use crate::error::AppError;
use crate::session;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct QueryParams {
    session_id: Option<String>,
}

/// GET /api/query?session_id=<id>: upgrade to the chat WebSocket.
///
/// The session id is checked before the upgrade so a plain GET without it
/// gets a JSON 400 rather than an upgrade rejection.
pub async fn ws_chat(
    State(app): State<AppState>,
    Query(params): Query<QueryParams>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(session_id) = params.session_id.filter(|s| !s.trim().is_empty()) else {
        return AppError::bad_request("session_id is required").into_response();
    };
    let upgrade = match upgrade {
        Ok(u) => u,
        Err(rejection) => return rejection.into_response(),
    };

    info!(session_id = %session_id, "session connection requested");
    upgrade.on_upgrade(move |socket| session::run_connection(socket, session_id, app))
}
