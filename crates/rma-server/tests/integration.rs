use axum::http::StatusCode;
use futures::{SinkExt, StreamExt};
use http_body_util::BodyExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tower::ServiceExt;

use rma_agent::{AgentKind, RuntimeConfig, ScriptedBackend};
use rma_core::broker::Broker;
use rma_core::config::{SessionSettings, WorkerSettings};
use rma_core::contracts::{ClientMessage, ClientUpdate};
use rma_server::{AppState, Orchestration, WorkerPool};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Send a GET request via `oneshot` and return (status, body text).
async fn get(app: axum::Router, uri: &str) -> (StatusCode, String) {
    let req = axum::http::Request::builder()
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&body).into_owned())
}

fn state(timeout: Duration) -> AppState {
    AppState::new(
        Broker::memory(),
        SessionSettings {
            max_response_timeout: timeout,
            ..Default::default()
        },
    )
}

/// Serve the session manager on an ephemeral port. Returns the base ws URL.
async fn spawn_session_manager(state: AppState) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    rma_server::fanin::start(state.clone()).await.unwrap();
    tokio::spawn(async move {
        axum::serve(listener, rma_server::build_router(state))
            .await
            .unwrap();
    });
    format!("ws://{addr}")
}

async fn next_update<S>(ws: &mut S) -> ClientUpdate
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

const PLAN: &str = r#"{"plan_id":"p","agents":["FINAL_ANSWER_GENERATOR_AGENT"],"justification":"status"}"#;

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

#[tokio::test]
async fn session_manager_health() {
    let app = rma_server::build_router(state(Duration::from_secs(5)));
    let (status, body) = get(app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Session manager is running!");
}

#[tokio::test]
async fn orchestrator_health() {
    let (status, body) = get(rma_server::build_orchestrator_router(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Orchestrator is running!");
}

#[tokio::test]
async fn query_without_session_id_is_rejected() {
    let app = rma_server::build_router(state(Duration::from_secs(5)));
    let (status, body) = get(app, "/api/query").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["error"], "session_id is required");
}

#[tokio::test]
async fn query_with_blank_session_id_is_rejected() {
    let app = rma_server::build_router(state(Duration::from_secs(5)));
    let (status, _) = get(app, "/api/query?session_id=%20").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

#[tokio::test]
async fn chat_round_trip_through_workers() {
    let state = state(Duration::from_secs(10));
    let broker = state.broker.clone();
    let base = spawn_session_manager(state).await;

    let backend = ScriptedBackend::new()
        .reply(AgentKind::Planner, PLAN)
        .reply(AgentKind::FinalAnswerGenerator, "Release 1.2 is on track.");
    let orchestration = Arc::new(Orchestration::new(
        broker,
        Arc::new(backend),
        RuntimeConfig::builtin().unwrap(),
    ));
    let pool = WorkerPool::spawn(
        orchestration,
        &WorkerSettings {
            concurrency: 1,
            poll_interval: Duration::from_millis(10),
        },
    );

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("{base}/api/query?session_id=s1"))
        .await
        .unwrap();
    let frame = serde_json::to_string(&ClientMessage::text("d1", "How is the release?")).unwrap();
    ws.send(Message::text(frame)).await.unwrap();

    let first = next_update(&mut ws).await;
    let answer = first.answer.unwrap();
    assert_eq!(answer.answer_string, "Processing your request...");
    assert_eq!(answer.is_final, Some(false));

    let last = loop {
        let update = next_update(&mut ws).await;
        if update.answer.as_ref().is_some_and(|a| !a.is_intermediate()) {
            break update;
        }
    };
    assert_eq!(last.answer.unwrap().answer_string, "Release 1.2 is on track.");

    pool.shutdown().await;
}

#[tokio::test]
async fn invalid_frame_gets_error_and_connection_stays_open() {
    let base = spawn_session_manager(state(Duration::from_secs(10))).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("{base}/api/query?session_id=s2"))
        .await
        .unwrap();

    ws.send(Message::text("{not json")).await.unwrap();
    let update = next_update(&mut ws).await;
    assert!(update.error.unwrap().error_str.starts_with("Invalid message"));

    let blank = serde_json::to_string(&ClientMessage::text("d1", "   ")).unwrap();
    ws.send(Message::text(blank)).await.unwrap();
    let update = next_update(&mut ws).await;
    assert!(update.error.is_some());
}

#[tokio::test]
async fn unanswered_request_times_out() {
    // no workers: nothing ever answers
    let base = spawn_session_manager(state(Duration::from_millis(200))).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("{base}/api/query?session_id=s3"))
        .await
        .unwrap();

    let frame = serde_json::to_string(&ClientMessage::text("d1", "anyone there?")).unwrap();
    ws.send(Message::text(frame)).await.unwrap();

    let update = next_update(&mut ws).await;
    assert_eq!(
        update.error.unwrap().error_str,
        rma_server::session::TIMEOUT_MESSAGE
    );
}

#[tokio::test]
async fn second_connection_replaces_first_and_keeps_receiving() {
    let state = state(Duration::from_secs(10));
    let broker = state.broker.clone();
    let sessions = state.sessions.clone();
    let base = spawn_session_manager(state).await;
    let url = format!("{base}/api/query?session_id=shared");

    let (mut first, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    let (mut second, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

    // the replaced connection is closed by the server
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match first.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await
    .expect("first connection should be closed");

    // let the closed connection finish its cleanup
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(sessions.contains("shared").await);

    let backend = ScriptedBackend::new()
        .reply(AgentKind::Planner, PLAN)
        .reply(AgentKind::FinalAnswerGenerator, "Still here.");
    let orchestration = Arc::new(Orchestration::new(
        broker,
        Arc::new(backend),
        RuntimeConfig::builtin().unwrap(),
    ));
    let pool = WorkerPool::spawn(
        orchestration,
        &WorkerSettings {
            concurrency: 1,
            poll_interval: Duration::from_millis(10),
        },
    );

    let frame = serde_json::to_string(&ClientMessage::text("d1", "still there?")).unwrap();
    second.send(Message::text(frame)).await.unwrap();
    let last = loop {
        let update = next_update(&mut second).await;
        if update.answer.as_ref().is_some_and(|a| !a.is_intermediate()) {
            break update;
        }
    };
    assert_eq!(last.answer.unwrap().answer_string, "Still here.");

    pool.shutdown().await;
}
