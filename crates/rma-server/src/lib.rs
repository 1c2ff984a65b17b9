pub mod error;
pub mod fanin;
pub mod routes;
pub mod session;
pub mod state;
pub mod worker;

use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use rma_core::config::WorkerSettings;

pub use state::AppState;
pub use worker::{Orchestration, WorkerPool};

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Build the session manager router: health check plus the chat WebSocket.
/// Used by `serve_session_manager()` and available for integration testing.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health::session_manager))
        .route("/api/query", get(routes::query::ws_chat))
        .layer(TraceLayer::new_for_http())
        .layer(cors())
        .with_state(state)
}

/// The orchestrator only exposes a health check; its work arrives over the
/// task queue.
pub fn build_orchestrator_router() -> Router {
    Router::new()
        .route("/health", get(routes::health::orchestrator))
        .layer(TraceLayer::new_for_http())
        .layer(cors())
}

/// Run the session manager on a pre-bound listener until Ctrl-C.
///
/// The response subscription is established before the listener starts
/// accepting, so no response published for an accepted session is missed.
pub async fn serve_session_manager(
    listener: tokio::net::TcpListener,
    state: AppState,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    let fanin = fanin::start(state.clone()).await?;

    info!("session manager listening on http://{addr}");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    fanin.abort();
    info!("session manager stopped");
    Ok(())
}

/// Run the orchestrator worker pool and its health endpoint until Ctrl-C.
pub async fn serve_orchestrator(
    listener: tokio::net::TcpListener,
    orchestration: Arc<Orchestration>,
    settings: &WorkerSettings,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    let pool = WorkerPool::spawn(orchestration, settings);

    info!(workers = settings.concurrency, "orchestrator listening on http://{addr}");
    axum::serve(listener, build_orchestrator_router())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}
