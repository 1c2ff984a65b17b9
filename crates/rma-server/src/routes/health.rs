/// GET /health on the session manager.
pub async fn session_manager() -> &'static str {
    "Session manager is running!"
}

/// GET /health on the orchestrator.
pub async fn orchestrator() -> &'static str {
    "Orchestrator is running!"
}
