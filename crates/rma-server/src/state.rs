use std::sync::Arc;

use rma_core::broker::Broker;
use rma_core::cache::SessionCache;
use rma_core::config::SessionSettings;

use crate::session::ClientSession;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub broker: Broker,
    /// Live WebSocket connections on this instance, keyed by session id.
    pub sessions: SessionCache<ClientSession>,
    pub settings: Arc<SessionSettings>,
}

impl AppState {
    pub fn new(broker: Broker, settings: SessionSettings) -> Self {
        Self {
            broker,
            sessions: SessionCache::new(),
            settings: Arc::new(settings),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn new_state_starts_without_sessions() {
        let settings = SessionSettings {
            max_response_timeout: Duration::from_secs(3),
            ..Default::default()
        };
        let state = AppState::new(Broker::memory(), settings);
        assert!(state.sessions.is_empty().await);
        assert_eq!(state.settings.max_response_timeout, Duration::from_secs(3));
    }
}
