use crate::{RelayError, Result};

/// Build the session WebSocket URL from a configured session manager base URL.
///
/// `http` becomes `ws` and `https` becomes `wss`; a base that is already a
/// WebSocket URL is used as is. The session id is percent-encoded.
pub fn query_url(base: &str, session_id: &str) -> Result<String> {
    let base = base.trim().trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if base.starts_with("wss://") || base.starts_with("ws://") {
        base.to_string()
    } else {
        return Err(RelayError::InvalidUrl(base.to_string()));
    };
    Ok(format!(
        "{ws_base}/api/query?session_id={}",
        urlencoding::encode(session_id)
    ))
}
