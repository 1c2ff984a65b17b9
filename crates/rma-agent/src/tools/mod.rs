//! Functions an agent can call while it composes a reply.
//!
//! A [`ToolProvider`] groups related functions behind one HTTP API (Jira,
//! Azure DevOps). A [`ToolSet`] bundles providers for one agent, advertises
//! them in chat-completions `tools` format and dispatches the model's calls.
//! A failing call is reported back to the model as `{"error": ...}` so it can
//! correct itself instead of aborting the workflow.

pub mod azure_devops;
pub mod jira;

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{AgentError, Result};

pub use self::azure_devops::{AzureDevOpsSettings, AzureDevOpsTools};
pub use self::jira::{JiraSettings, JiraTools};

/// Name, description and JSON schema of one callable function.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

#[async_trait]
pub trait ToolProvider: Send + Sync {
    fn specs(&self) -> Vec<ToolSpec>;

    /// Run `name` with already-parsed JSON arguments.
    async fn call(&self, name: &str, args: &Value) -> Result<Value>;
}

#[derive(Clone, Default)]
pub struct ToolSet {
    providers: Vec<Arc<dyn ToolProvider>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: impl ToolProvider + 'static) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// The `tools` array of a chat-completions request.
    pub fn definitions(&self) -> Vec<Value> {
        self.providers
            .iter()
            .flat_map(|p| p.specs())
            .map(|spec| {
                json!({
                    "type": "function",
                    "function": {
                        "name": spec.name,
                        "description": spec.description,
                        "parameters": spec.parameters,
                    }
                })
            })
            .collect()
    }

    /// Run one model-requested call and render the result for a `tool`
    /// message. `arguments` is the raw JSON string the model produced.
    pub async fn invoke(&self, name: &str, arguments: &str) -> String {
        match self.dispatch(name, arguments).await {
            Ok(value) => {
                debug!(tool = name, "tool call succeeded");
                value.to_string()
            }
            Err(e) => {
                warn!(tool = name, error = %e, "tool call failed");
                json!({ "error": e.to_string() }).to_string()
            }
        }
    }

    async fn dispatch(&self, name: &str, arguments: &str) -> Result<Value> {
        let provider = self
            .providers
            .iter()
            .find(|p| p.specs().iter().any(|s| s.name == name))
            .ok_or_else(|| AgentError::UnknownTool(name.to_string()))?;
        let args = if arguments.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(arguments)
                .map_err(|e| AgentError::ToolArguments(format!("{name}: {e}")))?
        };
        provider.call(name, &args).await
    }
}

// ---------------------------------------------------------------------------
// Helpers shared by the providers
// ---------------------------------------------------------------------------

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .build()?)
}

pub(crate) fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AgentError::ToolArguments(format!("'{key}' must be a non-empty string")))
}

pub(crate) fn optional_u64(args: &Value, key: &str, default: u64, max: u64) -> u64 {
    args.get(key)
        .and_then(Value::as_u64)
        .unwrap_or(default)
        .clamp(1, max)
}

/// Fail with the response body for any non-2xx status.
pub(crate) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(AgentError::Api {
        status: status.as_u16(),
        body,
    })
}
