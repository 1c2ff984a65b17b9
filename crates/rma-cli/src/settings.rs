//! Command-line and environment settings shared by the service commands.

use anyhow::Context;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use rma_agent::tools::azure_devops::DEFAULT_BASE_URL;
use rma_agent::{
    AgentBackend, AgentKind, AzureDevOpsSettings, AzureDevOpsTools, EchoBackend, JiraSettings,
    JiraTools, OpenAiBackend, RuntimeConfig, ToolSet,
};
use rma_core::config::{
    BrokerSettings, RedisSettings, SessionSettings, WorkerSettings, DEFAULT_MESSAGE_CHANNEL,
    DEFAULT_TASK_QUEUE,
};

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

#[derive(Args, Debug, Clone)]
pub struct BrokerArgs {
    /// Redis host. Without it, an in-process broker is used
    #[arg(long, env = "REDIS_HOST")]
    pub redis_host: Option<String>,

    #[arg(long, env = "REDIS_PORT", default_value_t = 6379)]
    pub redis_port: u16,

    #[arg(long, env = "REDIS_PASSWORD", hide_env_values = true)]
    pub redis_password: Option<String>,

    /// Connect with TLS
    #[arg(long, env = "REDIS_SSL")]
    pub redis_ssl: bool,

    /// List that carries requests to the orchestrator
    #[arg(long, env = "REDIS_TASK_QUEUE_CHANNEL", default_value = DEFAULT_TASK_QUEUE)]
    pub task_queue: String,

    /// Channel that carries responses back to session managers
    #[arg(long, env = "REDIS_MESSAGE_QUEUE_CHANNEL", default_value = DEFAULT_MESSAGE_CHANNEL)]
    pub message_channel: String,
}

impl BrokerArgs {
    pub fn settings(&self) -> BrokerSettings {
        let redis = self
            .redis_host
            .as_ref()
            .filter(|h| !h.trim().is_empty())
            .map(|host| RedisSettings {
                host: host.clone(),
                port: self.redis_port,
                password: self.redis_password.clone(),
                ssl: self.redis_ssl,
            });
        BrokerSettings {
            redis,
            task_queue: self.task_queue.clone(),
            message_channel: self.message_channel.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Session manager
// ---------------------------------------------------------------------------

#[derive(Args, Debug, Clone)]
pub struct SessionArgs {
    /// Seconds a request may wait without any response before it times out
    #[arg(long, env = "SESSION_MAX_RESPONSE_TIMEOUT_IN_SECONDS", default_value_t = 120)]
    pub max_response_timeout: u64,
}

impl SessionArgs {
    pub fn settings(&self) -> SessionSettings {
        SessionSettings {
            max_response_timeout: Duration::from_secs(self.max_response_timeout.max(1)),
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

#[derive(Args, Debug, Clone)]
pub struct AgentArgs {
    /// Number of workers pulling from the task queue
    #[arg(long, env = "AGENT_ORCHESTRATOR_MAX_CONCURRENCY", default_value_t = 5)]
    pub concurrency: usize,

    /// YAML agent runtime config (default: built-in)
    #[arg(long, env = "AGENT_RUNTIME_CONFIG")]
    pub runtime_config: Option<PathBuf>,

    /// Base URL of a chat-completions endpoint. Without it, agents answer offline
    #[arg(long, env = "AGENT_ENDPOINT")]
    pub agent_endpoint: Option<String>,

    #[arg(long, env = "AGENT_API_KEY", hide_env_values = true)]
    pub agent_api_key: Option<String>,

    /// Model used when an agent does not name one
    #[arg(long, env = "AGENT_MODEL", default_value = "gpt-4o")]
    pub agent_model: String,

    /// Seconds one model or tool HTTP request may take
    #[arg(long, env = "AGENT_REQUEST_TIMEOUT_IN_SECONDS", default_value_t = 120)]
    pub request_timeout: u64,

    #[command(flatten)]
    pub jira: JiraArgs,

    #[command(flatten)]
    pub azure_devops: AzureDevOpsArgs,
}

impl AgentArgs {
    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            concurrency: self.concurrency,
            ..Default::default()
        }
    }

    pub fn runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        load_runtime_config(self.runtime_config.as_deref())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout.max(1))
    }

    pub fn backend(&self) -> anyhow::Result<Arc<dyn AgentBackend>> {
        let Some(endpoint) = self.agent_endpoint.as_deref().filter(|e| !e.trim().is_empty())
        else {
            warn!("AGENT_ENDPOINT not set; agents answer offline");
            return Ok(Arc::new(EchoBackend));
        };

        info!(endpoint, model = %self.agent_model, "using chat-completions backend");
        let timeout = self.request_timeout();
        let mut backend = OpenAiBackend::new(
            endpoint,
            self.agent_api_key.clone(),
            self.agent_model.clone(),
            timeout,
        )
        .context("failed to build model client")?;

        if let Some(settings) = self.jira.settings() {
            info!(endpoint = %settings.endpoint, "jira tools enabled");
            let tools = JiraTools::new(settings, timeout).context("failed to build jira client")?;
            backend = backend.with_tools(AgentKind::Jira, ToolSet::new().with(tools));
        }
        if let Some(settings) = self.azure_devops.settings() {
            info!(org_url = %settings.org_url(), "azure devops tools enabled");
            let tools = AzureDevOpsTools::new(settings, timeout)
                .context("failed to build azure devops client")?;
            backend = backend.with_tools(AgentKind::AzureDevOps, ToolSet::new().with(tools));
        }
        Ok(Arc::new(backend))
    }
}

// ---------------------------------------------------------------------------
// Agent tools
// ---------------------------------------------------------------------------

#[derive(Args, Debug, Clone)]
pub struct JiraArgs {
    /// Jira is served by a hosted tool server; JIRA_AGENT gets no direct tools
    #[arg(long, env = "USE_JIRA_MCP_SERVER")]
    pub use_jira_mcp_server: bool,

    /// Jira server base URL
    #[arg(long, env = "JIRA_SERVER_ENDPOINT")]
    pub jira_endpoint: Option<String>,

    #[arg(long, env = "JIRA_SERVER_USERNAME")]
    pub jira_username: Option<String>,

    #[arg(long, env = "JIRA_SERVER_PASSWORD", hide_env_values = true)]
    pub jira_password: Option<String>,
}

impl JiraArgs {
    /// Direct REST settings, when Jira is configured and not delegated.
    pub fn settings(&self) -> Option<JiraSettings> {
        let endpoint = non_empty(&self.jira_endpoint)?;
        if self.use_jira_mcp_server {
            warn!("USE_JIRA_MCP_SERVER is set; JIRA_AGENT runs without direct Jira tools");
            return None;
        }
        let (Some(username), Some(password)) =
            (non_empty(&self.jira_username), non_empty(&self.jira_password))
        else {
            warn!("JIRA_SERVER_USERNAME or JIRA_SERVER_PASSWORD missing; Jira tools disabled");
            return None;
        };
        Some(JiraSettings {
            endpoint,
            username,
            password,
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct AzureDevOpsArgs {
    /// Azure DevOps is served by a hosted tool server; AZURE_DEVOPS_AGENT gets no direct tools
    #[arg(long, env = "USE_AZURE_DEVOPS_MCP_SERVER")]
    pub use_azure_devops_mcp_server: bool,

    /// Endpoint of the hosted Azure DevOps tool server
    #[arg(long, env = "AZURE_DEVOPS_MCP_SERVER_ENDPOINT")]
    pub azure_devops_mcp_server_endpoint: Option<String>,

    #[arg(long, env = "AZURE_DEVOPS_ORG_NAME")]
    pub azure_devops_org: Option<String>,

    /// Project WIQL queries default to
    #[arg(long, env = "AZURE_DEVOPS_PROJECT")]
    pub azure_devops_project: Option<String>,

    /// Personal access token
    #[arg(long, env = "AZURE_DEVOPS_EXT_PAT", hide_env_values = true)]
    pub azure_devops_pat: Option<String>,

    /// Service root the organization lives under
    #[arg(long, env = "AZURE_DEVOPS_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub azure_devops_base_url: String,
}

impl AzureDevOpsArgs {
    /// Direct REST settings, when an organization is configured and not delegated.
    pub fn settings(&self) -> Option<AzureDevOpsSettings> {
        let organization = non_empty(&self.azure_devops_org)?;
        if self.use_azure_devops_mcp_server {
            warn!(
                endpoint = self.azure_devops_mcp_server_endpoint.as_deref().unwrap_or("-"),
                "USE_AZURE_DEVOPS_MCP_SERVER is set; AZURE_DEVOPS_AGENT runs without direct tools"
            );
            return None;
        }
        let Some(pat) = non_empty(&self.azure_devops_pat) else {
            warn!("AZURE_DEVOPS_EXT_PAT missing; Azure DevOps tools disabled");
            return None;
        };
        Some(AzureDevOpsSettings {
            base_url: self.azure_devops_base_url.clone(),
            organization,
            project: non_empty(&self.azure_devops_project),
            pat,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// Load and check a runtime config; `None` selects the built-in one.
pub fn load_runtime_config(path: Option<&std::path::Path>) -> anyhow::Result<RuntimeConfig> {
    let config = match path {
        Some(path) => RuntimeConfig::load(path)
            .with_context(|| format!("failed to load runtime config {}", path.display()))?,
        None => RuntimeConfig::builtin().context("built-in runtime config is invalid")?,
    };
    config.check()?;
    Ok(config)
}
