use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model endpoint returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("planner returned an invalid plan: {0}")]
    InvalidPlan(String),

    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("no configuration for agent: {0}")]
    MissingAgentConfig(String),

    #[error("agent {0} returned no reply")]
    EmptyReply(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid tool arguments: {0}")]
    ToolArguments(String),

    #[error("agent {0} kept requesting tools past the round limit")]
    ToolRounds(String),

    #[error("invalid runtime config: {0}")]
    Config(String),

    #[error("failed to publish update: {0}")]
    Publish(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
