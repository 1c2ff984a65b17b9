//! `rma-agent`: the agent side of the release manager assistant.
//!
//! # Architecture
//!
//! ```text
//! Request (from the task queue)
//!     │
//!     ▼
//! AgentOrchestrator   ← one per session, owns the chat history
//!     │                 planner → [JIRA_AGENT, AZURE_DEVOPS_AGENT, …] → final answer
//!     ▼
//! AgentBackend        ← trait: OpenAiBackend (HTTP), ScriptedBackend, EchoBackend
//!     │                 OpenAiBackend runs tool calls for JIRA_AGENT / AZURE_DEVOPS_AGENT
//!     ▼
//! ToolSet             ← Jira REST and Azure DevOps REST functions
//!
//! RuntimeConfig       ← per-agent instructions and sampling knobs (YAML)
//! ```
//!
//! Progress is reported through an [`UpdateSink`] so the caller decides where
//! intermediate messages go (the orchestrator service publishes them on the
//! message channel).

pub mod backend;
pub mod config;
pub mod error;
pub mod tools;
pub mod types;
pub mod workflow;

pub use backend::{AgentBackend, EchoBackend, OpenAiBackend, ScriptedBackend};
pub use config::{AgentConfig, RuntimeConfig};
pub use error::AgentError;
pub use tools::{AzureDevOpsSettings, AzureDevOpsTools, JiraSettings, JiraTools, ToolSet};
pub use types::{AgentKind, AgentReply, ChatMessage, Plan, Role, TokenUsage};
pub use workflow::{AgentOrchestrator, UpdateSink};

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, AgentError>;
