use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{AgentError, Result};

// ─── Chat history ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// ─── Agents ───────────────────────────────────────────────────────────────

/// The agents a plan can name. The string form is what the planner emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentKind {
    Planner,
    Jira,
    AzureDevOps,
    FinalAnswerGenerator,
    Fallback,
}

impl AgentKind {
    pub const ALL: [AgentKind; 5] = [
        AgentKind::Planner,
        AgentKind::Jira,
        AgentKind::AzureDevOps,
        AgentKind::FinalAnswerGenerator,
        AgentKind::Fallback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Planner => "PLANNER_AGENT",
            AgentKind::Jira => "JIRA_AGENT",
            AgentKind::AzureDevOps => "AZURE_DEVOPS_AGENT",
            AgentKind::FinalAnswerGenerator => "FINAL_ANSWER_GENERATOR_AGENT",
            AgentKind::Fallback => "FALLBACK_AGENT",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        AgentKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| AgentError::UnknownAgent(s.to_string()))
    }
}

// ─── Replies ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentReply {
    pub text: String,
    /// URLs of artifacts produced alongside the text (charts, reports).
    pub attachments: Vec<String>,
    pub usage: Option<TokenUsage>,
}

impl AgentReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

// ─── Plan ─────────────────────────────────────────────────────────────────

/// The planner's decision: which agents to run, in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub plan_id: Option<String>,
    /// `None` when the planner named no agents at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agents: Option<Vec<String>>,
    #[serde(default)]
    pub justification: String,
}

impl Plan {
    /// Parse planner output. A surrounding markdown code fence is tolerated.
    pub fn parse(text: &str) -> Result<Self> {
        let body = strip_code_fence(text.trim());
        let mut plan: Plan =
            serde_json::from_str(body).map_err(|e| AgentError::InvalidPlan(e.to_string()))?;
        plan.justification = plan.justification.trim().to_string();
        Ok(plan)
    }

    /// The planner produced no agent list or routed to the fallback agent.
    /// An explicit empty list is a valid plan with nothing to run.
    pub fn needs_fallback(&self) -> bool {
        match &self.agents {
            None => true,
            Some(agents) => agents.iter().any(|a| a == AgentKind::Fallback.as_str()),
        }
    }

    /// Agents to run, in order.
    pub fn steps(&self) -> &[String] {
        self.agents.as_deref().unwrap_or_default()
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
