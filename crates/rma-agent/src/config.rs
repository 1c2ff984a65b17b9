use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::types::AgentKind;
use crate::{AgentError, Result};

const BUILTIN_CONFIG: &str = include_str!("../static/release_manager.yaml");

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// AgentConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ContentType {
    /// Ask the model for a JSON object reply.
    #[serde(rename = "application/json")]
    Json,
    #[default]
    #[serde(rename = "text/plain")]
    Text,
}

/// Instructions and sampling knobs for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent_name: String,
    pub instructions: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
    /// Let the model request several tool calls in one turn. Only sent when
    /// the agent has tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
}

impl AgentConfig {
    pub fn new(agent_name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            instructions: instructions.into(),
            model: None,
            content_type: ContentType::default(),
            temperature: None,
            top_p: None,
            max_completion_tokens: None,
            parallel_tool_calls: None,
        }
    }
}

// ---------------------------------------------------------------------------
// RuntimeConfig
// ---------------------------------------------------------------------------

/// The set of agents an orchestrator may invoke. Resolved once per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
}

impl RuntimeConfig {
    /// The configuration shipped with the binary.
    pub fn builtin() -> Result<Self> {
        Self::from_yaml(BUILTIN_CONFIG)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(data)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml(&data)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn agent(&self, kind: AgentKind) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.agent_name == kind.as_str())
    }

    /// Report problems without failing.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut seen = HashSet::new();

        for agent in &self.agents {
            if !seen.insert(agent.agent_name.as_str()) {
                warnings.push(error(format!("duplicate agent '{}'", agent.agent_name)));
            }
            if agent.agent_name.parse::<AgentKind>().is_err() {
                warnings.push(warning(format!(
                    "agent '{}' is not a known agent and will never be invoked",
                    agent.agent_name
                )));
            }
            if agent.instructions.trim().is_empty() {
                warnings.push(warning(format!(
                    "agent '{}' has empty instructions",
                    agent.agent_name
                )));
            }
            if let Some(t) = agent.temperature {
                if !(0.0..=1.0).contains(&t) {
                    warnings.push(error(format!(
                        "agent '{}' temperature {t} is outside [0.0, 1.0]",
                        agent.agent_name
                    )));
                }
            }
        }

        for required in [AgentKind::Planner, AgentKind::Fallback] {
            if self.agent(required).is_none() {
                warnings.push(error(format!("required agent '{required}' is missing")));
            }
        }
        if self.agent(AgentKind::FinalAnswerGenerator).is_none() {
            warnings.push(warning(format!(
                "'{}' is missing; planned runs will return an empty answer",
                AgentKind::FinalAnswerGenerator
            )));
        }

        warnings
    }

    /// Fail on the first error-level finding.
    pub fn check(&self) -> Result<()> {
        match self
            .validate()
            .into_iter()
            .find(|w| w.level == WarnLevel::Error)
        {
            Some(w) => Err(AgentError::Config(w.message)),
            None => Ok(()),
        }
    }
}

fn error(message: String) -> ConfigWarning {
    ConfigWarning {
        level: WarnLevel::Error,
        message,
    }
}

fn warning(message: String) -> ConfigWarning {
    ConfigWarning {
        level: WarnLevel::Warning,
        message,
    }
}
