use async_trait::async_trait;
use rma_core::contracts::{Request, Response};
use std::sync::Arc;
use tracing::{info, warn};

use crate::backend::AgentBackend;
use crate::config::RuntimeConfig;
use crate::types::{AgentKind, AgentReply, ChatMessage, Plan};
use crate::{AgentError, Result};

pub const GENERATING_PLAN: &str = "Generating plan...";
pub const PLAN_GENERATED: &str = "Plan generated. Starting Agent orchestration..";

/// Receives progress messages while a request is being worked on.
#[async_trait]
pub trait UpdateSink: Send + Sync {
    async fn send_update(&self, request: &Request, message: &str) -> Result<()>;
}

/// Runs the planner-driven agent workflow for one session.
///
/// The orchestrator keeps the session's chat history across requests, so the
/// same instance must be reused for every request of a session.
pub struct AgentOrchestrator {
    config: Arc<RuntimeConfig>,
    backend: Arc<dyn AgentBackend>,
    history: Vec<ChatMessage>,
}

impl AgentOrchestrator {
    pub fn new(config: Arc<RuntimeConfig>, backend: Arc<dyn AgentBackend>) -> Self {
        Self {
            config,
            backend,
            history: Vec::new(),
        }
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Answer one request. Intermediate progress goes to `sink`; the returned
    /// response is final.
    pub async fn run(&mut self, request: &Request, sink: &dyn UpdateSink) -> Result<Response> {
        info!(
            session_id = %request.session_id,
            dialog_id = %request.dialog_id,
            "starting agent workflow"
        );
        self.history.push(ChatMessage::user(&request.message));
        sink.send_update(request, GENERATING_PLAN).await?;

        let plan = self.plan().await?;
        if plan.needs_fallback() {
            warn!(
                session_id = %request.session_id,
                agents = ?plan.agents,
                "planner produced no routable plan, invoking fallback"
            );
            let reply = self
                .invoke(AgentKind::Fallback, &[ChatMessage::user(&request.message)])
                .await?;
            return Ok(Response::final_answer(request, reply.text, Vec::new()));
        }

        info!(
            session_id = %request.session_id,
            agents = ?plan.agents,
            justification = %plan.justification,
            "plan generated"
        );
        sink.send_update(request, PLAN_GENERATED).await?;

        let mut final_answer = AgentReply::default();
        for name in plan.steps() {
            let kind: AgentKind = name.parse()?;
            let history = self.history.clone();
            let reply = self.invoke(kind, &history).await?;
            self.history.push(ChatMessage::assistant(&reply.text));
            if kind == AgentKind::FinalAnswerGenerator {
                final_answer = reply;
            }
        }

        Ok(Response::final_answer(
            request,
            final_answer.text,
            final_answer.attachments,
        ))
    }

    async fn plan(&self) -> Result<Plan> {
        let reply = self.invoke(AgentKind::Planner, &self.history).await?;
        Plan::parse(&reply.text)
    }

    async fn invoke(&self, kind: AgentKind, messages: &[ChatMessage]) -> Result<AgentReply> {
        let agent = self
            .config
            .agent(kind)
            .ok_or_else(|| AgentError::MissingAgentConfig(kind.to_string()))?;
        info!(agent = %kind, messages = messages.len(), "invoking agent");
        let reply = self.backend.complete(agent, messages).await?;
        if let Some(usage) = &reply.usage {
            info!(
                agent = %kind,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "agent usage"
            );
        }
        Ok(reply)
    }
}
