use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::{AgentConfig, ContentType};
use crate::tools::ToolSet;
use crate::types::{AgentKind, AgentReply, ChatMessage, Role, TokenUsage};
use crate::{AgentError, Result};

/// Default upper bound for one chat-completions round trip.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Completions an agent may spend on tool calls before it must answer.
const MAX_TOOL_ROUNDS: usize = 8;

/// Something that turns an agent's instructions plus a conversation into a reply.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    async fn complete(&self, agent: &AgentConfig, messages: &[ChatMessage]) -> Result<AgentReply>;
}

// ─── OpenAiBackend ────────────────────────────────────────────────────────

/// Backend for any endpoint that speaks the `/chat/completions` protocol.
pub struct OpenAiBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    default_model: String,
    tools: HashMap<String, ToolSet>,
}

impl OpenAiBackend {
    /// `endpoint` is the API base, e.g. `https://host/v1`; `/chat/completions`
    /// is appended. `timeout` bounds each request including the body read.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        default_model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(CONNECT_TIMEOUT))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            default_model: default_model.into(),
            tools: HashMap::new(),
        })
    }

    /// Give `agent` functions it may call while composing its reply.
    pub fn with_tools(mut self, agent: AgentKind, tools: ToolSet) -> Self {
        if !tools.is_empty() {
            self.tools.insert(agent.as_str().to_string(), tools);
        }
        self
    }

    fn wire_messages(agent: &AgentConfig, messages: &[ChatMessage]) -> Vec<Value> {
        let mut wire = Vec::with_capacity(messages.len() + 1);
        wire.push(json!({ "role": "system", "content": agent.instructions }));
        for m in messages.iter().filter(|m| m.role != Role::System) {
            wire.push(json!({ "role": m.role, "content": m.content }));
        }
        wire
    }

    fn request_body(&self, agent: &AgentConfig, wire: &[Value], tools: Option<&ToolSet>) -> Value {
        let mut body = json!({
            "model": agent.model.as_deref().unwrap_or(&self.default_model),
            "messages": wire,
        });
        if let Some(t) = agent.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(p) = agent.top_p {
            body["top_p"] = json!(p);
        }
        if let Some(n) = agent.max_completion_tokens {
            body["max_tokens"] = json!(n);
        }
        if agent.content_type == ContentType::Json {
            body["response_format"] = json!({ "type": "json_object" });
        }
        if let Some(tools) = tools {
            body["tools"] = json!(tools.definitions());
            if let Some(parallel) = agent.parallel_tool_calls {
                body["parallel_tool_calls"] = json!(parallel);
            }
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<CompletionResponse> {
        let url = format!("{}/chat/completions", self.endpoint.trim_end_matches('/'));
        let mut req = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.json().await?)
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    kind: String,
    function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

fn add_usage(total: &mut Option<TokenUsage>, round: Option<TokenUsage>) {
    let Some(round) = round else { return };
    let sum = total.get_or_insert_with(TokenUsage::default);
    sum.prompt_tokens += round.prompt_tokens;
    sum.completion_tokens += round.completion_tokens;
    sum.total_tokens += round.total_tokens;
}

#[async_trait]
impl AgentBackend for OpenAiBackend {
    async fn complete(&self, agent: &AgentConfig, messages: &[ChatMessage]) -> Result<AgentReply> {
        let tools = self.tools.get(&agent.agent_name);
        let mut wire = Self::wire_messages(agent, messages);
        let mut usage = None;

        for round in 0..=MAX_TOOL_ROUNDS {
            let parsed = self.send(&self.request_body(agent, &wire, tools)).await?;
            add_usage(&mut usage, parsed.usage);
            let message = parsed
                .choices
                .into_iter()
                .next()
                .map(|c| c.message)
                .ok_or_else(|| AgentError::EmptyReply(agent.agent_name.clone()))?;

            if let (Some(tools), false) = (tools, message.tool_calls.is_empty()) {
                if round == MAX_TOOL_ROUNDS {
                    break;
                }
                info!(
                    agent = %agent.agent_name,
                    round,
                    calls = message.tool_calls.len(),
                    "model requested tool calls"
                );
                wire.push(json!({
                    "role": "assistant",
                    "content": message.content,
                    "tool_calls": message.tool_calls,
                }));
                for call in &message.tool_calls {
                    let output = tools.invoke(&call.function.name, &call.function.arguments).await;
                    wire.push(json!({
                        "role": "tool",
                        "tool_call_id": call.id,
                        "content": output,
                    }));
                }
                continue;
            }

            let text = message
                .content
                .filter(|t| !t.trim().is_empty())
                .ok_or_else(|| AgentError::EmptyReply(agent.agent_name.clone()))?;
            debug!(agent = %agent.agent_name, usage = ?usage, "completion received");
            return Ok(AgentReply {
                text,
                attachments: Vec::new(),
                usage,
            });
        }
        Err(AgentError::ToolRounds(agent.agent_name.clone()))
    }
}

// ─── ScriptedBackend ──────────────────────────────────────────────────────

/// Replies from per-agent queues, in order. Running out is an error.
#[derive(Default)]
pub struct ScriptedBackend {
    replies: Mutex<HashMap<String, VecDeque<AgentReply>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a text reply for `agent`.
    pub fn reply(self, agent: AgentKind, text: impl Into<String>) -> Self {
        self.reply_with(agent, AgentReply::text(text))
    }

    pub fn reply_with(mut self, agent: AgentKind, reply: AgentReply) -> Self {
        self.replies
            .get_mut()
            .entry(agent.as_str().to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Agent names in invocation order.
    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl AgentBackend for ScriptedBackend {
    async fn complete(&self, agent: &AgentConfig, _messages: &[ChatMessage]) -> Result<AgentReply> {
        self.calls.lock().await.push(agent.agent_name.clone());
        self.replies
            .lock()
            .await
            .get_mut(&agent.agent_name)
            .and_then(|q| q.pop_front())
            .ok_or_else(|| AgentError::EmptyReply(agent.agent_name.clone()))
    }
}

// ─── EchoBackend ──────────────────────────────────────────────────────────

/// Offline backend for local runs without a model endpoint. The planner
/// always routes straight to the final answer generator, which echoes the
/// latest user message.
pub struct EchoBackend;

#[async_trait]
impl AgentBackend for EchoBackend {
    async fn complete(&self, agent: &AgentConfig, messages: &[ChatMessage]) -> Result<AgentReply> {
        if agent.agent_name == AgentKind::Planner.as_str() {
            let plan = serde_json::json!({
                "plan_id": "offline",
                "agents": [AgentKind::FinalAnswerGenerator.as_str()],
                "justification": "no model endpoint configured",
            });
            return Ok(AgentReply::text(plan.to_string()));
        }
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("");
        Ok(AgentReply::text(format!("(offline) You asked: {last_user}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ToolProvider, ToolSpec};
    use mockito::Matcher;
    use std::io::Write;

    fn planner() -> AgentConfig {
        let mut cfg = AgentConfig::new("PLANNER_AGENT", "You plan.");
        cfg.content_type = ContentType::Json;
        cfg.temperature = Some(0.0);
        cfg.max_completion_tokens = Some(256);
        cfg
    }

    fn backend(endpoint: impl Into<String>, api_key: Option<String>) -> OpenAiBackend {
        OpenAiBackend::new(endpoint, api_key, "gpt-4o", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn request_body_prepends_instructions() {
        let backend = backend("http://x", None);
        let wire = OpenAiBackend::wire_messages(&planner(), &[ChatMessage::user("hi")]);
        let body = backend.request_body(&planner(), &wire, None);
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "You plan.");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["max_tokens"], 256);
        assert!(body.get("top_p").is_none());
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn json_agents_request_json_object_replies() {
        let backend = backend("http://x", None);
        let body = backend.request_body(&planner(), &[], None);
        assert_eq!(body["response_format"]["type"], "json_object");

        let text = AgentConfig::new("FALLBACK_AGENT", "help");
        assert!(backend.request_body(&text, &[], None).get("response_format").is_none());
    }

    #[test]
    fn tools_and_parallel_flag_are_sent_together() {
        let backend = backend("http://x", None);
        let mut agent = AgentConfig::new("JIRA_AGENT", "tickets");
        agent.parallel_tool_calls = Some(false);

        let body = backend.request_body(&agent, &[], None);
        assert!(body.get("parallel_tool_calls").is_none());

        let tools = ToolSet::new().with(StaticTool);
        let body = backend.request_body(&agent, &[], Some(&tools));
        assert_eq!(body["tools"][0]["function"]["name"], "release_status");
        assert_eq!(body["parallel_tool_calls"], false);
    }

    struct StaticTool;

    #[async_trait]
    impl ToolProvider for StaticTool {
        fn specs(&self) -> Vec<ToolSpec> {
            vec![ToolSpec {
                name: "release_status",
                description: "Status of a release.",
                parameters: json!({
                    "type": "object",
                    "properties": { "version": { "type": "string" } },
                    "required": ["version"],
                }),
            }]
        }

        async fn call(&self, _name: &str, args: &Value) -> Result<Value> {
            Ok(json!({ "version": args["version"], "status": "green" }))
        }
    }

    #[tokio::test]
    async fn tool_calls_are_run_and_answered() {
        let mut server = mockito::Server::new_async().await;
        // second round: the tool output is in the conversation
        let answer = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::Regex(r#""role":"tool""#.into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"choices":[{"message":{"role":"assistant","content":"2.1 is green."}}],
                    "usage":{"prompt_tokens":30,"completion_tokens":5,"total_tokens":35}}"#,
            )
            .create_async()
            .await;
        let call = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"choices":[{"message":{"role":"assistant","content":null,"tool_calls":[
                    {"id":"call_1","type":"function","function":{"name":"release_status","arguments":"{\"version\":\"2.1\"}"}}]}}],
                    "usage":{"prompt_tokens":20,"completion_tokens":4,"total_tokens":24}}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let backend = backend(server.url(), None)
            .with_tools(AgentKind::AzureDevOps, ToolSet::new().with(StaticTool));
        let agent = AgentConfig::new("AZURE_DEVOPS_AGENT", "work items");
        let reply = backend
            .complete(&agent, &[ChatMessage::user("is 2.1 ready?")])
            .await
            .unwrap();

        call.assert_async().await;
        answer.assert_async().await;
        assert_eq!(reply.text, "2.1 is green.");
        assert_eq!(reply.usage.unwrap().total_tokens, 59);
    }

    #[tokio::test]
    async fn endless_tool_calls_hit_round_limit() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"choices":[{"message":{"tool_calls":[
                    {"id":"c","type":"function","function":{"name":"release_status","arguments":"{}"}}]}}]}"#,
            )
            .expect(MAX_TOOL_ROUNDS + 1)
            .create_async()
            .await;

        let backend =
            backend(server.url(), None).with_tools(AgentKind::Jira, ToolSet::new().with(StaticTool));
        let agent = AgentConfig::new("JIRA_AGENT", "tickets");
        let err = backend.complete(&agent, &[]).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolRounds(_)));
    }

    #[tokio::test]
    async fn slow_endpoint_times_out() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_chunked_body(|w| {
                std::thread::sleep(Duration::from_millis(1500));
                w.write_all(br#"{"choices":[{"message":{"content":"late"}}]}"#)
            })
            .create_async()
            .await;

        let backend =
            OpenAiBackend::new(server.url(), None, "gpt-4o", Duration::from_millis(200)).unwrap();
        let err = backend.complete(&planner(), &[]).await.unwrap_err();
        assert!(matches!(err, AgentError::Http(ref e) if e.is_timeout()), "{err:?}");
    }

    #[tokio::test]
    async fn openai_backend_reads_first_choice() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"choices":[{"message":{"role":"assistant","content":"Release 1.0 is healthy."}}],
                    "usage":{"prompt_tokens":12,"completion_tokens":6,"total_tokens":18}}"#,
            )
            .create_async()
            .await;

        let backend = backend(format!("{}/v1/", server.url()), Some("secret".into()));
        let reply = backend
            .complete(&planner(), &[ChatMessage::user("status?")])
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(reply.text, "Release 1.0 is healthy.");
        assert_eq!(reply.usage.unwrap().total_tokens, 18);
    }

    #[tokio::test]
    async fn openai_backend_surfaces_http_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body("rate limited")
            .create_async()
            .await;

        let backend = backend(server.url(), None);
        let err = backend.complete(&planner(), &[]).await.unwrap_err();
        assert!(matches!(err, AgentError::Api { status: 429, ref body } if body == "rate limited"));
    }

    #[tokio::test]
    async fn openai_backend_rejects_empty_choices() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[]}"#)
            .create_async()
            .await;

        let backend = backend(server.url(), None);
        let err = backend.complete(&planner(), &[]).await.unwrap_err();
        assert!(matches!(err, AgentError::EmptyReply(_)));
    }

    #[tokio::test]
    async fn scripted_backend_replays_in_order() {
        let backend = ScriptedBackend::new()
            .reply(AgentKind::Planner, "one")
            .reply(AgentKind::Planner, "two");
        let cfg = planner();
        assert_eq!(backend.complete(&cfg, &[]).await.unwrap().text, "one");
        assert_eq!(backend.complete(&cfg, &[]).await.unwrap().text, "two");
        assert!(backend.complete(&cfg, &[]).await.is_err());
        assert_eq!(backend.calls().await.len(), 3);
    }

    #[tokio::test]
    async fn echo_backend_plans_and_echoes() {
        let plan = EchoBackend.complete(&planner(), &[]).await.unwrap();
        assert!(plan.text.contains("FINAL_ANSWER_GENERATOR_AGENT"));

        let cfg = AgentConfig::new("FINAL_ANSWER_GENERATOR_AGENT", "answer");
        let reply = EchoBackend
            .complete(&cfg, &[ChatMessage::user("is 2.1 ready?")])
            .await
            .unwrap();
        assert!(reply.text.ends_with("is 2.1 ready?"));
    }
}
