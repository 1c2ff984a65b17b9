//! Orchestrator side: workers that pull requests off the task queue, run the
//! agent workflow and publish every response on the message channel.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use rma_agent::{AgentBackend, AgentError, AgentOrchestrator, RuntimeConfig, UpdateSink};
use rma_core::broker::{Broker, MessageBus};
use rma_core::cache::SessionCache;
use rma_core::config::WorkerSettings;
use rma_core::contracts::{Envelope, Request, Response};

pub const PROCESSING_MESSAGE: &str = "Processing your request...";
pub const FAILURE_MESSAGE: &str = "An error occurred. Please retry..";

// ---------------------------------------------------------------------------
// BusPublisher
// ---------------------------------------------------------------------------

/// Publishes responses, wrapped in an [`Envelope`], on the message channel.
#[derive(Clone)]
pub struct BusPublisher {
    bus: Arc<dyn MessageBus>,
}

impl BusPublisher {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self { bus }
    }

    pub async fn publish(&self, response: Response) -> rma_core::Result<()> {
        let json = Envelope::wrap(response).to_json()?;
        self.bus.publish(&json).await
    }
}

#[async_trait]
impl UpdateSink for BusPublisher {
    async fn send_update(&self, request: &Request, message: &str) -> rma_agent::Result<()> {
        self.publish(Response::update(request, message))
            .await
            .map_err(|e| AgentError::Publish(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Orchestration
// ---------------------------------------------------------------------------

/// Everything a worker needs to answer a task. Shared by all workers.
pub struct Orchestration {
    broker: Broker,
    publisher: BusPublisher,
    backend: Arc<dyn AgentBackend>,
    config: Arc<RuntimeConfig>,
    /// One orchestrator per session; it owns the session's chat history.
    orchestrators: SessionCache<Arc<Mutex<AgentOrchestrator>>>,
}

impl Orchestration {
    pub fn new(broker: Broker, backend: Arc<dyn AgentBackend>, config: RuntimeConfig) -> Self {
        let publisher = BusPublisher::new(broker.messages.clone());
        Self {
            broker,
            publisher,
            backend,
            config: Arc::new(config),
            orchestrators: SessionCache::new(),
        }
    }

    /// Handle one raw task from the queue. Every outcome is reported to the
    /// client through the message channel; only publish failures surface here.
    pub async fn process_task(&self, raw: &str) -> rma_core::Result<()> {
        let request: Request = match serde_json::from_str(raw) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "failed to parse task");
                let mut response =
                    Response::failure(None, format!("Failed to parse request data: {e}"));
                if let Some((session_id, dialog_id)) = addressing_hint(raw) {
                    response.session_id = session_id;
                    response.dialog_id = dialog_id;
                }
                return self.publisher.publish(response).await;
            }
        };

        info!(
            session_id = %request.session_id,
            dialog_id = %request.dialog_id,
            "processing request"
        );
        self.publisher
            .publish(Response::update(&request, PROCESSING_MESSAGE))
            .await?;

        let orchestrator = self
            .orchestrators
            .get_or_insert_with(&request.session_id, || {
                Arc::new(Mutex::new(AgentOrchestrator::new(
                    self.config.clone(),
                    self.backend.clone(),
                )))
            })
            .await;

        // Requests of one session run one at a time so the history stays ordered.
        let outcome = orchestrator.lock().await.run(&request, &self.publisher).await;
        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                error!(
                    session_id = %request.session_id,
                    dialog_id = %request.dialog_id,
                    error = %e,
                    "agent workflow failed"
                );
                Response::failure(Some(&request), FAILURE_MESSAGE)
            }
        };
        self.publisher.publish(response).await
    }

    /// Take the next task off the queue, if one is waiting.
    pub async fn next_task(&self) -> rma_core::Result<Option<String>> {
        self.broker.tasks.pop().await
    }

    pub async fn active_sessions(&self) -> usize {
        self.orchestrators.len().await
    }

    pub async fn shutdown(&self) {
        self.orchestrators.clear().await;
    }
}

/// Best-effort recovery of the addressing fields from an unparseable task.
fn addressing_hint(raw: &str) -> Option<(String, String)> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    let session_id = value.get("session_id")?.as_str()?.to_string();
    let dialog_id = value
        .get("dialog_id")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    Some((session_id, dialog_id))
}

// ---------------------------------------------------------------------------
// WorkerPool
// ---------------------------------------------------------------------------

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    orchestration: Arc<Orchestration>,
}

impl WorkerPool {
    /// Start `settings.concurrency` workers (at least one) polling the queue.
    pub fn spawn(orchestration: Arc<Orchestration>, settings: &WorkerSettings) -> Self {
        let count = settings.concurrency.max(1);
        let handles = (0..count)
            .map(|id| {
                let orchestration = orchestration.clone();
                let poll_interval = settings.poll_interval;
                tokio::spawn(worker_loop(id, orchestration, poll_interval))
            })
            .collect();
        info!(workers = count, "worker pool started");
        Self {
            handles,
            orchestration,
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stop all workers. Tasks in flight are abandoned.
    pub async fn shutdown(self) {
        for handle in &self.handles {
            handle.abort();
        }
        for handle in self.handles {
            let _ = handle.await;
        }
        self.orchestration.shutdown().await;
        info!("worker pool stopped");
    }
}

async fn worker_loop(id: usize, orchestration: Arc<Orchestration>, poll_interval: std::time::Duration) {
    debug!(worker = id, "worker started");
    loop {
        match orchestration.next_task().await {
            Ok(Some(task)) => {
                if let Err(e) = orchestration.process_task(&task).await {
                    error!(worker = id, error = %e, "failed to publish response");
                }
            }
            Ok(None) => tokio::time::sleep(poll_interval).await,
            Err(e) => {
                warn!(worker = id, error = %e, "failed to read task queue");
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use rma_agent::{AgentKind, AgentReply, ScriptedBackend};
    use rma_core::broker::MessageStream;
    use std::time::Duration;

    const PLAN: &str = r#"{"plan_id":"p1","agents":["FINAL_ANSWER_GENERATOR_AGENT"],"justification":"x"}"#;

    fn orchestration(backend: ScriptedBackend) -> (Orchestration, Broker) {
        let broker = Broker::memory();
        let config = RuntimeConfig::builtin().unwrap();
        (
            Orchestration::new(broker.clone(), Arc::new(backend), config),
            broker,
        )
    }

    async fn collect(stream: &mut MessageStream, n: usize) -> Vec<Response> {
        let mut out = Vec::new();
        for _ in 0..n {
            let raw = tokio::time::timeout(Duration::from_secs(2), stream.next())
                .await
                .unwrap()
                .unwrap();
            out.push(Envelope::parse(&raw).unwrap());
        }
        out
    }

    fn task(session: &str, dialog: &str, message: &str) -> String {
        serde_json::to_string(&Request::new(session, dialog, message)).unwrap()
    }

    #[tokio::test]
    async fn successful_task_publishes_progress_then_final() {
        let backend = ScriptedBackend::new()
            .reply(AgentKind::Planner, PLAN)
            .reply_with(
                AgentKind::FinalAnswerGenerator,
                AgentReply {
                    attachments: vec!["https://img/1.png".into()],
                    ..AgentReply::text("All good")
                },
            );
        let (orch, broker) = orchestration(backend);
        let mut stream = broker.messages.subscribe().await.unwrap();

        orch.process_task(&task("s1", "d1", "status?")).await.unwrap();

        let msgs = collect(&mut stream, 4).await;
        assert_eq!(msgs[0].answer.answer_string, PROCESSING_MESSAGE);
        assert!(!msgs[0].answer.is_final);
        assert_eq!(msgs[1].answer.answer_string, rma_agent::workflow::GENERATING_PLAN);
        assert_eq!(msgs[2].answer.answer_string, rma_agent::workflow::PLAN_GENERATED);
        let last = &msgs[3];
        assert!(last.answer.is_final);
        assert_eq!(last.answer.answer_string, "All good");
        assert_eq!(last.answer.data_points, vec!["https://img/1.png".to_string()]);
        assert_eq!(last.session_id, "s1");
        assert_eq!(last.dialog_id, "d1");
    }

    #[tokio::test]
    async fn unparseable_task_reports_error_with_recovered_ids() {
        let (orch, broker) = orchestration(ScriptedBackend::new());
        let mut stream = broker.messages.subscribe().await.unwrap();

        orch.process_task(r#"{"session_id":"s9","dialog_id":"d9"}"#)
            .await
            .unwrap();

        let msgs = collect(&mut stream, 1).await;
        let err = msgs[0].error.as_ref().unwrap();
        assert!(err.error_str.starts_with("Failed to parse request data:"));
        assert_eq!(msgs[0].session_id, "s9");
        assert_eq!(msgs[0].dialog_id, "d9");
    }

    #[tokio::test]
    async fn workflow_failure_becomes_generic_error() {
        // no scripted planner reply, so the backend fails
        let (orch, broker) = orchestration(ScriptedBackend::new());
        let mut stream = broker.messages.subscribe().await.unwrap();

        orch.process_task(&task("s1", "d1", "hi")).await.unwrap();

        let msgs = collect(&mut stream, 3).await;
        let last = &msgs[2];
        assert_eq!(last.error.as_ref().unwrap().error_str, FAILURE_MESSAGE);
        assert!(last.is_terminal());
        assert_eq!(last.dialog_id, "d1");
    }

    #[tokio::test]
    async fn orchestrators_are_reused_per_session() {
        let backend = ScriptedBackend::new()
            .reply(AgentKind::Planner, PLAN)
            .reply(AgentKind::Planner, PLAN)
            .reply(AgentKind::FinalAnswerGenerator, "one")
            .reply(AgentKind::FinalAnswerGenerator, "two");
        let (orch, _broker) = orchestration(backend);

        orch.process_task(&task("s1", "d1", "first")).await.unwrap();
        orch.process_task(&task("s1", "d2", "second")).await.unwrap();
        assert_eq!(orch.active_sessions().await, 1);

        orch.shutdown().await;
        assert_eq!(orch.active_sessions().await, 0);
    }

    #[test]
    fn addressing_hint_needs_session_id() {
        assert_eq!(addressing_hint("garbage"), None);
        assert_eq!(addressing_hint(r#"{"dialog_id":"d"}"#), None);
        assert_eq!(
            addressing_hint(r#"{"session_id":"s"}"#),
            Some(("s".to_string(), String::new()))
        );
    }

    #[tokio::test]
    async fn pool_drains_queue() {
        let backend = ScriptedBackend::new()
            .reply(AgentKind::Planner, PLAN)
            .reply(AgentKind::FinalAnswerGenerator, "done");
        let (orch, broker) = orchestration(backend);
        let mut stream = broker.messages.subscribe().await.unwrap();
        broker.tasks.push(&task("s1", "d1", "hi")).await.unwrap();

        let settings = WorkerSettings {
            concurrency: 2,
            poll_interval: Duration::from_millis(10),
        };
        let pool = WorkerPool::spawn(Arc::new(orch), &settings);
        assert_eq!(pool.len(), 2);

        let msgs = collect(&mut stream, 4).await;
        assert_eq!(msgs[3].answer.answer_string, "done");
        pool.shutdown().await;
    }
}
