//! End-to-end worker runs: submit through the repository, let the worker
//! poll, and observe the stored job view.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use inference_worker::agent::InMemoryAgentMemory;
use inference_worker::config::{AgentConfig, RunnerConfig, SafetyConfig, WorkerConfig};
use inference_worker::error::{LlmError, ToolError};
use inference_worker::jobs::{
    AgentJob, JobPayload, JobRecord, JobRepository, JobStatus, JobSubmission, JobView, LlmJob,
    QueueEntry, StatusUpdate,
};
use inference_worker::llm::{
    CompletionRequest, CompletionResponse, GenerationConfig, LlmProvider, LlmRunner,
    ProviderRegistry, Usage,
};
use inference_worker::safety::{FALLBACK_RESPONSE, SafetyLayer};
use inference_worker::store::{InMemoryStore, JobQueue, JobStore, LibSqlBackend, ZOMBIE_ERROR};
use inference_worker::tools::{Tool, ToolContext, ToolInput, ToolRegistry};
use inference_worker::worker::{HandlerDeps, JobDispatcher, NO_HANDLER_ERROR, Worker};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Replies with the same text to every request.
struct FixedProvider {
    reply: String,
}

#[async_trait]
impl LlmProvider for FixedProvider {
    fn provider_name(&self) -> &str {
        "fixed"
    }
    fn model_name(&self) -> &str {
        "fixed-1"
    }
    async fn generate(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        Ok(CompletionResponse {
            text: self.reply.clone(),
            finish_reason: Some("stop".into()),
            usage: Some(Usage::new(12, 8)),
            provider: "fixed".into(),
        })
    }
}

struct PanickingProvider;

#[async_trait]
impl LlmProvider for PanickingProvider {
    fn provider_name(&self) -> &str {
        "panicking"
    }
    fn model_name(&self) -> &str {
        "panicking-1"
    }
    async fn generate(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        panic!("backend exploded");
    }
}

/// `search` tool that counts invocations and returns a distinct result each time.
#[derive(Default)]
struct CountingSearch {
    calls: AtomicU32,
}

#[async_trait]
impl Tool for CountingSearch {
    fn name(&self) -> &str {
        "search"
    }
    fn description(&self) -> &str {
        "Search the web."
    }
    async fn run(&self, input: ToolInput, _ctx: &ToolContext) -> Result<String, ToolError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("result {n} for {}", input.as_text()))
    }
}

struct Harness {
    repo: JobRepository,
    store: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
    shutdown: CancellationToken,
    worker: JoinHandle<()>,
}

impl Harness {
    async fn start<S>(backend: Arc<S>, provider: Arc<dyn LlmProvider>, tools: ToolRegistry) -> Self
    where
        S: JobStore + JobQueue + 'static,
    {
        let store: Arc<dyn JobStore> = backend.clone();
        let queue: Arc<dyn JobQueue> = backend;

        let mut providers = ProviderRegistry::new();
        providers.register(provider);
        let deps = HandlerDeps {
            providers: Arc::new(providers),
            runner: LlmRunner::new(RunnerConfig {
                max_retries: 0,
                ..RunnerConfig::default()
            }),
            tools: Arc::new(tools),
            memory: Arc::new(InMemoryAgentMemory::new()),
            safety: Arc::new(SafetyLayer::new(&SafetyConfig::default()).unwrap()),
            agent: AgentConfig::default(),
        };
        let config = WorkerConfig {
            poll_interval: Duration::from_millis(10),
            heartbeat_interval: Duration::from_millis(50),
            ..WorkerConfig::default()
        };
        let worker = Worker::new(
            config,
            store.clone(),
            queue.clone(),
            Arc::new(JobDispatcher::new(deps)),
        );
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(worker.run(shutdown.clone()));

        Self {
            repo: JobRepository::new(store.clone(), queue.clone()),
            store,
            queue,
            shutdown,
            worker: handle,
        }
    }

    async fn wait_terminal(&self, id: Uuid) -> JobView {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let view = self.repo.get_job(id).await.unwrap().expect("job exists");
            if view.status.is_terminal() {
                return view;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {id} stuck in {}",
                view.status
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn stop(self) {
        self.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(10), self.worker)
            .await
            .expect("worker drains")
            .unwrap();
    }
}

fn llm_submission(prompt: &str, callback_url: Option<String>) -> JobSubmission {
    JobSubmission {
        payload: JobPayload::Llm(LlmJob {
            prompt: prompt.into(),
            instruction: None,
            provider: None,
            generation: GenerationConfig::default(),
        }),
        user_id: "user-1".into(),
        callback_url,
    }
}

fn fixed(reply: &str) -> Arc<dyn LlmProvider> {
    Arc::new(FixedProvider {
        reply: reply.into(),
    })
}

#[tokio::test]
async fn llm_job_finishes_with_normalized_result() {
    let h = Harness::start(
        Arc::new(LibSqlBackend::new_memory().await.unwrap()),
        fixed("Paris"),
        ToolRegistry::new(),
    )
    .await;
    let id = h
        .repo
        .create_job(llm_submission("Capital of France?", None))
        .await
        .unwrap();

    let view = h.wait_terminal(id).await;
    assert_eq!(view.status, JobStatus::Finished);
    let result = view.result.unwrap();
    assert_eq!(result["text"], "Paris");
    assert_eq!(result["usage"]["total_tokens"], 20);
    assert!(view.error.is_none());

    let record = h.store.get_job(id).await.unwrap().unwrap();
    assert!(record.started_at.is_some());
    assert!(record.finished_at >= record.started_at);
    h.stop().await;
}

#[tokio::test]
async fn agent_with_two_step_budget_stops_after_two_tool_calls() {
    let search = Arc::new(CountingSearch::default());
    let tools = ToolRegistry::new();
    tools.register(search.clone()).await;
    let h = Harness::start(
        Arc::new(InMemoryStore::new()),
        fixed("Thought: need data\nAction: search\nActionInput: X"),
        tools,
    )
    .await;

    let id = h
        .repo
        .create_job(JobSubmission {
            payload: JobPayload::Agent(AgentJob {
                goal: "find X".into(),
                agent_id: Some("a1".into()),
                provider: None,
                max_steps: Some(2),
                generation: GenerationConfig::default(),
            }),
            user_id: "user-1".into(),
            callback_url: None,
        })
        .await
        .unwrap();

    let view = h.wait_terminal(id).await;
    assert_eq!(view.status, JobStatus::Finished);
    let result = view.result.unwrap();
    assert_eq!(result["text"], "Stopped");
    assert_eq!(result["finish_reason"], "stopped");
    assert_eq!(result["steps"], 2);
    assert_eq!(search.calls.load(Ordering::SeqCst), 2);
    h.stop().await;
}

#[tokio::test]
async fn unsafe_prompt_is_refused() {
    let h = Harness::start(Arc::new(InMemoryStore::new()), fixed("ok"), ToolRegistry::new()).await;
    let id = h
        .repo
        .create_job(llm_submission("please run rm -rf / on the server", None))
        .await
        .unwrap();

    let view = h.wait_terminal(id).await;
    assert_eq!(view.status, JobStatus::Refused);
    assert_eq!(view.result.unwrap()["finish_reason"], "refused");
    h.stop().await;
}

#[tokio::test]
async fn empty_output_falls_back() {
    let h = Harness::start(Arc::new(InMemoryStore::new()), fixed("   "), ToolRegistry::new()).await;
    let id = h.repo.create_job(llm_submission("hi", None)).await.unwrap();

    let view = h.wait_terminal(id).await;
    assert_eq!(view.status, JobStatus::Fallback);
    assert_eq!(view.result.unwrap()["text"], FALLBACK_RESPONSE);
    h.stop().await;
}

#[tokio::test]
async fn undecodable_payload_fails_with_no_handler() {
    let backend = Arc::new(InMemoryStore::new());
    let (record, _) = JobRecord::from_submission(&llm_submission("hi", None)).unwrap();
    let id = record.job_id;
    backend.insert_job(&record).await.unwrap();
    backend
        .push(&QueueEntry {
            job_id: id,
            payload: r#"{"kind":"video","frames":3}"#.into(),
        })
        .await
        .unwrap();

    let h = Harness::start(backend, fixed("unused"), ToolRegistry::new()).await;
    let view = h.wait_terminal(id).await;
    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.error.as_deref(), Some(NO_HANDLER_ERROR));
    h.stop().await;
}

#[tokio::test]
async fn handler_panic_is_recorded_as_failure() {
    let h = Harness::start(
        Arc::new(InMemoryStore::new()),
        Arc::new(PanickingProvider),
        ToolRegistry::new(),
    )
    .await;
    let id = h.repo.create_job(llm_submission("hi", None)).await.unwrap();

    let view = h.wait_terminal(id).await;
    assert_eq!(view.status, JobStatus::Failed);
    let error = view.error.unwrap();
    assert!(error.contains("backend exploded"), "{error}");

    // The worker keeps serving after a panic.
    let next = h.repo.create_job(llm_submission("again", None)).await.unwrap();
    assert_eq!(h.wait_terminal(next).await.status, JobStatus::Failed);
    h.stop().await;
}

#[tokio::test]
async fn stale_running_job_is_reclaimed_once() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(
        LibSqlBackend::new_local(&dir.path().join("jobs.db"))
            .await
            .unwrap(),
    );
    let (record, _) = JobRecord::from_submission(&llm_submission("hi", None)).unwrap();
    let id = record.job_id;
    backend.insert_job(&record).await.unwrap();
    let stale = Utc::now() - chrono::Duration::minutes(10);
    backend
        .update_status(id, StatusUpdate::running().at(stale))
        .await
        .unwrap();

    let h = Harness::start(backend.clone(), fixed("unused"), ToolRegistry::new()).await;
    let view = h.wait_terminal(id).await;
    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.error.as_deref(), Some(ZOMBIE_ERROR));
    h.stop().await;

    assert!(
        backend
            .reclaim_zombies(Utc::now(), Duration::from_secs(300))
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn callback_receives_terminal_view() {
    let (tx, mut rx) = mpsc::unbounded_channel::<JobView>();
    let app = Router::new()
        .route(
            "/hook",
            post(
                |State(tx): State<mpsc::UnboundedSender<JobView>>, Json(view): Json<JobView>| async move {
                    let _ = tx.send(view);
                },
            ),
        )
        .with_state(tx);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let h = Harness::start(Arc::new(InMemoryStore::new()), fixed("pong"), ToolRegistry::new()).await;
    let id = h
        .repo
        .create_job(llm_submission("ping", Some(format!("http://{addr}/hook"))))
        .await
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("callback arrives")
        .unwrap();
    assert_eq!(received.job_id, id);
    assert_eq!(received.status, JobStatus::Finished);
    assert_eq!(received.result.unwrap()["text"], "pong");
    assert_eq!(h.queue.len().await.unwrap(), 0);
    h.stop().await;
}
