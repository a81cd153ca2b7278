use std::sync::Arc;

use inference_worker::agent::InMemoryAgentMemory;
use inference_worker::config::{AgentConfig, RunnerConfig, SafetyConfig, WorkerConfig};
use inference_worker::llm::{LlmRunner, ProviderConfig, ProviderRegistry, create_provider};
use inference_worker::safety::SafetyLayer;
use inference_worker::store::LibSqlBackend;
use inference_worker::tools::ToolRegistry;
use inference_worker::tools::builtin::{ExternalApiTool, SearchTool, SummaryTool, VectorSearchTool};
use inference_worker::worker::{HandlerDeps, JobDispatcher, Worker};
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Log to stderr, and also to a daily file when `INFERENCE_LOG_DIR` is set.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match std::env::var("INFERENCE_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "inference-worker.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = init_tracing();

    let worker_config = WorkerConfig::from_env();
    let provider_config = ProviderConfig::from_env().inspect_err(|_| {
        eprintln!("Error: LLM provider not configured");
        eprintln!("  export INFERENCE_PROVIDER=openai        # or anthropic");
        eprintln!("  export INFERENCE_PROVIDER_API_KEY=sk-...");
    })?;

    eprintln!("Inference worker v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "   Provider: {} ({})",
        provider_config.backend.name(),
        provider_config.model
    );
    eprintln!("   Database: {}", worker_config.db_path.display());

    // ── Database ─────────────────────────────────────────────────────────
    let db = Arc::new(LibSqlBackend::new_local(&worker_config.db_path).await?);

    // ── LLM ──────────────────────────────────────────────────────────────
    let llm = create_provider(&provider_config)?;
    let mut providers = ProviderRegistry::new();
    providers.register(llm.clone());
    let runner = LlmRunner::new(RunnerConfig::from_env());

    // ── Tools and memory ─────────────────────────────────────────────────
    let agent_config = AgentConfig::from_env();
    let memory = Arc::new(InMemoryAgentMemory::with_capacity(agent_config.memory_max_agents));
    let tools = Arc::new(ToolRegistry::new());
    tools.register_sync(Arc::new(SearchTool));
    tools.register_sync(Arc::new(ExternalApiTool));
    tools.register_sync(Arc::new(VectorSearchTool::new(memory.clone())));
    tools.register_sync(Arc::new(SummaryTool::new(llm, runner.clone())));
    eprintln!("   Tools: {}", tools.list().await.join(", "));

    let safety = Arc::new(SafetyLayer::new(&SafetyConfig::from_env())?);

    let dispatcher = Arc::new(JobDispatcher::new(HandlerDeps {
        providers: Arc::new(providers),
        runner,
        tools,
        memory,
        safety,
        agent: agent_config,
    }));

    let worker = Worker::new(worker_config, db.clone(), db, dispatcher);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            signal.cancel();
        }
    });

    worker.run(shutdown).await;
    Ok(())
}
