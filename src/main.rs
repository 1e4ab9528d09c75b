use std::sync::Arc;

use anyhow::{Context, Result};
use skillclaw::agent::AgentEngine;
use skillclaw::executor::SkillExecutor;
use skillclaw::http::{router, AppState};
use skillclaw::llm::RigLlmClient;
use skillclaw::memory::default::{LexicalReranker, RigKnowledgeExtractor};
use skillclaw::memory::{MemoryConfig, MemoryStore};
use skillclaw::sandbox::SandboxGateway;
use skillclaw::settings::{LogFormat, Settings};
use skillclaw::skills::SkillRegistry;
use skillclaw::store::Store;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load();
    init_logging(settings.log_format);

    tracing::info!(bind = %settings.http_bind, "skillclaw starting");

    let registry = Arc::new(
        SkillRegistry::build(&settings.skills.directory)
            .context("failed to build skill registry")?,
    );
    let executor = SkillExecutor::new(SandboxGateway::new(settings.sandbox.base_url()));

    let api_key = settings.llm.api_key.as_ref().context("LLM_API_KEY must be set")?;
    let llm = Arc::new(
        RigLlmClient::new(&settings.llm.base_url, api_key, &settings.llm.model)
            .context("failed to construct LLM client")?,
    );

    let memory_config = MemoryConfig {
        top_k: settings.memory.top_k,
        score_floor: 0.0,
        user_turn_threshold: settings.memory.user_turn_threshold,
    };
    let extractor = RigKnowledgeExtractor::new(&settings.llm.base_url, api_key, &settings.llm.model)
        .map_err(anyhow::Error::msg)
        .context("failed to construct knowledge extractor")?;
    let memory: Arc<dyn skillclaw::memory::MemoryRetrieval> =
        Arc::new(MemoryStore::new(LexicalReranker, extractor, memory_config));

    let database_path = settings.database_path.to_string_lossy().into_owned();
    let store = Arc::new(Store::open(&database_path).await.context("failed to open store")?);

    let engine = Arc::new(AgentEngine::new(
        registry.clone(),
        executor,
        llm,
        memory,
        store.clone(),
        settings.agent.max_iterations,
    ));

    let state = AppState { engine, store, registry, started_at: std::time::Instant::now() };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&settings.http_bind)
        .await
        .with_context(|| format!("failed to bind {}", settings.http_bind))?;
    tracing::info!(addr = %settings.http_bind, "listening");
    axum::serve(listener, app).await.context("http server error")?;
    Ok(())
}

fn init_logging(format: LogFormat) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
}
