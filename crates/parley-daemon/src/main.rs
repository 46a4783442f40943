use std::net::SocketAddr;
use std::sync::Arc;

use parley_cache::{Cache, SyncEngine};
use parley_core::config::{ParleyConfig, SYNC_INTERVAL_SECS};
use parley_embeddings::{EmbeddingClient, OpenAiEmbeddingClient};
use parley_llm::{LlmFactory, OpenAiProviderFactory};
use parley_pipeline::ChatPipeline;
use parley_services::Services;
use parley_telegram::{build_tools, AppContext, TelegramAdapter};
use rusqlite::Connection;
use tracing::{info, warn};

mod health;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley_daemon=info,tower_http=debug".into()),
        )
        .init();

    // load config: explicit path > PARLEY_CONFIG env > ~/.parley/parley.toml
    let config_path = std::env::var("PARLEY_CONFIG").ok();
    let config = ParleyConfig::load(config_path.as_deref())?;

    let conn = open_database(&config.database.path)?;
    parley_store::init_db(&conn)?;

    let cache = Arc::new(Cache::new());
    cache.hydrate(&conn)?;

    let embeddings: Option<Arc<dyn EmbeddingClient>> = config.embedding.as_ref().map(|e| {
        Arc::new(OpenAiEmbeddingClient::new(
            e.api_key.clone(),
            e.base_url.clone(),
            e.model.clone(),
            e.dimension,
        )) as Arc<dyn EmbeddingClient>
    });
    if embeddings.is_none() {
        warn!("no embedding provider configured; semantic memory retrieval is disabled");
    }

    let services = Arc::new(Services::with_default_persona_prompt(
        cache.clone(),
        embeddings,
        config.memory.clone(),
        config.llm.default_system_prompt.clone().unwrap_or_default(),
    ));
    let llm_factory: Arc<dyn LlmFactory> = Arc::new(OpenAiProviderFactory::new());
    let (tools, tts) = build_tools(&config.tools, services.clone());
    let pipeline = Arc::new(ChatPipeline::new(
        services.clone(),
        llm_factory.clone(),
        tools.clone(),
        Some(tts),
    ));

    let ctx = AppContext {
        services,
        llm_factory,
        tools,
        pipeline,
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let sync_engine = SyncEngine::new(cache, conn, SYNC_INTERVAL_SECS);
    let sync_handle = tokio::spawn(sync_engine.run(shutdown_rx.clone()));

    let health_port = config.health.port;
    let health_rx = shutdown_rx.clone();
    let health_handle = tokio::spawn(async move {
        let addr: SocketAddr = ([0, 0, 0, 0], health_port).into();
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                warn!(error = %e, "health server failed to bind, continuing without it");
                return;
            }
        };
        info!("health endpoint listening on {addr}");
        // No trace layer here: the health probe fires on a tight interval
        // from every orchestrator and container runtime, and those
        // requests should stay out of the logs.
        let router = health::router();
        let mut rx = health_rx;
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = rx.changed().await;
            })
            .await
            .ok();
    });

    let telegram = TelegramAdapter::new(config.telegram, ctx);
    let telegram_handle = tokio::spawn(telegram.run(shutdown_rx));

    tokio::signal::ctrl_c().await.ok();
    info!("shutdown signal received, draining in-flight work");
    let _ = shutdown_tx.send(true);

    let _ = tokio::join!(sync_handle, health_handle, telegram_handle);
    info!("parley daemon stopped");

    Ok(())
}

fn open_database(path: &str) -> anyhow::Result<Connection> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(Connection::open(path)?)
}
