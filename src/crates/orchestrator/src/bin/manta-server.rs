//! manta server binary.

use anyhow::Context;
use clap::Parser;
use llm::ProviderRegistry;
use orchestrator::api::{self, AppState};
use orchestrator::{provider_model_factory, Orchestrator, SessionManager, Settings};
use sandbox::{HttpSandboxClient, SandboxManager};
use std::sync::Arc;
use store::{ExportService, KvStore, MemoryStore, RedisStore};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "manta-server", about = "multi-agent workflow orchestrator")]
struct Args {
    /// Path to a TOML settings file.
    #[arg(long, env = "MANTA_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let settings = Arc::new(Settings::load(args.config.as_deref())?);

    let kv: Arc<dyn KvStore> = match &settings.redis_url {
        Some(url) => {
            tracing::info!(url = %url, "connecting to redis");
            Arc::new(RedisStore::connect(url).await.context("redis connection")?)
        }
        None => {
            tracing::warn!("no redis url configured, using the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let sandbox_client = Arc::new(HttpSandboxClient::new(settings.sandbox_service_url.clone()));
    let sandboxes = Arc::new(SandboxManager::new(
        sandbox_client,
        Arc::clone(&kv),
        settings.sandbox_limits(),
    ));

    let sessions = Arc::new(SessionManager::new(
        Arc::clone(&kv),
        sandboxes,
        Arc::clone(&settings),
    ));

    let providers = ProviderRegistry::from_map(settings.providers.clone());
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&sessions),
        Arc::clone(&settings),
        provider_model_factory(providers),
        flowgraph::SubgraphRegistry::new(),
        None,
    ));
    let exports = Arc::new(ExportService::new(Arc::clone(&kv)));

    let shutdown = CancellationToken::new();
    sessions.spawn_sweeper(shutdown.clone());

    let app = api::router(AppState {
        orchestrator,
        exports,
    });

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("binding {}", settings.bind_addr))?;
    tracing::info!(addr = %settings.bind_addr, "manta server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}
