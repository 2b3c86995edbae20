//! campaign-translate: zh/th translation pipeline for campaign content.
//! Library root: tracing setup, dependency wiring, HTTP server lifecycle.

pub mod cancellation;
pub mod client;
pub mod config;
pub mod line;
pub mod metrics;
pub mod server;
pub mod state_machine;
pub mod translate;

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};

use config::AppConfig;
use metrics::MetricsRegistry;
use server::AppState;
use translate::cache::TranslationMemo;
use translate::commit::CommitQueue;
use translate::orchestrator::TranslationOrchestrator;
use translate::provider::TextGenerationClient;
use translate::service::TranslationService;
use translate::store::{SqliteStore, TranslationStore};

const DEFAULT_FILTER: &str = "campaign_translate=debug,tower_http=info";

/// Install the global subscriber. `RUST_LOG` overrides the default filter;
/// `LOG_FORMAT=json` switches to JSON lines. Safe to call more than once.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    let result = if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if result.is_err() {
        warn!("tracing subscriber already installed");
    }
}

/// Wire store, provider, memo, orchestrator, commit queue and LINE
/// capability from `config`. Must run inside a Tokio runtime.
pub fn build(config: &AppConfig) -> anyhow::Result<Arc<AppState>> {
    let metrics = Arc::new(MetricsRegistry::new());

    let store: Arc<dyn TranslationStore> = Arc::new(
        SqliteStore::open(&config.server.database_path).with_context(|| {
            format!("opening translation store at {}", config.server.database_path.display())
        })?,
    );

    let provider = TextGenerationClient::new(config.provider.clone(), Arc::clone(&metrics))
        .context("building translation provider")?;
    let memo = Arc::new(TranslationMemo::new(config.cache.capacity, config.cache.ttl));
    let orchestrator = Arc::new(TranslationOrchestrator::new(
        Arc::new(provider),
        memo,
        config.chunking.clone(),
        Arc::clone(&metrics),
    ));

    let commits = CommitQueue::start(
        Arc::clone(&store),
        config.server.commit_flush_interval,
        Arc::clone(&metrics),
    );
    let service = Arc::new(TranslationService::new(orchestrator, store, commits, metrics));
    let line = line::from_config(&config.line).context("building LINE capability")?;

    if config.server.admin_token.is_none() {
        warn!("ADMIN_TOKEN not set, admin routes will reject every request");
    }

    Ok(Arc::new(AppState {
        service,
        line,
        admin_token: config.server.admin_token.clone(),
    }))
}

/// Serve until `shutdown` resolves, then flush queued commits.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = server::router(Arc::clone(&state));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("http server failed")?;

    state.service.shutdown().await;
    info!("server stopped");
    Ok(())
}

/// Binary entry point: env config, bind, serve until Ctrl-C.
pub async fn run() -> anyhow::Result<()> {
    init_tracing();
    let config = AppConfig::from_env().context("invalid configuration")?;
    info!("campaign-translate starting");

    let state = build(&config)?;
    let listener = TcpListener::bind(config.server.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.server.bind_addr))?;
    info!(addr = %config.server.bind_addr, "listening");

    serve(listener, state, shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
