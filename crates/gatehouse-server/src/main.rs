//! Gatehouse entrypoint: loads configuration, hydrates credentials and
//! caches, starts the background sweep/persist tasks, and serves the
//! gateway router until shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mimalloc::MiMalloc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use gatehouse::cache::{PromptCache, PromptCacheConfig, ResponseCache, ResponseCacheConfig, spawn_prompt_cache_tasks, spawn_response_cache_tasks};
use gatehouse::config::{Config, ManagementConfig};
use gatehouse::credential::CredentialPool;
use gatehouse::executor::Executor;
use gatehouse::selector::{Selector, SelectorConfig};
use gatehouse_server::state::{ActivityTracker, AppState};
use gatehouse_server::build_router;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const PERSIST_INTERVAL: Duration = Duration::from_secs(30);
const KEEP_ALIVE_CHECK_INTERVAL: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    config.validate()?;
    let addr: SocketAddr = config.socket_addr().parse()?;

    tracing::info!(bind_addr = %config.bind_addr, port = config.port, "gatehouse starting");

    let credentials = Arc::new(CredentialPool::load_from_dir(config.auth_dir.clone())?);
    tracing::info!(providers = ?credentials.providers(), "credential pool loaded");

    std::fs::create_dir_all(&config.cache_dir)?;

    let management_config = ManagementConfig::load(&config.management_config_path())?;
    for (id, priority) in &management_config.credential_priorities {
        if let Err(e) = credentials.set_priority(id, *priority) {
            tracing::warn!(credential = %id, error = %e, "stale credential_priorities entry in management config");
        }
    }

    let response_cache = Arc::new(ResponseCache::new(ResponseCacheConfig {
        enabled: config.response_cache_enabled,
        max_size: management_config.response_cache_max_size,
        max_bytes: management_config.response_cache_max_bytes,
        ttl: Duration::from_secs(management_config.response_cache_ttl_secs),
        exclude_models: management_config.response_cache_exclude_models.clone(),
        persist_path: Some(config.response_snapshot_path()),
    }));
    if let Err(e) = response_cache.load() {
        tracing::warn!(error = %e, "failed to load response cache snapshot, starting empty");
    }

    let prompt_cache = Arc::new(PromptCache::new(PromptCacheConfig {
        max_size: management_config.prompt_cache_max_size,
        max_bytes: management_config.prompt_cache_max_bytes,
        ttl: Duration::from_secs(management_config.prompt_cache_ttl_secs),
        persist_path: Some(config.prompt_snapshot_path()),
    }));
    if let Err(e) = prompt_cache.load() {
        tracing::warn!(error = %e, "failed to load prompt cache snapshot, starting empty");
    }

    let shutdown = CancellationToken::new();
    spawn_response_cache_tasks(Arc::clone(&response_cache), SWEEP_INTERVAL, PERSIST_INTERVAL, shutdown.clone());
    spawn_prompt_cache_tasks(Arc::clone(&prompt_cache), SWEEP_INTERVAL, PERSIST_INTERVAL, shutdown.clone());

    let http_client = reqwest::Client::builder().build()?;
    let executor = Arc::new(Executor::new(http_client, config.max_body_bytes));
    let selector = Arc::new(Selector::new(Arc::clone(&credentials), SelectorConfig::default()));
    let activity = Arc::new(ActivityTracker::new());

    let config = Arc::new(config);
    let state = AppState {
        config: Arc::clone(&config),
        credentials,
        selector,
        executor,
        response_cache: Arc::clone(&response_cache),
        prompt_cache: Arc::clone(&prompt_cache),
        activity: Arc::clone(&activity),
    };

    if config.keep_alive_idle_secs > 0 {
        spawn_idle_reaper(Arc::clone(&activity), config.keep_alive_idle_secs, shutdown.clone());
    }

    let app = build_router(state);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "gatehouse listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    if let Err(e) = response_cache.save() {
        tracing::warn!(error = %e, "final response cache save failed");
    }
    if let Err(e) = prompt_cache.save() {
        tracing::warn!(error = %e, "final prompt cache save failed");
    }

    tracing::info!("gatehouse shutdown complete");
    Ok(())
}

/// Generalizes the teacher's idle-lifecycle reaper: once `idle_secs` pass
/// with no recorded request activity, trip the shared cancellation token so
/// the server shuts itself down gracefully instead of idling indefinitely.
fn spawn_idle_reaper(activity: Arc<ActivityTracker>, idle_secs: u64, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(KEEP_ALIVE_CHECK_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if activity.is_idle_timeout_exceeded(idle_secs) {
                        tracing::info!(idle_secs, "idle timeout exceeded, shutting down");
                        shutdown.cancel();
                        break;
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
    });
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, initiating graceful shutdown"),
        _ = terminate => tracing::info!("received SIGTERM, initiating graceful shutdown"),
        _ = shutdown.cancelled() => tracing::info!("idle shutdown requested"),
    }
}
