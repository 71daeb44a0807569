//! Process entry point.
//!
//! Subcommands:
//!   serve      HTTP API only
//!   worker     queue workers only
//!   scheduler  master scheduler only
//!   all        everything in one process (development)
//!
//! All components are constructed in an init phase and passed explicitly;
//! lifecycle is init → run → drain → close with a hard shutdown deadline.

mod api;
mod auth;
mod cursor;
mod error;
mod middleware;
mod router;
mod state;
mod workers;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{error, info, warn};

use mangatrack_core::Config;
use mangatrack_kvs::{Kvs, NegativeCache, RateLimitRule, RateLimiter, RedisKvs};
use mangatrack_notify::{Dispatcher, LogNotifier, Notifier, WebhookNotifier};
use mangatrack_progress::ProgressEngine;
use mangatrack_queue::QueueManager;
use mangatrack_scheduler::{
    run_master_scheduler, Gatekeeper, SchedulerContext, SearchStormController,
};
use mangatrack_sources::SourceRegistry;
use mangatrack_store::cleanup::RetentionPolicy;
use mangatrack_store::failures::PgDeadLetterSink;

use crate::state::AppState;

fn load_config() -> Config {
    mangatrack_core::config::load_dotenv();
    Config::from_env()
}

async fn init_state(config: Config) -> anyhow::Result<Arc<AppState>> {
    config.log_summary();

    let pool = mangatrack_store::init_pg_pool(&config.postgres)
        .await
        .map_err(|e| anyhow::anyhow!("postgres init failed: {}", e))?;

    let kvs: Arc<dyn Kvs> = Arc::new(
        RedisKvs::connect(&config.redis.url, &config.redis.namespace)
            .await
            .map_err(|e| anyhow::anyhow!("redis init failed: {}", e))?,
    );
    info!("KVS connected (namespace: {})", config.redis.namespace);

    let queues = Arc::new(
        QueueManager::new(kvs.clone())
            .with_dead_letter_sink(Arc::new(PgDeadLetterSink::new(pool.clone()))),
    );

    let registry = Arc::new(
        SourceRegistry::new().map_err(|e| anyhow::anyhow!("source registry init failed: {}", e))?,
    );
    let rate = Arc::new(RateLimiter::new(
        kvs.clone(),
        RateLimitRule::per_second(config.crawl.default_rate_per_sec),
    ));
    let negative = Arc::new(NegativeCache::new(
        kvs.clone(),
        config.limits.negative_threshold,
        config.limits.negative_window_ms,
    ));

    let progress = ProgressEngine::new(pool.clone(), kvs.clone(), config.limits.clone());
    let storm = SearchStormController::new(
        pool.clone(),
        kvs.clone(),
        queues.clone(),
        config.limits.clone(),
    );

    Ok(Arc::new(AppState {
        config,
        pool,
        kvs,
        queues,
        registry,
        rate,
        negative,
        progress,
        storm,
        started_at: Instant::now(),
    }))
}

fn build_dispatcher() -> Arc<Dispatcher> {
    let mut channels: Vec<Arc<dyn Notifier>> = vec![Arc::new(LogNotifier)];
    if let Ok(url) = std::env::var("NOTIFY_WEBHOOK_URL") {
        match WebhookNotifier::new(url, Default::default(), reqwest::Client::new()) {
            Ok(webhook) => channels.push(Arc::new(webhook)),
            Err(e) => warn!(error = %e, "webhook notifier disabled"),
        }
    }
    Arc::new(Dispatcher::new(channels))
}

fn build_scheduler_context(state: &Arc<AppState>) -> Arc<SchedulerContext> {
    let gatekeeper = Gatekeeper::new(
        state.queues.clone(),
        state.registry.breaker(),
        state.negative.clone(),
        state.config.crawl.priority_boost_follows,
    );
    let storm = SearchStormController::new(
        state.pool.clone(),
        state.kvs.clone(),
        state.queues.clone(),
        state.config.limits.clone(),
    );
    Arc::new(SchedulerContext {
        pool: state.pool.clone(),
        kvs: state.kvs.clone(),
        queues: state.queues.clone(),
        registry: state.registry.clone(),
        rate: state.rate.clone(),
        negative: state.negative.clone(),
        gatekeeper,
        storm,
        crawl: state.config.crawl.clone(),
        limits: state.config.limits.clone(),
        retention: RetentionPolicy::default(),
    })
}

/// Flip the shutdown signal on SIGTERM/ctrl-c.
fn spawn_signal_handler(tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("shutdown signal received");
        let _ = tx.send(true);
    });
}

async fn serve(state: Arc<AppState>, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let app = router::build_router(state.clone());
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API listening on http://{}", addr);

    let mut shutdown = shutdown;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    Ok(())
}

/// Wait for worker tasks to drain, with the hard deadline from config.
async fn drain(
    handles: Vec<tokio::task::JoinHandle<()>>,
    grace: Duration,
) {
    let drain_all = async {
        for handle in handles {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(grace, drain_all).await.is_err() {
        warn!(grace_secs = grace.as_secs(), "drain deadline hit — exiting with jobs in flight");
    } else {
        info!("workers drained cleanly");
    }
}

async fn run(command: &str) -> anyhow::Result<()> {
    let config = load_config();
    let grace = Duration::from_secs(config.server.shutdown_grace_secs);
    let state = init_state(config).await?;
    let (tx, rx) = watch::channel(false);
    spawn_signal_handler(tx);

    match command {
        "serve" => serve(state, rx).await?,
        "worker" => {
            let dispatcher = build_dispatcher();
            let handles = workers::spawn_workers(state, dispatcher, rx.clone());
            let mut rx = rx;
            let _ = rx.changed().await;
            drain(handles, grace).await;
        }
        "scheduler" => {
            let ctx = build_scheduler_context(&state);
            run_master_scheduler(ctx, rx).await;
        }
        "all" => {
            let dispatcher = build_dispatcher();
            let worker_handles = workers::spawn_workers(state.clone(), dispatcher, rx.clone());
            let ctx = build_scheduler_context(&state);
            let scheduler_handle = tokio::spawn(run_master_scheduler(ctx, rx.clone()));
            serve(state, rx).await?;
            let _ = scheduler_handle.await;
            drain(worker_handles, grace).await;
        }
        other => anyhow::bail!("unknown command '{}'", other),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(|s| s.as_str()) {
        Some(command @ ("serve" | "worker" | "scheduler" | "all")) => {
            if let Err(e) = run(command).await {
                error!("fatal: {}", e);
                std::process::exit(1);
            }
        }
        _ => {
            println!("mangatrack v{}", env!("CARGO_PKG_VERSION"));
            println!("Usage: mangatrack <command>");
            println!("  serve       Start the HTTP API");
            println!("  worker      Start the queue workers");
            println!("  scheduler   Start the master scheduler");
            println!("  all         Run API, workers, and scheduler in one process");
        }
    }
    Ok(())
}
