use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use driftboard_common::{Config, IdGenerator, LocalCache, RedisClient, StatusBoard};
use driftboard_core::queue::{self, QueueContext};
use driftboard_core::search::{DisabledIndex, PostIndex};
use driftboard_core::workers::{self, WorkerContext};
use driftboard_core::{
    db, CommentEngine, CommunityEngine, Mailer, PostEngine, Rebuilder, UserEngine,
};
use driftboard_http::{routes, state::AppState};

#[derive(Parser)]
#[command(name = "driftboard")]
#[command(about = "driftboard community forum server")]
#[command(version)]
struct Args {
    /// Path to a .env file
    #[arg(short, long)]
    env: Option<String>,

    /// Log filter (e.g. "info", "info,driftboard=debug")
    #[arg(short, long)]
    log: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_filter = args
        .log
        .clone()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info,driftboard=debug".into());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&log_filter))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match &args.env {
        Some(path) => Config::from_env_file(path),
        None => Config::from_env(),
    };

    let redis = Arc::new(RedisClient::new(&config.redis).await?);
    redis.ping().await?;
    tracing::info!("connected to Redis");

    let pool = db::init_pool(&config.database).await?;
    db::ensure_schema(&pool).await?;
    tracing::info!("connected to Postgres");

    queue::producer::init_topics(&config.kafka).await?;
    let producer = Arc::new(queue::Producer::new(&config.kafka)?);
    tracing::info!("event-log topics ready");

    let cache = Arc::new(LocalCache::new(config.service.local_cache_size));
    let status = Arc::new(StatusBoard::new(Duration::from_secs(
        config.service.status_ttl_secs,
    )));
    let ids = Arc::new(IdGenerator::new(config.machine_id));
    let rebuild = Arc::new(Rebuilder::new(&config, pool.clone(), Arc::clone(&redis)));
    let mailer = Arc::new(Mailer::new(&config.email)?);
    let index: Arc<dyn PostIndex> = Arc::new(DisabledIndex);

    let comments = Arc::new(CommentEngine::new(
        &config,
        pool.clone(),
        Arc::clone(&redis),
        Arc::clone(&cache),
        Arc::clone(&rebuild),
        Arc::clone(&producer),
        Arc::clone(&ids),
    ));
    let posts = Arc::new(PostEngine::new(
        &config,
        pool.clone(),
        Arc::clone(&redis),
        Arc::clone(&cache),
        Arc::clone(&producer),
        index,
        Arc::clone(&ids),
    ));
    let users = Arc::new(UserEngine::new(
        &config,
        pool.clone(),
        Arc::clone(&redis),
        Arc::clone(&producer),
        Arc::clone(&ids),
    ));
    let communities = Arc::new(CommunityEngine::new(pool.clone(), Arc::clone(&ids)));

    // One shutdown signal for consumers and maintenance loops; each observes
    // it between units of work and acknowledges by exiting.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let queue_ctx = Arc::new(QueueContext {
        db: pool.clone(),
        redis: Arc::clone(&redis),
        cache: Arc::clone(&cache),
        status: Arc::clone(&status),
        rebuild: Arc::clone(&rebuild),
        mailer,
        ids: Arc::clone(&ids),
        kafka: config.kafka.clone(),
        email_code_ttl: config.email.code_ttl_secs as i64,
    });
    let mut background = queue::spawn_consumers(queue_ctx, shutdown_rx.clone());
    tracing::info!(tasks = background.len(), "event-log consumers running");

    let worker_ctx = Arc::new(WorkerContext {
        db: pool.clone(),
        redis: Arc::clone(&redis),
        cache: Arc::clone(&cache),
        producer: Arc::clone(&producer),
        posts: Arc::clone(&posts),
        comments: Arc::clone(&comments),
        service: config.service.clone(),
    });
    let worker_handles = workers::spawn_workers(worker_ctx, shutdown_rx);
    tracing::info!(tasks = worker_handles.len(), "maintenance loops running");
    background.extend(worker_handles);

    let shutdown_wait = config.shutdown_wait;
    let addr = format!("{}:{}", config.http_host, config.http_port);
    let state = AppState {
        config: Arc::new(config),
        redis,
        status,
        users,
        posts,
        comments,
        communities,
    };

    let app = Router::new()
        .nest("/api/v1", routes::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("listening on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The HTTP server has drained; now stop the background tasks and wait
    // for every acknowledgement, bounded by the configured grace period.
    tracing::info!("waiting for background tasks to finish");
    shutdown_tx.send(true).ok();
    let drain = async {
        for handle in background {
            handle.await.ok();
        }
    };
    if tokio::time::timeout(Duration::from_secs(shutdown_wait), drain)
        .await
        .is_err()
    {
        tracing::warn!("background tasks did not stop within {shutdown_wait}s, exiting anyway");
    }
    tracing::info!("driftboard stopped");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C handler");
    tracing::info!("shutting down...");
}
