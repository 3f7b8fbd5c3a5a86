use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use driftboard_common::config::ServiceConfig;
use driftboard_common::{LocalCache, RedisClient, Result};

use crate::comment::CommentEngine;
use crate::post::PostEngine;
use crate::queue::Producer;

mod comment;
mod hotspot;
mod post;

pub struct WorkerContext {
    pub db: PgPool,
    pub redis: Arc<RedisClient>,
    pub cache: Arc<LocalCache>,
    pub producer: Arc<Producer>,
    pub posts: Arc<PostEngine>,
    pub comments: Arc<CommentEngine>,
    pub service: ServiceConfig,
}

/// Spawn every maintenance loop. Each loop observes the shared shutdown
/// signal at the top of its iteration and acknowledges by exiting; the caller
/// joins the returned handles to wait for all acknowledgements.
pub fn spawn_workers(
    ctx: Arc<WorkerContext>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let svc = ctx.service.clone();
    let every = Duration::from_secs;

    let mut handles = Vec::new();
    let mut spawn = |name: &'static str, interval: Duration, tick: TickFn| {
        handles.push(run_loop(name, interval, shutdown.clone(), Arc::clone(&ctx), tick));
    };

    spawn(
        "persistence-post-score",
        every(svc.post_persistence_interval),
        |ctx| Box::pin(post::persist_expired_posts(ctx)),
    );
    spawn("refresh-hot-post", every(svc.hot_post_refresh_interval), |ctx| {
        Box::pin(post::refresh_hot_posts(ctx))
    });
    spawn(
        "persistence-comment-like-count",
        every(svc.comment_count_persistence_interval),
        |ctx| Box::pin(comment::persist_comment_counts(ctx, true)),
    );
    spawn(
        "persistence-comment-hate-count",
        every(svc.comment_count_persistence_interval),
        |ctx| Box::pin(comment::persist_comment_counts(ctx, false)),
    );
    spawn(
        "persistence-comment-like-set",
        every(svc.like_set_persistence_interval),
        |ctx| Box::pin(comment::persist_like_sets(ctx, true)),
    );
    spawn(
        "persistence-comment-hate-set",
        every(svc.like_set_persistence_interval),
        |ctx| Box::pin(comment::persist_like_sets(ctx, false)),
    );
    spawn("remove-comment-like-mapping", every(svc.rem_cid_interval), |ctx| {
        Box::pin(comment::purge_cancelled_mappings(ctx))
    });
    spawn(
        "remove-expired-comment-index",
        every(svc.comment_index_remove_interval),
        |ctx| Box::pin(comment::remove_expired_indices(ctx)),
    );
    spawn(
        "remove-expired-comment-content",
        every(svc.comment_content_remove_interval),
        |ctx| Box::pin(comment::remove_expired_contents(ctx)),
    );
    spawn(
        "refresh-post-hot-spot",
        every(svc.hot_spot_refresh_interval),
        |ctx| Box::pin(hotspot::refresh_post_hot_spot(ctx)),
    );
    spawn(
        "refresh-comment-hot-spot",
        every(svc.hot_spot_refresh_interval),
        |ctx| Box::pin(hotspot::refresh_comment_hot_spot(ctx)),
    );
    spawn(
        "remove-expired-object-view",
        every(svc.hot_spot_refresh_interval),
        |ctx| Box::pin(hotspot::remove_expired_views(ctx)),
    );

    handles
}

type TickFuture = std::pin::Pin<Box<dyn Future<Output = Result<()>> + Send>>;
type TickFn = fn(Arc<WorkerContext>) -> TickFuture;

/// The shared loop shape: run, sleep the configured interval, and shorten the
/// next sleep to 10s after a failed tick so transient faults retry quickly.
fn run_loop(
    name: &'static str,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    ctx: Arc<WorkerContext>,
    tick: TickFn,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // First tick runs immediately; later ticks pace at the interval.
        let mut wait = Duration::ZERO;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }
            match tick(Arc::clone(&ctx)).await {
                Ok(()) => wait = interval,
                Err(err) => {
                    tracing::error!(worker = name, %err, "maintenance tick failed");
                    wait = Duration::from_secs(10);
                }
            }
        }
        tracing::info!(worker = name, "maintenance loop stopped");
    })
}

/// Keys whose idle time exceeds the logical-expiry threshold.
pub(crate) async fn logically_expired_keys(
    redis: &RedisClient,
    keys: Vec<String>,
    expire_secs: u64,
) -> Result<Vec<String>> {
    let idle_times = redis.idle_times(&keys).await?;
    Ok(keys
        .into_iter()
        .zip(idle_times)
        .filter(|(_, idle)| *idle > expire_secs as i64)
        .map(|(key, _)| key)
        .collect())
}
