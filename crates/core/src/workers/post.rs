use std::sync::Arc;

use chrono::Utc;

use driftboard_common::localcache::{CachedEntry, HOT_POSTS_KEY};
use driftboard_common::redis::PostOrder;
use driftboard_common::types::{ExpiredPostScore, POST_STATUS_EXPIRED};
use driftboard_common::Result;

use super::WorkerContext;
use crate::db;

/// Freeze posts that left the active window: snapshot score and vote balance
/// into the record store, flip their status, then drop them from every
/// ranking structure. One cutoff is used throughout so the sweep is
/// consistent across the time, score and community sets.
pub(crate) async fn persist_expired_posts(ctx: Arc<WorkerContext>) -> Result<()> {
    let cutoff = Utc::now().timestamp() - ctx.service.post_active_secs;

    let post_ids = ctx.redis.expired_post_ids(cutoff).await?;
    if post_ids.is_empty() {
        return Ok(());
    }

    let scores = ctx.redis.post_scores(&post_ids).await?;
    let ups = ctx.redis.post_vote_nums(&post_ids, 1).await?;
    let downs = ctx.redis.post_vote_nums(&post_ids, -1).await?;

    let frozen: Vec<ExpiredPostScore> = post_ids
        .iter()
        .zip(scores)
        .zip(ups.iter().zip(downs.iter()))
        .map(|((post_id, score), (up, down))| ExpiredPostScore {
            post_id: *post_id,
            score,
            vote_num: up - down,
        })
        .collect();

    let mut tx = ctx.db.begin().await?;
    db::post::update_post_status(&mut *tx, POST_STATUS_EXPIRED, &post_ids).await?;
    db::post::create_expired_post_scores(&mut *tx, &frozen).await?;
    tx.commit().await?;
    tracing::info!(count = post_ids.len(), "persisted expired post scores");

    ctx.redis.delete_post_scores(&post_ids).await?;
    ctx.redis.delete_post_times(&post_ids).await?;
    ctx.redis.delete_post_views(&post_ids).await?;
    ctx.redis.delete_post_voted_sets(&post_ids).await?;

    let community_ids = db::community::community_ids(&ctx.db).await?;
    for community_id in community_ids {
        if let Err(err) = ctx.redis.remove_expired_in_community(community_id, cutoff).await {
            tracing::warn!(community_id, %err, "failed to sweep community slice");
        }
    }
    tracing::info!(count = post_ids.len(), "removed expired posts from ranking sets");
    Ok(())
}

/// Materialize the current top of the score ranking into the local cache.
pub(crate) async fn refresh_hot_posts(ctx: Arc<WorkerContext>) -> Result<()> {
    let (post_ids, _) = ctx
        .redis
        .post_ids(1, ctx.service.hot_post_size, PostOrder::Score)
        .await?;
    let posts = ctx.posts.list_by_ids(&post_ids).await?;
    ctx.cache
        .set(HOT_POSTS_KEY.to_string(), CachedEntry::HotPosts(Arc::new(posts)));
    tracing::info!("refreshed hot post list");
    Ok(())
}
