use std::sync::Arc;

use driftboard_common::redis::{
    parse_count_key, parse_like_set_key, KEY_COMMENT_CONTENT_STRING_PF, KEY_COMMENT_HATE_SET_PF,
    KEY_COMMENT_HATE_STRING_PF, KEY_COMMENT_INDEX_ZSET_PF, KEY_COMMENT_LIKE_SET_PF,
    KEY_COMMENT_LIKE_STRING_PF, SET_SENTINEL,
};
use driftboard_common::Result;

use super::{logically_expired_keys, WorkerContext};
use crate::queue::Event;

/// Flush idle like (hate) counters into the record store through the event
/// log, then drop the buffered keys.
pub(crate) async fn persist_comment_counts(ctx: Arc<WorkerContext>, like: bool) -> Result<()> {
    let prefix = if like { KEY_COMMENT_LIKE_STRING_PF } else { KEY_COMMENT_HATE_STRING_PF };
    let keys = ctx.redis.scan_keys(&format!("{prefix}*")).await?;
    let expired =
        logically_expired_keys(&ctx.redis, keys, ctx.service.comment_count_expire).await?;
    if expired.is_empty() {
        return Ok(());
    }

    let counts = ctx.redis.comment_counts_by_keys(&expired).await?;
    for (key, count) in expired.iter().zip(counts) {
        if count == 0 {
            continue;
        }
        let Some(comment_id) = parse_count_key(key) else {
            tracing::warn!(key, "skipping unparsable counter key");
            continue;
        };
        ctx.producer
            .publish(&Event::like_or_hate_incr(like, comment_id, count as i32))
            .await?;
    }

    ctx.redis.del_keys(&expired).await?;
    tracing::info!(count = expired.len(), like, "flushed idle comment counters");
    Ok(())
}

/// Persist idle like (hate) membership sets as mapping rows through the event
/// log, then drop the sets.
pub(crate) async fn persist_like_sets(ctx: Arc<WorkerContext>, like: bool) -> Result<()> {
    let prefix = if like { KEY_COMMENT_LIKE_SET_PF } else { KEY_COMMENT_HATE_SET_PF };
    let expire = if like { ctx.service.like_set_expire } else { ctx.service.hate_set_expire };
    let keys = ctx.redis.scan_keys(&format!("{prefix}*")).await?;
    let expired = logically_expired_keys(&ctx.redis, keys, expire).await?;
    if expired.is_empty() {
        return Ok(());
    }

    for key in &expired {
        let Some((comment_id, obj_id, obj_type)) = parse_like_set_key(key) else {
            tracing::warn!(key, "skipping unparsable like-set key");
            continue;
        };
        let members = ctx.redis.set_members(key).await?;
        for member in members {
            let Ok(user_id) = member.parse::<i64>() else {
                continue;
            };
            if user_id == SET_SENTINEL {
                continue;
            }
            ctx.producer
                .publish(&Event::mapping_create(comment_id, user_id, obj_id, obj_type, like))
                .await?;
        }
    }

    ctx.redis.del_keys(&expired).await?;
    tracing::info!(count = expired.len(), like, "flushed idle like sets");
    Ok(())
}

/// Drain the pending-delete set: every cancelled like becomes a mapping
/// removal through the event log; the set is cleared only after each member
/// was published.
pub(crate) async fn purge_cancelled_mappings(ctx: Arc<WorkerContext>) -> Result<()> {
    let comment_ids = ctx.redis.rem_cid_members().await?;
    if comment_ids.is_empty() {
        return Ok(());
    }

    for comment_id in &comment_ids {
        ctx.producer
            .publish(&Event::mapping_remove(*comment_id))
            .await?;
    }
    ctx.redis.clear_rem_cids().await?;
    tracing::info!(count = comment_ids.len(), "purged cancelled like mappings");
    Ok(())
}

pub(crate) async fn remove_expired_indices(ctx: Arc<WorkerContext>) -> Result<()> {
    remove_logically_expired(
        &ctx,
        &format!("{KEY_COMMENT_INDEX_ZSET_PF}*"),
        ctx.service.comment_index_expire,
    )
    .await
}

pub(crate) async fn remove_expired_contents(ctx: Arc<WorkerContext>) -> Result<()> {
    remove_logically_expired(
        &ctx,
        &format!("{KEY_COMMENT_CONTENT_STRING_PF}*"),
        ctx.service.comment_content_expire,
    )
    .await
}

async fn remove_logically_expired(
    ctx: &WorkerContext,
    pattern: &str,
    expire_secs: u64,
) -> Result<()> {
    let keys = ctx.redis.scan_keys(pattern).await?;
    let expired = logically_expired_keys(&ctx.redis, keys, expire_secs).await?;
    if expired.is_empty() {
        return Ok(());
    }
    ctx.redis.del_keys(&expired).await?;
    tracing::info!(count = expired.len(), pattern, "removed logically expired keys");
    Ok(())
}
