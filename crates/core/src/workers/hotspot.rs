use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use driftboard_common::localcache::{metadata_key, object_key, replies_key, CachedEntry};
use driftboard_common::types::ObjType;
use driftboard_common::Result;

use super::WorkerContext;

/// Fill the local cache with the most viewed posts' detail DTOs.
pub(crate) async fn refresh_post_hot_spot(ctx: Arc<WorkerContext>) -> Result<()> {
    let post_ids = ctx
        .cache
        .top_k_by_views(ObjType::Post, ctx.service.hot_spot_size_post);
    for post_id in post_ids {
        match ctx.posts.load_detail(post_id).await {
            Ok(detail) => ctx.cache.set(
                object_key(ObjType::Post, post_id),
                CachedEntry::Post(Arc::new(detail)),
            ),
            Err(err) => {
                tracing::warn!(post_id, %err, "failed to refresh hot post detail");
            }
        }
    }
    Ok(())
}

/// Fill the local cache with metadata and reply lists for the most viewed
/// root comments. Reply lists are written even when empty so a root without
/// replies cannot re-miss forever.
pub(crate) async fn refresh_comment_hot_spot(ctx: Arc<WorkerContext>) -> Result<()> {
    let mut comment_ids = ctx
        .cache
        .top_k_by_views(ObjType::Comment, ctx.service.hot_spot_size_comment);
    if comment_ids.is_empty() {
        return Ok(());
    }
    comment_ids.sort_unstable();

    let roots = ctx
        .comments
        .details_from_record_store(false, &comment_ids)
        .await?;
    let replies = ctx
        .comments
        .details_from_record_store(true, &comment_ids)
        .await?;

    let mut reply_lists: HashMap<i64, Vec<i64>> = HashMap::with_capacity(roots.len());
    for reply in &replies {
        reply_lists.entry(reply.root).or_default().push(reply.comment_id);
        ctx.cache.set(
            metadata_key(ObjType::Comment, reply.comment_id),
            CachedEntry::Comment(Arc::new(reply.clone())),
        );
    }
    for root in roots {
        let reply_list = reply_lists.remove(&root.comment_id).unwrap_or_default();
        ctx.cache.set(
            replies_key(ObjType::Comment, root.comment_id),
            CachedEntry::Replies(Arc::new(reply_list)),
        );
        ctx.cache.set(
            metadata_key(ObjType::Comment, root.comment_id),
            CachedEntry::Comment(Arc::new(root)),
        );
    }
    Ok(())
}

/// Sweep view counters that outlived the observation window.
pub(crate) async fn remove_expired_views(ctx: Arc<WorkerContext>) -> Result<()> {
    let cutoff = Utc::now().timestamp() - ctx.service.view_expire_secs;
    let removed = ctx.cache.remove_expired_views(cutoff);
    if removed > 0 {
        tracing::info!(removed, "swept expired view counters");
    }
    Ok(())
}
