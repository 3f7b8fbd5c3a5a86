use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use sqlx::PgPool;

use driftboard_common::config::Config;
use driftboard_common::localcache::{metadata_key, replies_key, CachedEntry, LocalCache};
use driftboard_common::types::{CommentInfo, CommentPage, ObjType};
use driftboard_common::{Error, IdGenerator, KeyedMutex, RedisClient, Result, Singleflight};

use crate::db;
use crate::queue::{Event, Producer};
use crate::rebuild::Rebuilder;

#[derive(Debug, Deserialize)]
pub struct CreateCommentParams {
    pub obj_id: i64,
    pub obj_type: ObjType,
    #[serde(default)]
    pub root: i64,
    #[serde(default)]
    pub parent: i64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct RemoveCommentParams {
    pub obj_id: i64,
    pub obj_type: ObjType,
    pub comment_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct CommentListParams {
    pub obj_id: i64,
    pub obj_type: ObjType,
    #[serde(default = "default_order")]
    pub order_by: String,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_size")]
    pub size: i64,
}

fn default_order() -> String {
    "floor".to_string()
}

fn default_page() -> i64 {
    1
}

fn default_size() -> i64 {
    10
}

#[derive(Debug, Deserialize)]
pub struct LikeHateParams {
    pub comment_id: i64,
    pub obj_id: i64,
    pub obj_type: ObjType,
}

/// The comment interaction engine: reply-tree writes through the event log,
/// read-path assembly across all three tiers, and the like/hate toggle.
pub struct CommentEngine {
    db: PgPool,
    redis: Arc<RedisClient>,
    cache: Arc<LocalCache>,
    rebuild: Arc<Rebuilder>,
    producer: Arc<Producer>,
    ids: Arc<IdGenerator>,
    locks: KeyedMutex,
    like_set_ttl: i64,
    hate_set_ttl: i64,
    sf_metadata: Singleflight<Vec<CommentInfo>>,
    sf_replies: Singleflight<Vec<CommentInfo>>,
}

impl CommentEngine {
    pub fn new(
        cfg: &Config,
        db: PgPool,
        redis: Arc<RedisClient>,
        cache: Arc<LocalCache>,
        rebuild: Arc<Rebuilder>,
        producer: Arc<Producer>,
        ids: Arc<IdGenerator>,
    ) -> Self {
        let timeout = Duration::from_millis(cfg.service.singleflight_timeout_ms);
        let forget = Duration::from_millis(cfg.service.singleflight_forget_ms);
        CommentEngine {
            db,
            redis,
            cache,
            rebuild,
            producer,
            ids,
            locks: KeyedMutex::new(),
            like_set_ttl: cfg.service.like_set_expire as i64,
            hate_set_ttl: cfg.service.hate_set_expire as i64,
            sf_metadata: Singleflight::new(timeout, forget),
            sf_replies: Singleflight::new(timeout, forget),
        }
    }

    /// Hand the creation to the event log and answer optimistically: the
    /// floor is assigned when the consumer lands the transaction.
    pub async fn create(&self, params: CreateCommentParams, user_id: i64) -> Result<CommentInfo> {
        if params.message.is_empty() {
            return Err(Error::InvalidParam("empty comment message".to_string()));
        }
        if params.root == 0 && params.parent != 0 {
            return Err(Error::InvalidParam("reply without a root comment".to_string()));
        }

        let user = db::user::user_by_id(&self.db, user_id)
            .await?
            .ok_or(Error::UserNotExist)?;
        let comment_id = self.ids.next();

        self.producer.publish_background(Event::comment_create(
            params.obj_id,
            params.obj_type,
            params.root,
            params.parent,
            user_id,
            comment_id,
            params.message.clone(),
        ));

        let now = Utc::now();
        Ok(CommentInfo {
            comment_id,
            obj_id: params.obj_id,
            obj_type: params.obj_type.as_i16(),
            root: params.root,
            parent: params.parent,
            user_id,
            user_name: user.user_name,
            avatar: user.avatar,
            floor: 0,
            like: 0,
            message: params.message,
            replies: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Resolve the whole subtree, then hand the removal to the event log.
    /// Only the author may remove a comment.
    pub async fn remove(&self, params: RemoveCommentParams, user_id: i64) -> Result<()> {
        let author = db::comment::comment_author(&self.db, params.comment_id)
            .await?
            .ok_or(Error::NoSuchComment)?;
        if author != user_id {
            return Err(Error::Forbidden);
        }

        let root = db::comment::comment_root(&self.db, params.comment_id)
            .await?
            .ok_or(Error::NoSuchComment)?;
        let is_root = root == 0;

        let mut comment_ids =
            db::comment::descendant_ids(&self.db, params.comment_id, is_root).await?;
        comment_ids.push(params.comment_id);

        self.producer.publish_background(Event::comment_remove(
            params.obj_id,
            params.obj_type,
            params.comment_id,
            comment_ids,
            user_id,
            is_root,
        ));
        Ok(())
    }

    /// Assemble one page of the reply tree, floor order by default.
    pub async fn list(&self, params: CommentListParams) -> Result<CommentPage> {
        let root_ids = self.comment_ids(params.obj_type, params.obj_id).await?;
        let total = root_ids.len() as i64;
        if total == 0 {
            return Ok(CommentPage {
                total: 0,
                comments: Vec::new(),
            });
        }

        let start = (params.page - 1) * params.size;
        if start < 0 || start >= total {
            return Err(Error::InvalidParam("page out of range".to_string()));
        }
        let end = (start + params.size).min(total);
        let page_ids = &root_ids[start as usize..end as usize];

        let mut roots = self.root_metadata(page_ids).await?;

        // Hot-spot signal for the refresh loops.
        let now = Utc::now().timestamp();
        for comment_id in page_ids {
            self.cache.incr_view(ObjType::Comment, *comment_id, 1, now);
        }

        let mut replies = self.reply_metadata(page_ids).await?;

        self.attach_engagement(&mut roots).await?;
        self.attach_engagement(&mut replies).await?;

        // Map each reply under its root.
        let mut slots: HashMap<i64, usize> = HashMap::with_capacity(roots.len());
        for (i, root) in roots.iter().enumerate() {
            slots.insert(root.comment_id, i);
        }
        for reply in replies {
            let Some(&slot) = slots.get(&reply.root) else {
                return Err(Error::Internal(format!(
                    "reply {} maps to no root on this page",
                    reply.comment_id
                )));
            };
            roots[slot].replies.push(reply);
        }
        for root in &mut roots {
            root.replies.sort_by_key(|r| r.floor);
        }

        if params.order_by == "like" {
            roots.sort_by(|a, b| b.like.cmp(&a.like));
            for root in &mut roots {
                root.replies.sort_by(|a, b| b.like.cmp(&a.like));
            }
        }

        Ok(CommentPage {
            total,
            comments: roots,
        })
    }

    /// Toggle a like (hate) on one comment. A per-(user, comment, subject)
    /// mutex keeps one user's double-clicks from racing each other; the
    /// pending-delete set keeps cancellations correct across the asynchronous
    /// persistence of the like sets.
    pub async fn like_or_hate(
        &self,
        user_id: i64,
        comment_id: i64,
        obj_id: i64,
        obj_type: ObjType,
        like: bool,
    ) -> Result<()> {
        let lock_key = format!("{user_id}_{comment_id}_{obj_id}_{}", obj_type.as_i16());
        let _guard = self.locks.lock(&lock_key).await;

        // Populate the subject index so a dead subject fails fast.
        self.rebuild.comment_index(obj_type, obj_id).await?;

        let mut pre = self
            .redis
            .like_set_contains(comment_id, user_id, obj_id, obj_type, like)
            .await?;
        if !pre {
            let set_key =
                driftboard_common::redis::like_set_key(comment_id, obj_id, obj_type, like);
            if !self.redis.exists(&set_key).await? {
                // The set is cold. If the comment sits in the pending-delete
                // set, the record store still holds a mapping row the user
                // already cancelled; rebuilding from it would resurrect the
                // like.
                if self.redis.rem_cid_contains(comment_id).await? {
                    pre = false;
                } else {
                    pre = self
                        .rebuild
                        .like_set(comment_id, user_id, obj_id, obj_type, like)
                        .await?;
                }
            }
        }

        let offset: i64 = if pre {
            self.redis
                .rem_like_set_user(comment_id, user_id, obj_id, obj_type, like)
                .await?;
            // Defer the record-store purge to the maintenance loop.
            self.redis.add_rem_cid(comment_id).await?;
            self.redis
                .rem_user_mapping_member(user_id, comment_id, obj_id, obj_type, like)
                .await?;
            -1
        } else {
            // Cancel any pending purge first or the maintenance loop could
            // delete the mapping we are about to recreate.
            self.redis.rem_rem_cid(comment_id).await?;
            self.redis
                .add_like_set_user(comment_id, user_id, obj_id, obj_type, like)
                .await?;
            self.rebuild
                .user_mapping(user_id, obj_id, obj_type, like)
                .await?;
            let ttl = if like { self.like_set_ttl } else { self.hate_set_ttl };
            self.redis
                .add_user_mapping_members(user_id, obj_id, obj_type, like, &[comment_id], ttl)
                .await?;
            1
        };

        self.redis.incr_comment_count(comment_id, offset, like).await?;

        if like {
            let key = metadata_key(ObjType::Comment, comment_id);
            if let Some(cached) = self.cache.get_comment(&key) {
                let mut updated = (*cached).clone();
                updated.like += offset;
                self.cache.set(key, CachedEntry::Comment(Arc::new(updated)));
            }
        }
        Ok(())
    }

    /// Comment ids the user has liked (hated) under one subject, cache first
    /// with record-store fallbacks.
    pub async fn user_like_ids(
        &self,
        user_id: i64,
        obj_id: i64,
        obj_type: ObjType,
        like: bool,
    ) -> Result<Vec<String>> {
        let list = match self.rebuild.user_mapping(user_id, obj_id, obj_type, like).await {
            Ok(Some(list)) => list,
            Ok(None) => match self
                .redis
                .user_mapping_members(user_id, obj_id, obj_type, like)
                .await
            {
                Ok(list) => list,
                Err(err) => {
                    tracing::warn!(%err, "user mapping read failed, reading record store");
                    db::comment::user_like_list(&self.db, user_id, obj_id, obj_type, like).await?
                }
            },
            Err(err) => {
                tracing::warn!(%err, "user mapping rebuild failed, reading record store");
                db::comment::user_like_list(&self.db, user_id, obj_id, obj_type, like).await?
            }
        };
        Ok(list.into_iter().map(|id| id.to_string()).collect())
    }

    /// Metadata (record-store values only) for the given comments, or for
    /// every reply under them. Used by the hot-spot refresh to fill the local
    /// cache without double-counting buffered deltas.
    pub async fn details_from_record_store(
        &self,
        by_root: bool,
        comment_ids: &[i64],
    ) -> Result<Vec<CommentInfo>> {
        db::comment::comment_metadata(&self.db, by_root, comment_ids).await
    }

    pub async fn contents_for(&self, comment_ids: &[i64]) -> Result<Vec<String>> {
        if comment_ids.is_empty() {
            return Ok(Vec::new());
        }
        if let Err(err) = self.rebuild.comment_contents(comment_ids).await {
            tracing::warn!(%err, "content rebuild failed, reading record store");
            let rows = db::comment::comment_contents(&self.db, comment_ids).await?;
            let by_id: HashMap<i64, String> =
                rows.into_iter().map(|c| (c.comment_id, c.message)).collect();
            return Ok(comment_ids
                .iter()
                .map(|id| by_id.get(id).cloned().unwrap_or_default())
                .collect());
        }
        self.redis.comment_contents(comment_ids).await
    }

    // ========================================================================
    // Read-path helpers
    // ========================================================================

    /// Root ids of a subject: rebuild (collapsed) first, cache second, record
    /// store as the last resort.
    async fn comment_ids(&self, obj_type: ObjType, obj_id: i64) -> Result<Vec<i64>> {
        match self.rebuild.comment_index(obj_type, obj_id).await {
            // The rebuild already read the authoritative ids, reuse them.
            Ok(Some(ids)) => Ok(ids),
            Ok(None) => match self
                .redis
                .comment_index_members(obj_type, obj_id, 0, -1)
                .await
            {
                Ok(ids) => Ok(ids),
                Err(err) => {
                    tracing::warn!(%err, "comment index read failed, reading record store");
                    db::comment::root_comment_ids(&self.db, obj_type, obj_id).await
                }
            },
            Err(err) => {
                tracing::warn!(%err, "comment index rebuild failed, reading record store");
                db::comment::root_comment_ids(&self.db, obj_type, obj_id).await
            }
        }
    }

    /// Root metadata: local cache per id, the misses batched into a single
    /// record-store query collapsed across concurrent readers.
    async fn root_metadata(&self, comment_ids: &[i64]) -> Result<Vec<CommentInfo>> {
        let mut found: Vec<CommentInfo> = Vec::with_capacity(comment_ids.len());
        let mut missing: Vec<i64> = Vec::new();
        for comment_id in comment_ids {
            match self
                .cache
                .get_comment(&metadata_key(ObjType::Comment, *comment_id))
            {
                Some(cached) => found.push((*cached).clone()),
                None => missing.push(*comment_id),
            }
        }

        if !missing.is_empty() {
            found.extend(self.metadata_batch(false, &missing).await?);
        }
        found.sort_by_key(|c| c.floor);
        Ok(found)
    }

    /// Replies for the given roots: cached id lists resolve through cached
    /// metadata, everything else comes back in one batched query per miss
    /// set.
    async fn reply_metadata(&self, root_ids: &[i64]) -> Result<Vec<CommentInfo>> {
        let mut replies: Vec<CommentInfo> = Vec::new();
        let mut cached_reply_ids: Vec<i64> = Vec::new();
        let mut miss_roots: Vec<i64> = Vec::new();

        for root_id in root_ids {
            match self
                .cache
                .get_replies(&replies_key(ObjType::Comment, *root_id))
            {
                Some(ids) => cached_reply_ids.extend(ids.iter().copied()),
                None => miss_roots.push(*root_id),
            }
        }

        if !miss_roots.is_empty() {
            replies.extend(self.metadata_batch(true, &miss_roots).await?);
        }

        if !cached_reply_ids.is_empty() {
            let mut uncached: Vec<i64> = Vec::new();
            for comment_id in &cached_reply_ids {
                match self
                    .cache
                    .get_comment(&metadata_key(ObjType::Comment, *comment_id))
                {
                    Some(cached) => replies.push((*cached).clone()),
                    None => uncached.push(*comment_id),
                }
            }
            if !uncached.is_empty() {
                replies.extend(self.metadata_batch(false, &uncached).await?);
            }
        }
        Ok(replies)
    }

    async fn metadata_batch(&self, by_root: bool, ids: &[i64]) -> Result<Vec<CommentInfo>> {
        let joined = ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let sf_key = format!("{}:{}", if by_root { "replies" } else { "metadata" }, joined);
        let group = if by_root { &self.sf_replies } else { &self.sf_metadata };

        let db = self.db.clone();
        let ids = ids.to_vec();
        group
            .run(&sf_key, async move {
                db::comment::comment_metadata(&db, by_root, &ids).await
            })
            .await
    }

    /// Fold the buffered like deltas and the cached contents into the DTOs.
    async fn attach_engagement(&self, list: &mut [CommentInfo]) -> Result<()> {
        if list.is_empty() {
            return Ok(());
        }
        let cids: Vec<i64> = list.iter().map(|c| c.comment_id).collect();
        let deltas = self.redis.comment_counts(&cids, true).await?;
        let contents = self.contents_for(&cids).await?;
        if contents.len() != list.len() {
            return Err(Error::Internal(
                "contents and metadata disagree in length".to_string(),
            ));
        }
        for ((item, delta), content) in list.iter_mut().zip(deltas).zip(contents) {
            item.like += delta;
            item.message = content;
        }
        Ok(())
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_defaults_follow_the_query_contract() {
        let params: CommentListParams =
            serde_json::from_str(r#"{"obj_id": 1, "obj_type": 1}"#).unwrap();
        assert_eq!(params.order_by, "floor");
        assert_eq!(params.page, 1);
        assert_eq!(params.size, 10);
    }
}
