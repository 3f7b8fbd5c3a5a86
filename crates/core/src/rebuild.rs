use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;

use driftboard_common::config::Config;
use driftboard_common::redis::{self, RedisClient, SET_SENTINEL};
use driftboard_common::types::ObjType;
use driftboard_common::{Result, Singleflight};

use crate::db;

/// The rebuild protocol: fill a missing fast-store key from the record store.
/// Every rebuild follows the same steps: check existence (refreshing the TTL
/// where the key carries one), read the authoritative rows, subtract members
/// pending deletion, guard empty results with a sentinel, and write back in
/// one pipelined batch. Rebuilds of one key are collapsed so a thundering
/// herd of cache misses reaches the record store once.
pub struct Rebuilder {
    db: PgPool,
    redis: Arc<RedisClient>,
    like_set_ttl: i64,
    hate_set_ttl: i64,
    sf_index: Singleflight<Option<Vec<i64>>>,
    sf_content: Singleflight<()>,
}

impl Rebuilder {
    pub fn new(cfg: &Config, db: PgPool, redis: Arc<RedisClient>) -> Self {
        let timeout = Duration::from_millis(cfg.service.singleflight_timeout_ms);
        let forget = Duration::from_millis(cfg.service.singleflight_forget_ms);
        Rebuilder {
            db,
            redis,
            like_set_ttl: cfg.service.like_set_expire as i64,
            hate_set_ttl: cfg.service.hate_set_expire as i64,
            sf_index: Singleflight::new(timeout, forget),
            sf_content: Singleflight::new(timeout, forget),
        }
    }

    /// Rebuild a subject's floor-ordered comment index. Returns the ids read
    /// from the record store when a rebuild actually ran, so callers can skip
    /// the follow-up cache read; `None` means the key was already present (or
    /// the subject has no comments).
    pub async fn comment_index(&self, obj_type: ObjType, obj_id: i64) -> Result<Option<Vec<i64>>> {
        let key = redis::comment_index_key(obj_type, obj_id);
        let db = self.db.clone();
        let redis = Arc::clone(&self.redis);

        self.sf_index
            .run(&key, async move {
                if redis.exists(&redis::comment_index_key(obj_type, obj_id)).await? {
                    return Ok(None);
                }

                let ids = db::comment::root_comment_ids(&db, obj_type, obj_id).await?;
                if ids.is_empty() {
                    return Ok(None);
                }

                let members = db::comment::comment_floor_pairs(&db, &ids).await?;
                redis.add_comment_index_members(obj_type, obj_id, &members).await?;
                tracing::info!(
                    obj_type = obj_type.as_i16(),
                    obj_id,
                    members = members.len(),
                    "rebuilt comment index from record store"
                );
                Ok(Some(ids))
            })
            .await
    }

    /// Ensure content strings for the given comments are cached, filling only
    /// the missing ones.
    pub async fn comment_contents(&self, comment_ids: &[i64]) -> Result<()> {
        if comment_ids.is_empty() {
            return Ok(());
        }
        let sf_key = comment_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let ids: Vec<i64> = comment_ids.to_vec();
        let db = self.db.clone();
        let redis = Arc::clone(&self.redis);

        self.sf_content
            .run(&sf_key, async move {
                let keys: Vec<String> =
                    ids.iter().map(|id| redis::comment_content_key(*id)).collect();
                let exists = redis.exists_many(&keys).await?;
                let missing: Vec<i64> = ids
                    .iter()
                    .zip(exists.iter())
                    .filter(|(_, hit)| !**hit)
                    .map(|(id, _)| *id)
                    .collect();
                if missing.is_empty() {
                    return Ok(());
                }

                let rows = db::comment::comment_contents(&db, &missing).await?;
                let contents: Vec<(i64, String)> =
                    rows.into_iter().map(|c| (c.comment_id, c.message)).collect();
                redis.add_comment_contents(&contents).await?;
                tracing::info!(rebuilt = contents.len(), "rebuilt comment contents from record store");
                Ok(())
            })
            .await
    }

    /// Rebuild one user's membership in a comment's like (hate) set from the
    /// mapping table. Returns whether the user had liked the comment.
    pub async fn like_set(
        &self,
        comment_id: i64,
        user_id: i64,
        obj_id: i64,
        obj_type: ObjType,
        like: bool,
    ) -> Result<bool> {
        let exists = db::comment::like_mapping_exists(&self.db, comment_id, user_id, like).await?;
        if exists {
            self.redis
                .add_like_set_user(comment_id, user_id, obj_id, obj_type, like)
                .await?;
        }
        Ok(exists)
    }

    /// Rebuild the set of comment ids one user has liked (hated) under one
    /// subject. A key that already exists only gets its TTL restored. Members
    /// sitting in the pending-delete set are withheld, and a sentinel keeps
    /// the key non-empty so an empty mapping cannot be re-missed.
    pub async fn user_mapping(
        &self,
        user_id: i64,
        obj_id: i64,
        obj_type: ObjType,
        like: bool,
    ) -> Result<Option<Vec<i64>>> {
        let key = redis::user_mapping_key(user_id, obj_id, obj_type, like);
        let ttl = if like { self.like_set_ttl } else { self.hate_set_ttl };

        if self.redis.exists(&key).await? {
            if let Err(err) = self.redis.expire(&key, ttl).await {
                tracing::warn!(key, %err, "failed to restore user-mapping TTL");
            }
            return Ok(None);
        }

        let list = db::comment::user_like_list(&self.db, user_id, obj_id, obj_type, like).await?;
        let pending = self.redis.rem_cid_contains_many(&list).await?;
        let mut members: Vec<i64> = vec![SET_SENTINEL];
        members.extend(
            list.iter()
                .zip(pending.iter())
                .filter(|(_, pending)| !**pending)
                .map(|(id, _)| *id),
        );

        self.redis
            .add_user_mapping_members(user_id, obj_id, obj_type, like, &members, ttl)
            .await?;
        tracing::info!(
            user_id,
            obj_id,
            rebuilt = members.len() - 1,
            "rebuilt user like mapping from record store"
        );
        Ok(Some(members.into_iter().filter(|id| *id != SET_SENTINEL).collect()))
    }
}
