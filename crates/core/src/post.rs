use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use sqlx::PgPool;

use driftboard_common::config::Config;
use driftboard_common::localcache::{object_key, LocalCache};
use driftboard_common::redis::{PostOrder, RedisClient};
use driftboard_common::score::reddit_score;
use driftboard_common::types::{ObjType, Post, PostDetail, POST_STATUS_ACTIVE};
use driftboard_common::{Error, IdGenerator, Result, Singleflight};

use crate::db;
use crate::queue::{Event, Producer};
use crate::search::{KeywordOrder, KeywordQuery, PostDoc, PostIndex};

#[derive(Debug, Deserialize)]
pub struct CreatePostParams {
    pub community_id: i64,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct VoteParams {
    pub post_id: i64,
    /// 1 up, -1 down, 0 retract.
    pub direction: i64,
}

#[derive(Debug, Deserialize)]
pub struct PostListParams {
    #[serde(default)]
    pub community_id: Option<i64>,
    #[serde(default = "default_order")]
    pub order: String,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_size")]
    pub size: i64,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub keyword: String,
    #[serde(default = "default_search_order")]
    pub order: String,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_size")]
    pub size: i64,
}

fn default_order() -> String {
    "time".to_string()
}

fn default_search_order() -> String {
    "correlation".to_string()
}

fn default_page() -> i64 {
    1
}

fn default_size() -> i64 {
    10
}

/// Post ranking: Reddit-score maintenance on the vote path, ordered listings
/// out of the fast store, and detail assembly that survives expiration.
pub struct PostEngine {
    db: PgPool,
    redis: Arc<RedisClient>,
    cache: Arc<LocalCache>,
    producer: Arc<Producer>,
    index: Arc<dyn PostIndex>,
    ids: Arc<IdGenerator>,
    epoch: i64,
    active_secs: i64,
    content_max_len: i32,
    hot_size: i64,
    sf_detail: Singleflight<PostDetail>,
    sf_list: Singleflight<Vec<PostDetail>>,
    sf_keyword: Singleflight<Vec<i64>>,
}

impl PostEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: &Config,
        db: PgPool,
        redis: Arc<RedisClient>,
        cache: Arc<LocalCache>,
        producer: Arc<Producer>,
        index: Arc<dyn PostIndex>,
        ids: Arc<IdGenerator>,
    ) -> Self {
        let timeout = Duration::from_millis(cfg.service.singleflight_timeout_ms);
        let forget = Duration::from_millis(cfg.service.singleflight_forget_ms);
        PostEngine {
            db,
            redis,
            cache,
            producer,
            index,
            ids,
            epoch: cfg.start_epoch,
            active_secs: cfg.service.post_active_secs,
            content_max_len: cfg.service.post_content_max_len,
            hot_size: cfg.service.hot_post_size,
            sf_detail: Singleflight::new(timeout, forget),
            sf_list: Singleflight::new(timeout, forget),
            sf_keyword: Singleflight::new(timeout, forget),
        }
    }

    pub async fn create(&self, params: CreatePostParams, author_id: i64) -> Result<i64> {
        if params.title.is_empty() || params.content.is_empty() {
            return Err(Error::InvalidParam("empty title or content".to_string()));
        }
        db::community::community_by_id(&self.db, params.community_id)
            .await?
            .ok_or(Error::NoSuchCommunity)?;

        let post_id = self.ids.next();
        let now = Utc::now();
        let post = Post {
            post_id,
            community_id: params.community_id,
            author_id,
            status: POST_STATUS_ACTIVE,
            title: params.title,
            content: params.content,
            created_at: now,
            updated_at: now,
        };
        db::post::create_post(&self.db, &post).await?;

        let publish_ts = now.timestamp();
        self.redis
            .set_post(
                post_id,
                post.community_id,
                publish_ts,
                reddit_score(publish_ts, 1, self.epoch),
            )
            .await?;

        let doc = PostDoc {
            post_id,
            title: truncate(&post.title, 64),
            content: truncate(&post.content, 256),
            created_at: now,
        };
        if let Err(err) = self.index.create(&doc).await {
            tracing::warn!(post_id, %err, "failed to index post");
        }
        Ok(post_id)
    }

    /// Serve the detail DTO, local cache first. Every read is a view for the
    /// hot-spot detector.
    pub async fn detail(&self, post_id: i64) -> Result<PostDetail> {
        let key = object_key(ObjType::Post, post_id);
        let detail = match self.cache.get_post(&key) {
            Some(cached) => (*cached).clone(),
            None => self.load_detail(post_id).await?,
        };

        self.cache
            .incr_view(ObjType::Post, post_id, 1, Utc::now().timestamp());
        if let Err(err) = self.redis.incr_post_view(post_id).await {
            tracing::warn!(post_id, %err, "failed to bump view rank");
        }
        Ok(detail)
    }

    /// Assemble the detail from the record store, vote count from the voted
    /// set while active and from the frozen snapshot afterwards. Concurrent
    /// misses of one post collapse to a single assembly.
    pub async fn load_detail(&self, post_id: i64) -> Result<PostDetail> {
        let db = self.db.clone();
        let redis = Arc::clone(&self.redis);
        self.sf_detail
            .run(&format!("post_detail:{post_id}"), async move {
                let mut detail = db::post::post_detail(&db, post_id)
                    .await?
                    .ok_or(Error::NoSuchPost)?;
                if detail.status == POST_STATUS_ACTIVE {
                    let (up, down) = redis.post_vote_counts(post_id).await?;
                    detail.vote_num = up - down;
                } else {
                    let frozen = db::post::expired_vote_nums(&db, &[post_id]).await?;
                    detail.vote_num = frozen.first().map(|(_, v)| *v).unwrap_or(0);
                }
                Ok(detail)
            })
            .await
    }

    /// Record a vote and rescore the post. Voting closes when the post
    /// leaves its active window.
    pub async fn vote(&self, user_id: i64, params: VoteParams) -> Result<()> {
        if !(-1..=1).contains(&params.direction) {
            return Err(Error::InvalidParam("direction must be -1, 0 or 1".to_string()));
        }

        let publish_ts = self
            .redis
            .publish_time(params.post_id)
            .await?
            .ok_or(Error::NoSuchPost)? as i64;
        if Utc::now().timestamp() - publish_ts > self.active_secs {
            return Err(Error::VoteTimeExpire);
        }

        self.redis
            .set_user_post_direction(params.post_id, user_id, params.direction)
            .await?;

        let (up, down) = self.redis.post_vote_counts(params.post_id).await?;
        self.redis
            .set_post_score(params.post_id, reddit_score(publish_ts, up - down, self.epoch))
            .await?;
        Ok(())
    }

    /// Paged listing in the requested order, optionally community-scoped.
    pub async fn list(&self, params: PostListParams) -> Result<(Vec<PostDetail>, i64)> {
        let order = PostOrder::parse(&params.order)
            .ok_or_else(|| Error::InvalidParam(format!("unknown order {}", params.order)))?;

        let (ids, total) = match params.community_id {
            Some(community_id) => {
                self.redis
                    .post_ids_by_community(params.page, params.size, order, community_id)
                    .await?
            }
            None => self.redis.post_ids(params.page, params.size, order).await?,
        };

        let posts = self.list_by_ids(&ids).await?;
        Ok((posts, total))
    }

    /// Details for an explicit id list, order preserved. Collapsed across
    /// concurrent callers asking for the same ids.
    pub async fn list_by_ids(&self, post_ids: &[i64]) -> Result<Vec<PostDetail>> {
        if post_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sf_key = post_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let db = self.db.clone();
        let redis = Arc::clone(&self.redis);
        let ids = post_ids.to_vec();
        let content_max_len = self.content_max_len;

        self.sf_list
            .run(&format!("post_list:{sf_key}"), async move {
                assemble_list(&db, &redis, &ids, content_max_len).await
            })
            .await
    }

    /// The hot list served from the local cache; before the first refresh
    /// tick it falls back to assembling the top of the score ranking.
    pub async fn hot(&self) -> Result<Vec<PostDetail>> {
        if let Some(posts) = self.cache.get_hot_posts() {
            return Ok((*posts).clone());
        }
        let (ids, _) = self.redis.post_ids(1, self.hot_size, PostOrder::Score).await?;
        self.list_by_ids(&ids).await
    }

    /// A user's own posts, newest first.
    pub async fn posts_by_author(
        &self,
        author_id: i64,
        page: i64,
        size: i64,
    ) -> Result<(Vec<PostDetail>, i64)> {
        let offset = (page - 1).max(0) * size;
        let ids = db::post::post_ids_by_author(&self.db, author_id, offset, size).await?;
        let total = db::post::post_count_by_author(&self.db, author_id).await?;
        let posts = self.list_by_ids(&ids).await?;
        Ok((posts, total))
    }

    /// Keyword search against the record store's title/content columns, for
    /// deployments without an external index.
    pub async fn search_record_store(&self, params: SearchParams) -> Result<Vec<PostDetail>> {
        let offset = (params.page - 1).max(0) * params.size;
        let ids =
            db::post::post_ids_by_keyword(&self.db, &params.keyword, offset, params.size).await?;
        self.list_by_ids(&ids).await
    }

    /// Keyword search: the external index resolves ids, the listing path
    /// assembles them.
    pub async fn search(&self, params: SearchParams) -> Result<Vec<PostDetail>> {
        let order = KeywordOrder::parse(&params.order)
            .ok_or_else(|| Error::InvalidParam(format!("unknown order {}", params.order)))?;
        let query = KeywordQuery {
            keyword: params.keyword.clone(),
            order,
            page: params.page,
            size: params.size,
        };

        let index = Arc::clone(&self.index);
        let sf_key = format!(
            "keyword:{}:{}:{}:{}",
            params.keyword, params.order, params.page, params.size
        );
        let ids = self
            .sf_keyword
            .run(&sf_key, async move { index.query_by_keyword(&query).await })
            .await?;

        self.list_by_ids(&ids).await
    }

    /// Remove a post: record store first, then every ranking structure, then
    /// the comment cascade through the event log.
    pub async fn remove(&self, post_id: i64, user_id: i64) -> Result<()> {
        let (author_id, community_id) = db::post::post_author_and_community(&self.db, post_id)
            .await?
            .ok_or(Error::NoSuchPost)?;
        if author_id != user_id {
            return Err(Error::Forbidden);
        }

        let mut tx = self.db.begin().await?;
        db::post::delete_post(&mut *tx, post_id).await?;
        db::post::delete_expired_post_score(&mut *tx, post_id).await?;
        tx.commit().await?;

        if let Err(err) = self.redis.remove_post(post_id, community_id).await {
            tracing::warn!(post_id, %err, "failed to drop post from ranking sets");
        }
        self.cache.remove(&object_key(ObjType::Post, post_id));
        self.cache.remove_object_view(ObjType::Post, post_id);

        self.producer
            .publish_background(Event::comment_remove_by_obj(post_id, ObjType::Post));
        if let Err(err) = self.index.delete(post_id).await {
            tracing::warn!(post_id, %err, "failed to drop post from search index");
        }
        Ok(())
    }
}

async fn assemble_list(
    db: &PgPool,
    redis: &RedisClient,
    post_ids: &[i64],
    content_max_len: i32,
) -> Result<Vec<PostDetail>> {
    let mut rows = db::post::post_list_by_ids(db, post_ids, content_max_len).await?;

    let ups = redis.post_vote_nums(post_ids, 1).await?;
    let downs = redis.post_vote_nums(post_ids, -1).await?;
    let live: HashMap<i64, i64> = post_ids
        .iter()
        .zip(ups.iter().zip(downs.iter()))
        .map(|(id, (up, down))| (*id, up - down))
        .collect();

    let expired_ids: Vec<i64> = rows
        .iter()
        .filter(|p| p.status != POST_STATUS_ACTIVE)
        .map(|p| p.post_id)
        .collect();
    let frozen: HashMap<i64, i64> = db::post::expired_vote_nums(db, &expired_ids)
        .await?
        .into_iter()
        .collect();

    for row in &mut rows {
        row.vote_num = if row.status == POST_STATUS_ACTIVE {
            live.get(&row.post_id).copied().unwrap_or(0)
        } else {
            frozen.get(&row.post_id).copied().unwrap_or(0)
        };
    }
    Ok(rows)
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_character_boundaries() {
        assert_eq!(truncate("hello", 64), "hello");
        assert_eq!(truncate("héllo wörld", 5), "héllo");
    }

    #[test]
    fn list_params_default_to_time_order() {
        let params: PostListParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params.order, "time");
        assert!(params.community_id.is_none());
    }
}
