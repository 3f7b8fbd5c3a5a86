use std::time::Duration;

use fred::prelude::*;
use fred::types::sorted_sets::AggregateOptions;
use fred::types::scan::Scanner;
use fred::types::{ClusterHash, CustomCommand};
use futures::StreamExt;

use crate::config::RedisConfig;
use crate::types::ObjType;
use crate::Result;

// Key namespace. Convention: prefix + key name + value shape + (PF) when the
// constant is a prefix completed by identifiers.
pub const KEY_POST_TIME_ZSET: &str = "driftboard:post:time";
pub const KEY_POST_SCORE_ZSET: &str = "driftboard:post:score";
pub const KEY_POST_VIEWS_ZSET: &str = "driftboard:post:views";
pub const KEY_POST_COMMUNITY_ZSET_PF: &str = "driftboard:post:community:";
pub const KEY_POST_VOTED_ZSET_PF: &str = "driftboard:post:voted:";
pub const KEY_CACHE_PF: &str = "driftboard:cache:";
pub const KEY_COMMENT_INDEX_ZSET_PF: &str = "driftboard:comment:index:";
pub const KEY_COMMENT_CONTENT_STRING_PF: &str = "driftboard:comment:content:";
pub const KEY_COMMENT_LIKE_STRING_PF: &str = "driftboard:comment:like:";
pub const KEY_COMMENT_HATE_STRING_PF: &str = "driftboard:comment:hate:";
pub const KEY_COMMENT_LIKE_SET_PF: &str = "driftboard:comment:likeset:";
pub const KEY_COMMENT_HATE_SET_PF: &str = "driftboard:comment:hateset:";
pub const KEY_COMMENT_USER_LIKE_IDS_PF: &str = "driftboard:comment:userlikeids:";
pub const KEY_COMMENT_USER_HATE_IDS_PF: &str = "driftboard:comment:userhateids:";
pub const KEY_COMMENT_REM_CID_SET: &str = "driftboard:comment:rem:cid";
pub const KEY_ACCESS_TOKEN_STRING_PF: &str = "driftboard:token:access_token:";
pub const KEY_REFRESH_TOKEN_STRING_PF: &str = "driftboard:token:refresh_token:";
pub const KEY_EMAIL_CODE_STRING_PF: &str = "driftboard:email:verification:";

/// Sentinel member written into rebuilt sets so an empty authoritative result
/// still leaves a non-empty key behind (cache-penetration guard).
pub const SET_SENTINEL: i64 = -1;

pub fn comment_index_key(obj_type: ObjType, obj_id: i64) -> String {
    format!("{}{}_{}", KEY_COMMENT_INDEX_ZSET_PF, obj_type.as_i16(), obj_id)
}

pub fn comment_content_key(comment_id: i64) -> String {
    format!("{KEY_COMMENT_CONTENT_STRING_PF}{comment_id}")
}

pub fn comment_count_key(comment_id: i64, like: bool) -> String {
    let pf = if like { KEY_COMMENT_LIKE_STRING_PF } else { KEY_COMMENT_HATE_STRING_PF };
    format!("{pf}{comment_id}")
}

pub fn like_set_key(comment_id: i64, obj_id: i64, obj_type: ObjType, like: bool) -> String {
    let pf = if like { KEY_COMMENT_LIKE_SET_PF } else { KEY_COMMENT_HATE_SET_PF };
    format!("{pf}{comment_id}_{obj_id}_{}", obj_type.as_i16())
}

pub fn user_mapping_key(user_id: i64, obj_id: i64, obj_type: ObjType, like: bool) -> String {
    let pf = if like { KEY_COMMENT_USER_LIKE_IDS_PF } else { KEY_COMMENT_USER_HATE_IDS_PF };
    format!("{pf}{user_id}_{obj_id}_{}", obj_type.as_i16())
}

pub fn post_voted_key(post_id: i64) -> String {
    format!("{KEY_POST_VOTED_ZSET_PF}{post_id}")
}

pub fn post_community_key(community_id: i64) -> String {
    format!("{KEY_POST_COMMUNITY_ZSET_PF}{community_id}")
}

/// Parse the comment id out of a `comment:like:`/`comment:hate:` key.
pub fn parse_count_key(key: &str) -> Option<i64> {
    key.rsplit(':').next()?.parse().ok()
}

/// Parse `(comment_id, obj_id, obj_type)` out of a like/hate-set key.
pub fn parse_like_set_key(key: &str) -> Option<(i64, i64, ObjType)> {
    let tail = key.rsplit(':').next()?;
    let mut parts = tail.split('_');
    let cid = parts.next()?.parse().ok()?;
    let oid = parts.next()?.parse().ok()?;
    let otype = ObjType::from_i16(parts.next()?.parse().ok()?).ok()?;
    Some((cid, oid, otype))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOrder {
    Time,
    Score,
    Views,
}

impl PostOrder {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "time" => Some(PostOrder::Time),
            "score" => Some(PostOrder::Score),
            "views" => Some(PostOrder::Views),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            PostOrder::Time => KEY_POST_TIME_ZSET,
            PostOrder::Score => KEY_POST_SCORE_ZSET,
            PostOrder::Views => KEY_POST_VIEWS_ZSET,
        }
    }

    fn name(self) -> &'static str {
        match self {
            PostOrder::Time => "time",
            PostOrder::Score => "score",
            PostOrder::Views => "views",
        }
    }
}

/// The second cache tier: typed operations over the remote string / set /
/// ordered-set store. Every command inherits the configured deadline; a
/// deadline miss surfaces as `Error::Timeout`.
pub struct RedisClient {
    client: Client,
    cache_key_ttl: i64,
    hot_key_ttl: i64,
}

impl RedisClient {
    pub async fn new(cfg: &RedisConfig) -> Result<Self> {
        let config = Config::from_url(&cfg.url)?;
        let deadline = Duration::from_secs(cfg.max_oper_time);
        let client = Builder::from_config(config)
            .with_performance_config(|perf| {
                perf.default_command_timeout = deadline;
            })
            .build()?;
        client.init().await?;

        Ok(RedisClient {
            client,
            cache_key_ttl: cfg.cache_key_ttl as i64,
            hot_key_ttl: cfg.hot_key_ttl as i64,
        })
    }

    pub async fn ping(&self) -> Result<()> {
        self.client.ping::<()>(None).await?;
        Ok(())
    }

    // ========================================================================
    // Generic key operations
    // ========================================================================

    pub async fn exists(&self, key: &str) -> Result<bool> {
        let count: i64 = self.client.exists(key).await?;
        Ok(count > 0)
    }

    /// Per-key existence, pipelined.
    pub async fn exists_many(&self, keys: &[String]) -> Result<Vec<bool>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let pipe = self.client.pipeline();
        for key in keys {
            let _: () = pipe.exists(key.as_str()).await?;
        }
        let counts: Vec<i64> = pipe.all().await?;
        Ok(counts.into_iter().map(|c| c > 0).collect())
    }

    pub async fn del_keys(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let _: i64 = self.client.del(keys.to_vec()).await?;
        Ok(())
    }

    pub async fn expire(&self, key: &str, seconds: i64) -> Result<()> {
        let _: i64 = self.client.expire(key, seconds, None).await?;
        Ok(())
    }

    /// Seconds since the key was last read or written (`OBJECT IDLETIME`).
    pub async fn idle_time(&self, key: &str) -> Result<i64> {
        let cmd = CustomCommand::new("OBJECT", ClusterHash::FirstKey, false);
        let idle: i64 = self
            .client
            .custom(cmd, vec!["IDLETIME".to_string(), key.to_string()])
            .await?;
        Ok(idle)
    }

    pub async fn idle_times(&self, keys: &[String]) -> Result<Vec<i64>> {
        let mut idles = Vec::with_capacity(keys.len());
        for key in keys {
            idles.push(self.idle_time(key).await?);
        }
        Ok(idles)
    }

    pub async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut stream = self.client.scan(pattern, Some(100), None);
        let mut keys = Vec::new();
        while let Some(page) = stream.next().await {
            let mut page = page?;
            if let Some(page_keys) = page.take_results() {
                keys.extend(page_keys.into_iter().filter_map(|k| k.into_string()));
            }
            let _ = page.next();
        }
        Ok(keys)
    }

    pub async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let members: Vec<String> = self.client.smembers(key).await?;
        Ok(members)
    }

    // ========================================================================
    // Post ranking
    // ========================================================================

    /// Seed a freshly created post into the time / score / community sets.
    pub async fn set_post(
        &self,
        post_id: i64,
        community_id: i64,
        publish_ts: i64,
        initial_score: f64,
    ) -> Result<()> {
        let member = post_id.to_string();
        let pipe = self.client.pipeline();
        let _: () = pipe
            .zadd(KEY_POST_TIME_ZSET, None, None, false, false, (publish_ts as f64, member.as_str()))
            .await?;
        let _: () = pipe
            .zadd(KEY_POST_SCORE_ZSET, None, None, false, false, (initial_score, member.as_str()))
            .await?;
        let _: () = pipe
            .zadd(
                post_community_key(community_id),
                None,
                None,
                false,
                false,
                (publish_ts as f64, member.as_str()),
            )
            .await?;
        let _: Vec<Value> = pipe.all().await?;
        Ok(())
    }

    pub async fn publish_time(&self, post_id: i64) -> Result<Option<f64>> {
        let score: Option<f64> = self
            .client
            .zscore(KEY_POST_TIME_ZSET, post_id.to_string())
            .await?;
        Ok(score)
    }

    pub async fn post_score(&self, post_id: i64) -> Result<f64> {
        let score: Option<f64> = self
            .client
            .zscore(KEY_POST_SCORE_ZSET, post_id.to_string())
            .await?;
        Ok(score.unwrap_or(0.0))
    }

    pub async fn set_post_score(&self, post_id: i64, score: f64) -> Result<()> {
        let _: () = self
            .client
            .zadd(KEY_POST_SCORE_ZSET, None, None, false, false, (score, post_id.to_string()))
            .await?;
        Ok(())
    }

    pub async fn post_scores(&self, post_ids: &[i64]) -> Result<Vec<f64>> {
        if post_ids.is_empty() {
            return Ok(Vec::new());
        }
        let pipe = self.client.pipeline();
        for post_id in post_ids {
            let _: () = pipe.zscore(KEY_POST_SCORE_ZSET, post_id.to_string()).await?;
        }
        let scores: Vec<Option<f64>> = pipe.all().await?;
        Ok(scores.into_iter().map(|s| s.unwrap_or(0.0)).collect())
    }

    pub async fn user_post_direction(&self, post_id: i64, user_id: i64) -> Result<i64> {
        let score: Option<f64> = self
            .client
            .zscore(post_voted_key(post_id), user_id.to_string())
            .await?;
        Ok(score.unwrap_or(0.0) as i64)
    }

    pub async fn set_user_post_direction(
        &self,
        post_id: i64,
        user_id: i64,
        direction: i64,
    ) -> Result<()> {
        let _: () = self
            .client
            .zadd(
                post_voted_key(post_id),
                None,
                None,
                false,
                false,
                (direction as f64, user_id.to_string()),
            )
            .await?;
        Ok(())
    }

    /// `(up, down)` vote counts of one post from its voted set.
    pub async fn post_vote_counts(&self, post_id: i64) -> Result<(i64, i64)> {
        let key = post_voted_key(post_id);
        let up: i64 = self.client.zcount(key.as_str(), 1.0, 1.0).await?;
        let down: i64 = self.client.zcount(key.as_str(), -1.0, -1.0).await?;
        Ok((up, down))
    }

    /// Vote counts in the given direction for many posts, pipelined.
    pub async fn post_vote_nums(&self, post_ids: &[i64], direction: i64) -> Result<Vec<i64>> {
        if post_ids.is_empty() {
            return Ok(Vec::new());
        }
        let bound = direction as f64;
        let pipe = self.client.pipeline();
        for post_id in post_ids {
            let _: () = pipe.zcount(post_voted_key(*post_id), bound, bound).await?;
        }
        let counts: Vec<i64> = pipe.all().await?;
        Ok(counts)
    }

    pub async fn incr_post_view(&self, post_id: i64) -> Result<()> {
        let _: f64 = self
            .client
            .zincrby(KEY_POST_VIEWS_ZSET, 1.0, post_id.to_string())
            .await?;
        Ok(())
    }

    /// Page of post ids in the requested order, plus the total member count.
    pub async fn post_ids(&self, page: i64, size: i64, order: PostOrder) -> Result<(Vec<i64>, i64)> {
        self.post_id_page(order.key(), page, size).await
    }

    /// Community-scoped listing. The intersection of the order set and the
    /// community set is heavy, so it is materialized under a cache key with a
    /// TTL; a hit before expiry marks the key hot and extends it.
    pub async fn post_ids_by_community(
        &self,
        page: i64,
        size: i64,
        order: PostOrder,
        community_id: i64,
    ) -> Result<(Vec<i64>, i64)> {
        let cache_key = format!("{}post_orderby:{}:{}", KEY_CACHE_PF, order.name(), community_id);

        if !self.exists(&cache_key).await? {
            let pipe = self.client.pipeline();
            let _: () = pipe
                .zinterstore(
                    cache_key.as_str(),
                    vec![order.key().to_string(), post_community_key(community_id)],
                    Vec::<f64>::new(),
                    Some(AggregateOptions::Max),
                )
                .await?;
            let _: () = pipe.expire(cache_key.as_str(), self.cache_key_ttl, None).await?;
            let _: Vec<Value> = pipe.all().await?;
        } else {
            self.expire(&cache_key, self.hot_key_ttl).await?;
        }

        self.post_id_page(&cache_key, page, size).await
    }

    async fn post_id_page(&self, key: &str, page: i64, size: i64) -> Result<(Vec<i64>, i64)> {
        let start = (page - 1) * size;
        let stop = start + size - 1;
        let ids: Vec<String> = self.client.zrevrange(key, start, stop, false).await?;
        let total: i64 = self.client.zcard(key).await?;
        Ok((parse_ids(ids), total))
    }

    /// Ids of posts whose publish time is at or before the cutoff. The time
    /// set is fetched newest-first and binary-searched for the boundary.
    pub async fn expired_post_ids(&self, cutoff: i64) -> Result<Vec<i64>> {
        let ids: Vec<String> = self
            .client
            .zrevrange(KEY_POST_TIME_ZSET, 0, -1, false)
            .await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let (mut lo, mut hi) = (0_i64, ids.len() as i64 - 1);
        let mut pos = -1_i64;
        while lo <= hi {
            let mid = lo + (hi - lo) / 2;
            let ts: Option<f64> = self
                .client
                .zscore(KEY_POST_TIME_ZSET, ids[mid as usize].as_str())
                .await?;
            if ts.unwrap_or(f64::MAX) <= cutoff as f64 {
                pos = mid;
                hi = mid - 1;
            } else {
                lo = mid + 1;
            }
        }

        if pos < 0 {
            return Ok(Vec::new());
        }
        Ok(parse_ids(ids[pos as usize..].to_vec()))
    }

    pub async fn delete_post_times(&self, post_ids: &[i64]) -> Result<()> {
        self.zrem_members(KEY_POST_TIME_ZSET, post_ids).await
    }

    pub async fn delete_post_scores(&self, post_ids: &[i64]) -> Result<()> {
        self.zrem_members(KEY_POST_SCORE_ZSET, post_ids).await
    }

    pub async fn delete_post_views(&self, post_ids: &[i64]) -> Result<()> {
        self.zrem_members(KEY_POST_VIEWS_ZSET, post_ids).await
    }

    pub async fn delete_post_voted_sets(&self, post_ids: &[i64]) -> Result<()> {
        let keys: Vec<String> = post_ids.iter().map(|id| post_voted_key(*id)).collect();
        self.del_keys(&keys).await
    }

    /// Drop every member of a community slice published at or before the
    /// cutoff. The slice is publish-time ordered, so the boundary is found by
    /// binary search just like the global time set.
    pub async fn remove_expired_in_community(&self, community_id: i64, cutoff: i64) -> Result<()> {
        let key = post_community_key(community_id);
        let ids: Vec<String> = self.client.zrange(&key, 0, -1, None, false, None, false).await?;
        if ids.is_empty() {
            return Ok(());
        }

        let (mut lo, mut hi) = (0_i64, ids.len() as i64 - 1);
        let mut pos = ids.len() as i64;
        while lo <= hi {
            let mid = lo + (hi - lo) / 2;
            let ts: Option<f64> = self.client.zscore(&key, ids[mid as usize].as_str()).await?;
            if ts.unwrap_or(0.0) > cutoff as f64 {
                pos = mid;
                hi = mid - 1;
            } else {
                lo = mid + 1;
            }
        }

        if pos == 0 {
            return Ok(());
        }
        let expired: Vec<String> = ids[..pos as usize].to_vec();
        let _: i64 = self.client.zrem(&key, expired).await?;
        Ok(())
    }

    /// Remove one post from every ranking structure (post deletion path).
    pub async fn remove_post(&self, post_id: i64, community_id: i64) -> Result<()> {
        let member = post_id.to_string();
        let pipe = self.client.pipeline();
        let _: () = pipe.zrem(KEY_POST_TIME_ZSET, member.as_str()).await?;
        let _: () = pipe.zrem(KEY_POST_SCORE_ZSET, member.as_str()).await?;
        let _: () = pipe.zrem(KEY_POST_VIEWS_ZSET, member.as_str()).await?;
        let _: () = pipe.zrem(post_community_key(community_id), member.as_str()).await?;
        let _: () = pipe.del(post_voted_key(post_id)).await?;
        let _: Vec<Value> = pipe.all().await?;
        Ok(())
    }

    async fn zrem_members(&self, key: &str, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let members: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        let _: i64 = self.client.zrem(key, members).await?;
        Ok(())
    }

    // ========================================================================
    // Comment index
    // ========================================================================

    pub async fn comment_exists(&self, obj_type: ObjType, obj_id: i64, comment_id: i64) -> Result<bool> {
        let score: Option<f64> = self
            .client
            .zscore(comment_index_key(obj_type, obj_id), comment_id.to_string())
            .await?;
        Ok(score.is_some())
    }

    /// Add members to a subject's floor-ordered comment index. Re-adding an
    /// existing member only refreshes its score.
    pub async fn add_comment_index_members(
        &self,
        obj_type: ObjType,
        obj_id: i64,
        members: &[(i64, i32)],
    ) -> Result<()> {
        if members.is_empty() {
            return Ok(());
        }
        let key = comment_index_key(obj_type, obj_id);
        let pipe = self.client.pipeline();
        for (comment_id, floor) in members {
            let _: () = pipe
                .zadd(key.as_str(), None, None, false, false, (*floor as f64, comment_id.to_string()))
                .await?;
        }
        let _: Vec<Value> = pipe.all().await?;
        Ok(())
    }

    pub async fn comment_index_count(&self, obj_type: ObjType, obj_id: i64) -> Result<i64> {
        let count: i64 = self.client.zcard(comment_index_key(obj_type, obj_id)).await?;
        Ok(count)
    }

    /// Members in `[start, stop)` by floor order; the full index when
    /// `start == 0 && stop == -1`.
    pub async fn comment_index_members(
        &self,
        obj_type: ObjType,
        obj_id: i64,
        start: i64,
        stop: i64,
    ) -> Result<Vec<i64>> {
        let stop = if stop < 0 { -1 } else { stop - 1 };
        let ids: Vec<String> = self
            .client
            .zrange(comment_index_key(obj_type, obj_id), start, stop, None, false, None, false)
            .await?;
        Ok(parse_ids(ids))
    }

    pub async fn rem_comment_index_member(
        &self,
        obj_type: ObjType,
        obj_id: i64,
        comment_id: i64,
    ) -> Result<()> {
        let _: i64 = self
            .client
            .zrem(comment_index_key(obj_type, obj_id), comment_id.to_string())
            .await?;
        Ok(())
    }

    pub async fn del_comment_index(&self, obj_type: ObjType, obj_id: i64) -> Result<()> {
        let _: i64 = self.client.del(comment_index_key(obj_type, obj_id)).await?;
        Ok(())
    }

    // ========================================================================
    // Comment contents
    // ========================================================================

    pub async fn add_comment_contents(&self, contents: &[(i64, String)]) -> Result<()> {
        if contents.is_empty() {
            return Ok(());
        }
        let pipe = self.client.pipeline();
        for (comment_id, message) in contents {
            let _: () = pipe
                .set(comment_content_key(*comment_id), message.as_str(), None, None, false)
                .await?;
        }
        let _: Vec<Value> = pipe.all().await?;
        Ok(())
    }

    /// Content strings in input order; absent keys yield empty strings.
    pub async fn comment_contents(&self, comment_ids: &[i64]) -> Result<Vec<String>> {
        if comment_ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = comment_ids.iter().map(|id| comment_content_key(*id)).collect();
        let values: Vec<Option<String>> = self.client.mget(keys).await?;
        Ok(values.into_iter().map(Option::unwrap_or_default).collect())
    }

    pub async fn del_comment_contents(&self, comment_ids: &[i64]) -> Result<()> {
        let keys: Vec<String> = comment_ids.iter().map(|id| comment_content_key(*id)).collect();
        self.del_keys(&keys).await
    }

    // ========================================================================
    // Comment like / hate counters
    // ========================================================================

    pub async fn incr_comment_count(&self, comment_id: i64, delta: i64, like: bool) -> Result<()> {
        let _: i64 = self
            .client
            .incr_by(comment_count_key(comment_id, like), delta)
            .await?;
        Ok(())
    }

    pub async fn comment_counts(&self, comment_ids: &[i64], like: bool) -> Result<Vec<i64>> {
        let keys: Vec<String> = comment_ids
            .iter()
            .map(|id| comment_count_key(*id, like))
            .collect();
        self.comment_counts_by_keys(&keys).await
    }

    pub async fn comment_counts_by_keys(&self, keys: &[String]) -> Result<Vec<i64>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let values: Vec<Option<String>> = self.client.mget(keys.to_vec()).await?;
        Ok(values
            .into_iter()
            .map(|v| v.and_then(|s| s.parse().ok()).unwrap_or(0))
            .collect())
    }

    pub async fn del_comment_counts(&self, comment_ids: &[i64], like: bool) -> Result<()> {
        let keys: Vec<String> = comment_ids
            .iter()
            .map(|id| comment_count_key(*id, like))
            .collect();
        self.del_keys(&keys).await
    }

    // ========================================================================
    // Comment like / hate membership sets
    // ========================================================================

    pub async fn like_set_contains(
        &self,
        comment_id: i64,
        user_id: i64,
        obj_id: i64,
        obj_type: ObjType,
        like: bool,
    ) -> Result<bool> {
        let contains: bool = self
            .client
            .sismember(like_set_key(comment_id, obj_id, obj_type, like), user_id.to_string())
            .await?;
        Ok(contains)
    }

    pub async fn add_like_set_user(
        &self,
        comment_id: i64,
        user_id: i64,
        obj_id: i64,
        obj_type: ObjType,
        like: bool,
    ) -> Result<()> {
        let _: i64 = self
            .client
            .sadd(like_set_key(comment_id, obj_id, obj_type, like), user_id.to_string())
            .await?;
        Ok(())
    }

    pub async fn rem_like_set_user(
        &self,
        comment_id: i64,
        user_id: i64,
        obj_id: i64,
        obj_type: ObjType,
        like: bool,
    ) -> Result<()> {
        let _: i64 = self
            .client
            .srem(like_set_key(comment_id, obj_id, obj_type, like), user_id.to_string())
            .await?;
        Ok(())
    }

    pub async fn del_like_sets(
        &self,
        comment_ids: &[i64],
        obj_id: i64,
        obj_type: ObjType,
        like: bool,
    ) -> Result<()> {
        let keys: Vec<String> = comment_ids
            .iter()
            .map(|id| like_set_key(*id, obj_id, obj_type, like))
            .collect();
        self.del_keys(&keys).await
    }

    // ========================================================================
    // Per-user liked/hated comment-id sets
    // ========================================================================

    pub async fn add_user_mapping_members(
        &self,
        user_id: i64,
        obj_id: i64,
        obj_type: ObjType,
        like: bool,
        comment_ids: &[i64],
        ttl: i64,
    ) -> Result<()> {
        if comment_ids.is_empty() {
            return Ok(());
        }
        let key = user_mapping_key(user_id, obj_id, obj_type, like);
        let members: Vec<String> = comment_ids.iter().map(|id| id.to_string()).collect();
        let pipe = self.client.pipeline();
        let _: () = pipe.sadd(key.as_str(), members).await?;
        let _: () = pipe.expire(key.as_str(), ttl, None).await?;
        let _: Vec<Value> = pipe.all().await?;
        Ok(())
    }

    /// Liked (hated) comment ids of one user under one subject, the rebuild
    /// sentinel filtered out.
    pub async fn user_mapping_members(
        &self,
        user_id: i64,
        obj_id: i64,
        obj_type: ObjType,
        like: bool,
    ) -> Result<Vec<i64>> {
        let members: Vec<String> = self
            .client
            .smembers(user_mapping_key(user_id, obj_id, obj_type, like))
            .await?;
        Ok(parse_ids(members).into_iter().filter(|id| *id != SET_SENTINEL).collect())
    }

    pub async fn rem_user_mapping_member(
        &self,
        user_id: i64,
        comment_id: i64,
        obj_id: i64,
        obj_type: ObjType,
        like: bool,
    ) -> Result<()> {
        let _: i64 = self
            .client
            .srem(user_mapping_key(user_id, obj_id, obj_type, like), comment_id.to_string())
            .await?;
        Ok(())
    }

    // ========================================================================
    // Pending like-mapping deletions (comment:rem:cid)
    // ========================================================================

    pub async fn add_rem_cid(&self, comment_id: i64) -> Result<()> {
        let _: i64 = self
            .client
            .sadd(KEY_COMMENT_REM_CID_SET, comment_id.to_string())
            .await?;
        Ok(())
    }

    pub async fn rem_rem_cid(&self, comment_id: i64) -> Result<()> {
        let _: i64 = self
            .client
            .srem(KEY_COMMENT_REM_CID_SET, comment_id.to_string())
            .await?;
        Ok(())
    }

    pub async fn rem_cid_contains(&self, comment_id: i64) -> Result<bool> {
        let contains: bool = self
            .client
            .sismember(KEY_COMMENT_REM_CID_SET, comment_id.to_string())
            .await?;
        Ok(contains)
    }

    /// Membership of many candidate ids in the pending-delete set, in order.
    pub async fn rem_cid_contains_many(&self, comment_ids: &[i64]) -> Result<Vec<bool>> {
        if comment_ids.is_empty() {
            return Ok(Vec::new());
        }
        let members: Vec<String> = comment_ids.iter().map(|id| id.to_string()).collect();
        let flags: Vec<i64> = self
            .client
            .smismember(KEY_COMMENT_REM_CID_SET, members)
            .await?;
        Ok(flags.into_iter().map(|f| f != 0).collect())
    }

    pub async fn rem_cid_members(&self) -> Result<Vec<i64>> {
        let members: Vec<String> = self.client.smembers(KEY_COMMENT_REM_CID_SET).await?;
        Ok(parse_ids(members))
    }

    pub async fn clear_rem_cids(&self) -> Result<()> {
        let _: i64 = self.client.del(KEY_COMMENT_REM_CID_SET).await?;
        Ok(())
    }

    // ========================================================================
    // Tokens and verification codes
    // ========================================================================

    pub async fn set_access_token(&self, user_id: i64, token: &str, ttl: i64) -> Result<()> {
        let key = format!("{KEY_ACCESS_TOKEN_STRING_PF}{user_id}");
        let _: () = self
            .client
            .set(key, token, Some(Expiration::EX(ttl)), None, false)
            .await?;
        Ok(())
    }

    pub async fn access_token(&self, user_id: i64) -> Result<Option<String>> {
        let key = format!("{KEY_ACCESS_TOKEN_STRING_PF}{user_id}");
        let token: Option<String> = self.client.get(key).await?;
        Ok(token)
    }

    pub async fn set_refresh_token(&self, user_id: i64, token: &str, ttl: i64) -> Result<()> {
        let key = format!("{KEY_REFRESH_TOKEN_STRING_PF}{user_id}");
        let _: () = self
            .client
            .set(key, token, Some(Expiration::EX(ttl)), None, false)
            .await?;
        Ok(())
    }

    pub async fn refresh_token(&self, user_id: i64) -> Result<Option<String>> {
        let key = format!("{KEY_REFRESH_TOKEN_STRING_PF}{user_id}");
        let token: Option<String> = self.client.get(key).await?;
        Ok(token)
    }

    pub async fn set_email_code(&self, address: &str, code: &str, ttl: i64) -> Result<()> {
        let key = format!("{KEY_EMAIL_CODE_STRING_PF}{address}");
        let _: () = self
            .client
            .set(key, code, Some(Expiration::EX(ttl)), None, false)
            .await?;
        Ok(())
    }

    pub async fn email_code(&self, address: &str) -> Result<Option<String>> {
        let key = format!("{KEY_EMAIL_CODE_STRING_PF}{address}");
        let code: Option<String> = self.client.get(key).await?;
        Ok(code)
    }
}

fn parse_ids(raw: Vec<String>) -> Vec<i64> {
    raw.into_iter().filter_map(|s| s.parse().ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_builders_match_the_documented_families() {
        assert_eq!(comment_index_key(ObjType::Post, 42), "driftboard:comment:index:1_42");
        assert_eq!(comment_content_key(7), "driftboard:comment:content:7");
        assert_eq!(comment_count_key(7, true), "driftboard:comment:like:7");
        assert_eq!(comment_count_key(7, false), "driftboard:comment:hate:7");
        assert_eq!(
            like_set_key(1001, 42, ObjType::Post, true),
            "driftboard:comment:likeset:1001_42_1"
        );
        assert_eq!(
            user_mapping_key(5, 42, ObjType::Post, false),
            "driftboard:comment:userhateids:5_42_1"
        );
        assert_eq!(post_voted_key(42), "driftboard:post:voted:42");
    }

    #[test]
    fn count_keys_parse_back_to_comment_ids() {
        let key = comment_count_key(9_001, true);
        assert_eq!(parse_count_key(&key), Some(9_001));
        assert_eq!(parse_count_key("driftboard:comment:like:junk"), None);
    }

    #[test]
    fn like_set_keys_parse_back_to_identifiers() {
        let key = like_set_key(1001, 42, ObjType::Post, false);
        assert_eq!(parse_like_set_key(&key), Some((1001, 42, ObjType::Post)));
        assert_eq!(parse_like_set_key("driftboard:comment:likeset:1_2"), None);
    }

    #[test]
    fn post_order_parses_the_documented_names() {
        assert_eq!(PostOrder::parse("time"), Some(PostOrder::Time));
        assert_eq!(PostOrder::parse("score"), Some(PostOrder::Score));
        assert_eq!(PostOrder::parse("views"), Some(PostOrder::Views));
        assert_eq!(PostOrder::parse("karma"), None);
    }
}
