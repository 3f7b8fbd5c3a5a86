use std::collections::BinaryHeap;
use std::cmp::Reverse;
use std::sync::Arc;

use dashmap::DashMap;
use moka::sync::Cache;

use crate::types::{CommentInfo, ObjType, PostDetail};

/// A value held by the process-local cache. Entries are cheap to clone so
/// concurrent readers never block each other on large DTOs.
#[derive(Clone)]
pub enum CachedEntry {
    Post(Arc<PostDetail>),
    Comment(Arc<CommentInfo>),
    /// Reply comment-ids of one root comment, floor order.
    Replies(Arc<Vec<i64>>),
    HotPosts(Arc<Vec<PostDetail>>),
}

/// Per-object read counter used for hot-spot detection.
#[derive(Debug, Clone, Copy)]
pub struct ObjectView {
    pub obj_type: ObjType,
    pub obj_id: i64,
    pub views: i64,
    pub first_seen: i64,
}

/// The first cache tier: a bounded in-process map of hot DTOs plus the view
/// counters that drive the hot-spot refresh loops.
pub struct LocalCache {
    entries: Cache<String, CachedEntry>,
    views: DashMap<String, ObjectView>,
}

pub const HOT_POSTS_KEY: &str = "hotposts";

pub fn object_key(obj_type: ObjType, obj_id: i64) -> String {
    format!("{}_{}", obj_type.as_i16(), obj_id)
}

pub fn metadata_key(obj_type: ObjType, obj_id: i64) -> String {
    format!("{}_{}_metadata", obj_type.as_i16(), obj_id)
}

pub fn replies_key(obj_type: ObjType, obj_id: i64) -> String {
    format!("{}_{}_replies", obj_type.as_i16(), obj_id)
}

impl LocalCache {
    pub fn new(capacity: u64) -> Self {
        LocalCache {
            entries: Cache::builder().max_capacity(capacity).build(),
            views: DashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<CachedEntry> {
        self.entries.get(key)
    }

    pub fn set(&self, key: String, value: CachedEntry) {
        self.entries.insert(key, value);
    }

    pub fn remove(&self, key: &str) {
        self.entries.invalidate(key);
    }

    pub fn get_post(&self, key: &str) -> Option<Arc<PostDetail>> {
        match self.entries.get(key) {
            Some(CachedEntry::Post(post)) => Some(post),
            _ => None,
        }
    }

    pub fn get_comment(&self, key: &str) -> Option<Arc<CommentInfo>> {
        match self.entries.get(key) {
            Some(CachedEntry::Comment(comment)) => Some(comment),
            _ => None,
        }
    }

    pub fn get_replies(&self, key: &str) -> Option<Arc<Vec<i64>>> {
        match self.entries.get(key) {
            Some(CachedEntry::Replies(ids)) => Some(ids),
            _ => None,
        }
    }

    pub fn get_hot_posts(&self) -> Option<Arc<Vec<PostDetail>>> {
        match self.entries.get(HOT_POSTS_KEY) {
            Some(CachedEntry::HotPosts(posts)) => Some(posts),
            _ => None,
        }
    }

    // ========================================================================
    // View counters
    // ========================================================================

    /// Bump an object's view counter. Returns true when this is the first
    /// sighting of the object since the last sweep.
    pub fn incr_view(&self, obj_type: ObjType, obj_id: i64, delta: i64, now: i64) -> bool {
        let key = object_key(obj_type, obj_id);
        let mut created = false;
        self.views
            .entry(key)
            .and_modify(|v| v.views += delta)
            .or_insert_with(|| {
                created = true;
                ObjectView {
                    obj_type,
                    obj_id,
                    views: delta,
                    first_seen: now,
                }
            });
        created
    }

    /// Top-k object ids of one type by view count, ascending by views, via a
    /// bounded min-heap over the counter map.
    pub fn top_k_by_views(&self, obj_type: ObjType, k: usize) -> Vec<i64> {
        if k == 0 {
            return Vec::new();
        }
        let mut heap: BinaryHeap<Reverse<(i64, i64)>> = BinaryHeap::with_capacity(k + 1);
        for entry in self.views.iter() {
            let view = entry.value();
            if view.obj_type != obj_type {
                continue;
            }
            heap.push(Reverse((view.views, view.obj_id)));
            if heap.len() > k {
                heap.pop();
            }
        }
        let mut ids = Vec::with_capacity(heap.len());
        while let Some(Reverse((_, obj_id))) = heap.pop() {
            ids.push(obj_id);
        }
        ids
    }

    pub fn remove_object_view(&self, obj_type: ObjType, obj_id: i64) {
        self.views.remove(&object_key(obj_type, obj_id));
    }

    /// Sweep counters first seen before the cutoff, dropping their cached DTO
    /// entry along with the counter.
    pub fn remove_expired_views(&self, cutoff: i64) -> usize {
        let mut removed = 0;
        self.views.retain(|key, view| {
            if view.first_seen < cutoff {
                self.entries.invalidate(key);
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn view_count(&self) -> usize {
        self.views.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn comment(id: i64) -> CommentInfo {
        CommentInfo {
            comment_id: id,
            obj_id: 1,
            obj_type: ObjType::Post.as_i16(),
            root: 0,
            parent: 0,
            user_id: 9,
            user_name: "u".into(),
            avatar: String::new(),
            floor: 1,
            like: 0,
            message: String::new(),
            replies: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn cache_keys_encode_type_and_id() {
        assert_eq!(object_key(ObjType::Post, 42), "1_42");
        assert_eq!(metadata_key(ObjType::Comment, 7), "2_7_metadata");
        assert_eq!(replies_key(ObjType::Comment, 7), "2_7_replies");
    }

    #[test]
    fn typed_getters_reject_mismatched_entries() {
        let cache = LocalCache::new(16);
        cache.set("k".into(), CachedEntry::Comment(Arc::new(comment(1))));
        assert!(cache.get_comment("k").is_some());
        assert!(cache.get_post("k").is_none());
        assert!(cache.get_replies("k").is_none());
    }

    #[test]
    fn incr_view_reports_new_members() {
        let cache = LocalCache::new(16);
        assert!(cache.incr_view(ObjType::Post, 42, 1, 100));
        assert!(!cache.incr_view(ObjType::Post, 42, 3, 200));
    }

    #[test]
    fn top_k_returns_the_highest_counters_of_one_type() {
        let cache = LocalCache::new(16);
        for (id, views) in [(1, 10), (2, 50), (3, 30), (4, 5)] {
            cache.incr_view(ObjType::Post, id, views, 0);
        }
        cache.incr_view(ObjType::Comment, 99, 1_000, 0);

        let top = cache.top_k_by_views(ObjType::Post, 2);
        assert_eq!(top.len(), 2);
        assert!(top.contains(&2) && top.contains(&3));
    }

    #[test]
    fn expired_views_are_swept_with_their_entries() {
        let cache = LocalCache::new(16);
        cache.incr_view(ObjType::Post, 1, 1, 100);
        cache.incr_view(ObjType::Post, 2, 1, 500);
        cache.set(
            object_key(ObjType::Post, 1),
            CachedEntry::Replies(Arc::new(vec![7])),
        );

        assert_eq!(cache.remove_expired_views(300), 1);
        assert_eq!(cache.view_count(), 1);
        assert!(cache.get_replies(&object_key(ObjType::Post, 1)).is_none());
    }
}
