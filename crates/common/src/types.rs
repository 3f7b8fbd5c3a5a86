use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sqlx::FromRow;

use crate::{Error, Result};

// ============================================================================
// Comment subjects
// ============================================================================

/// The kind of object a comment thread hangs off. Serialized as its numeric
/// tag, which is also what the record store and the fast-store keys carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjType {
    Post,
    Comment,
}

impl ObjType {
    pub fn as_i16(self) -> i16 {
        match self {
            ObjType::Post => 1,
            ObjType::Comment => 2,
        }
    }

    pub fn from_i16(v: i16) -> Result<Self> {
        match v {
            1 => Ok(ObjType::Post),
            2 => Ok(ObjType::Comment),
            other => Err(Error::InvalidParam(format!("unknown obj_type {other}"))),
        }
    }
}

impl Serialize for ObjType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_i16(self.as_i16())
    }
}

impl<'de> Deserialize<'de> for ObjType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let v = i16::deserialize(deserializer)?;
        ObjType::from_i16(v).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// User / community rows
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub user_id: i64,
    pub user_name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub email: String,
    pub gender: i16,
    pub avatar: String,
    pub intro: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Community {
    pub community_id: i64,
    pub community_name: String,
    pub introduction: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Posts
// ============================================================================

pub const POST_STATUS_ACTIVE: i16 = 0;
pub const POST_STATUS_EXPIRED: i16 = 1;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Post {
    pub post_id: i64,
    pub community_id: i64,
    pub author_id: i64,
    pub status: i16,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Frozen ranking data for a post that has left the active window.
#[derive(Debug, Clone, FromRow)]
pub struct ExpiredPostScore {
    pub post_id: i64,
    pub score: f64,
    pub vote_num: i64,
}

/// Post joined with its author and community, as served on read paths.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PostDetail {
    pub post_id: i64,
    pub author_id: i64,
    pub author_name: String,
    pub community_id: i64,
    pub community_name: String,
    pub community_intro: String,
    pub status: i16,
    pub title: String,
    pub content: String,
    #[sqlx(default)]
    pub vote_num: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Comment rows
// ============================================================================

/// One row per `(obj_id, obj_type)` that has received any comment. `count` is
/// the next-floor counter for root comments and never decreases; `root_count`
/// tracks live root comments.
#[derive(Debug, Clone, FromRow)]
pub struct CommentSubject {
    pub id: i64,
    pub obj_id: i64,
    pub obj_type: i16,
    pub count: i32,
    pub root_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct CommentIndex {
    pub id: i64,
    pub obj_id: i64,
    pub obj_type: i16,
    pub root: i64,
    pub parent: i64,
    pub user_id: i64,
    pub floor: i32,
    pub count: i32,
    pub root_count: i32,
    pub like: i32,
    pub hate: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Comment text, persisted separately from the index so the large column can
/// be written with relaxed consistency.
#[derive(Debug, Clone, FromRow)]
pub struct CommentContent {
    pub comment_id: i64,
    pub message: String,
}

// ============================================================================
// Comment DTOs
// ============================================================================

/// Comment metadata joined with its author, as assembled on the read path.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CommentInfo {
    pub comment_id: i64,
    pub obj_id: i64,
    pub obj_type: i16,
    pub root: i64,
    pub parent: i64,
    pub user_id: i64,
    pub user_name: String,
    pub avatar: String,
    pub floor: i32,
    pub like: i64,
    #[sqlx(default)]
    pub message: String,
    #[sqlx(skip)]
    #[serde(default)]
    pub replies: Vec<CommentInfo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommentPage {
    pub total: i64,
    pub comments: Vec<CommentInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn obj_type_round_trips_through_its_tag() {
        for t in [ObjType::Post, ObjType::Comment] {
            assert_eq!(ObjType::from_i16(t.as_i16()).unwrap(), t);
        }
        assert!(ObjType::from_i16(7).is_err());
    }

    #[test]
    fn obj_type_serializes_as_number() {
        assert_eq!(serde_json::to_string(&ObjType::Post).unwrap(), "1");
        let t: ObjType = serde_json::from_str("2").unwrap();
        assert_eq!(t, ObjType::Comment);
    }
}
