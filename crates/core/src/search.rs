use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use driftboard_common::Result;

/// Document shape handed to the external posts index. Title and content are
/// truncated by the caller before indexing.
#[derive(Debug, Clone, Serialize)]
pub struct PostDoc {
    pub post_id: i64,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordOrder {
    Time,
    Correlation,
}

impl KeywordOrder {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "time" => Some(KeywordOrder::Time),
            "correlation" => Some(KeywordOrder::Correlation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct KeywordQuery {
    pub keyword: String,
    pub order: KeywordOrder,
    pub page: i64,
    pub size: i64,
}

/// Boundary to the full-text search engine. The engine itself lives outside
/// this system; only id resolution crosses the seam.
#[async_trait]
pub trait PostIndex: Send + Sync {
    async fn create(&self, doc: &PostDoc) -> Result<()>;
    async fn update(&self, doc: &PostDoc) -> Result<()>;
    async fn delete(&self, post_id: i64) -> Result<()>;
    async fn query_by_keyword(&self, query: &KeywordQuery) -> Result<Vec<i64>>;
}

/// Stand-in used when no search engine is configured: indexing is a no-op
/// and keyword queries resolve to nothing.
pub struct DisabledIndex;

#[async_trait]
impl PostIndex for DisabledIndex {
    async fn create(&self, _doc: &PostDoc) -> Result<()> {
        Ok(())
    }

    async fn update(&self, _doc: &PostDoc) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _post_id: i64) -> Result<()> {
        Ok(())
    }

    async fn query_by_keyword(&self, _query: &KeywordQuery) -> Result<Vec<i64>> {
        Ok(Vec::new())
    }
}
