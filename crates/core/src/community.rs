use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use sqlx::PgPool;

use driftboard_common::types::Community;
use driftboard_common::{Error, IdGenerator, Result};

use crate::db;

#[derive(Debug, Deserialize)]
pub struct CreateCommunityParams {
    pub community_name: String,
    #[serde(default)]
    pub introduction: String,
}

pub struct CommunityEngine {
    db: PgPool,
    ids: Arc<IdGenerator>,
}

impl CommunityEngine {
    pub fn new(db: PgPool, ids: Arc<IdGenerator>) -> Self {
        CommunityEngine { db, ids }
    }

    pub async fn create(&self, params: CreateCommunityParams) -> Result<i64> {
        if params.community_name.is_empty() {
            return Err(Error::InvalidParam("empty community name".to_string()));
        }
        let community = Community {
            community_id: self.ids.next(),
            community_name: params.community_name,
            introduction: params.introduction,
            created_at: Utc::now(),
        };
        db::community::create_community(&self.db, &community).await?;
        Ok(community.community_id)
    }

    pub async fn list(&self) -> Result<Vec<Community>> {
        db::community::communities(&self.db).await
    }

    pub async fn detail(&self, community_id: i64) -> Result<Community> {
        db::community::community_by_id(&self.db, community_id)
            .await?
            .ok_or(Error::NoSuchCommunity)
    }
}
