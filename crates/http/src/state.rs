use std::sync::Arc;

use driftboard_common::{Config, RedisClient, StatusBoard};
use driftboard_core::{CommentEngine, CommunityEngine, PostEngine, UserEngine};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub redis: Arc<RedisClient>,
    pub status: Arc<StatusBoard>,
    pub users: Arc<UserEngine>,
    pub posts: Arc<PostEngine>,
    pub comments: Arc<CommentEngine>,
    pub communities: Arc<CommunityEngine>,
}
