use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use serde_json::json;

use driftboard_core::community::CreateCommunityParams;

use crate::extractors::AuthUser;
use crate::response::{failure, success};
use crate::state::AppState;

pub async fn create(
    State(state): State<AppState>,
    AuthUser(_user_id): AuthUser,
    Json(params): Json<CreateCommunityParams>,
) -> Response {
    match state.communities.create(params).await {
        Ok(community_id) => success(json!({ "community_id": community_id.to_string() })),
        Err(err) => failure(&err),
    }
}

pub async fn list(State(state): State<AppState>) -> Response {
    match state.communities.list().await {
        Ok(communities) => success(communities),
        Err(err) => failure(&err),
    }
}

pub async fn detail(State(state): State<AppState>, Path(community_id): Path<i64>) -> Response {
    match state.communities.detail(community_id).await {
        Ok(community) => success(community),
        Err(err) => failure(&err),
    }
}
