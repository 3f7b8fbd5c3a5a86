use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use driftboard_core::post::{CreatePostParams, PostListParams, SearchParams, VoteParams};

use crate::extractors::AuthUser;
use crate::response::{failure, success};
use crate::state::AppState;

pub async fn create(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(params): Json<CreatePostParams>,
) -> Response {
    match state.posts.create(params, user_id).await {
        Ok(post_id) => success(json!({ "post_id": post_id.to_string() })),
        Err(err) => failure(&err),
    }
}

pub async fn detail(State(state): State<AppState>, Path(post_id): Path<i64>) -> Response {
    match state.posts.detail(post_id).await {
        Ok(detail) => success(detail),
        Err(err) => failure(&err),
    }
}

pub async fn vote(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(params): Json<VoteParams>,
) -> Response {
    match state.posts.vote(user_id, params).await {
        Ok(()) => success(()),
        Err(err) => failure(&err),
    }
}

#[derive(Debug, Deserialize)]
pub struct RemovePostParams {
    pub post_id: i64,
}

pub async fn remove(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(params): Query<RemovePostParams>,
) -> Response {
    match state.posts.remove(params.post_id, user_id).await {
        Ok(()) => success(()),
        Err(err) => failure(&err),
    }
}

pub async fn list(State(state): State<AppState>, Query(params): Query<PostListParams>) -> Response {
    match state.posts.list(params).await {
        Ok((posts, total)) => success(json!({ "total": total, "posts": posts })),
        Err(err) => failure(&err),
    }
}

pub async fn hot(State(state): State<AppState>) -> Response {
    match state.posts.hot().await {
        Ok(posts) => success(posts),
        Err(err) => failure(&err),
    }
}

pub async fn search(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Response {
    match state.posts.search(params).await {
        Ok(posts) => success(posts),
        Err(err) => failure(&err),
    }
}

pub async fn search_record_store(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Response {
    match state.posts.search_record_store(params).await {
        Ok(posts) => success(posts),
        Err(err) => failure(&err),
    }
}
