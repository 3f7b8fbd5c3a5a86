use axum::extract::{Query, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;

use driftboard_common::types::ObjType;
use driftboard_core::comment::{
    CommentListParams, CreateCommentParams, LikeHateParams, RemoveCommentParams,
};

use crate::extractors::AuthUser;
use crate::response::{failure, success};
use crate::state::AppState;

pub async fn create(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(params): Json<CreateCommentParams>,
) -> Response {
    match state.comments.create(params, user_id).await {
        Ok(comment) => success(comment),
        Err(err) => failure(&err),
    }
}

pub async fn remove(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(params): Query<RemoveCommentParams>,
) -> Response {
    match state.comments.remove(params, user_id).await {
        Ok(()) => success(()),
        Err(err) => failure(&err),
    }
}

pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<CommentListParams>,
) -> Response {
    match state.comments.list(params).await {
        Ok(page) => success(page),
        Err(err) => failure(&err),
    }
}

pub async fn like(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(params): Query<LikeHateParams>,
) -> Response {
    toggle(state, user_id, params, true).await
}

pub async fn hate(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(params): Query<LikeHateParams>,
) -> Response {
    toggle(state, user_id, params, false).await
}

async fn toggle(state: AppState, user_id: i64, params: LikeHateParams, like: bool) -> Response {
    match state
        .comments
        .like_or_hate(user_id, params.comment_id, params.obj_id, params.obj_type, like)
        .await
    {
        Ok(()) => success(()),
        Err(err) => failure(&err),
    }
}

#[derive(Debug, Deserialize)]
pub struct UserLikeListParams {
    pub obj_id: i64,
    pub obj_type: ObjType,
    #[serde(default = "default_like")]
    pub like: bool,
}

fn default_like() -> bool {
    true
}

pub async fn user_like_ids(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(params): Query<UserLikeListParams>,
) -> Response {
    match state
        .comments
        .user_like_ids(user_id, params.obj_id, params.obj_type, params.like)
        .await
    {
        Ok(ids) => success(ids),
        Err(err) => failure(&err),
    }
}
