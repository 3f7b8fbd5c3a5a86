use axum::extract::{Query, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use driftboard_core::user::{LoginParams, RefreshParams, RegisterParams, UpdateProfileParams};

use crate::extractors::AuthUser;
use crate::response::{failure, success};
use crate::state::AppState;

pub async fn register(
    State(state): State<AppState>,
    Json(params): Json<RegisterParams>,
) -> Response {
    match state.users.register(params).await {
        Ok(user_id) => success(json!({ "user_id": user_id.to_string() })),
        Err(err) => failure(&err),
    }
}

pub async fn login(State(state): State<AppState>, Json(params): Json<LoginParams>) -> Response {
    match state.users.login(params).await {
        Ok(result) => success(result),
        Err(err) => failure(&err),
    }
}

pub async fn profile(State(state): State<AppState>, AuthUser(user_id): AuthUser) -> Response {
    match state.users.profile(user_id).await {
        Ok(user) => success(user),
        Err(err) => failure(&err),
    }
}

pub async fn refresh(State(state): State<AppState>, Json(params): Json<RefreshParams>) -> Response {
    match state.users.refresh(params).await {
        Ok(result) => success(result),
        Err(err) => failure(&err),
    }
}

pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(params): Json<UpdateProfileParams>,
) -> Response {
    match state.users.update_profile(user_id, params).await {
        Ok(()) => success(()),
        Err(err) => failure(&err),
    }
}

#[derive(Debug, Deserialize)]
pub struct UserPostsParams {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_size")]
    pub size: i64,
}

fn default_page() -> i64 {
    1
}

fn default_size() -> i64 {
    10
}

pub async fn posts(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(params): Query<UserPostsParams>,
) -> Response {
    match state
        .posts
        .posts_by_author(user_id, params.page, params.size)
        .await
    {
        Ok((posts, total)) => success(json!({ "total": total, "posts": posts })),
        Err(err) => failure(&err),
    }
}

#[derive(Debug, Deserialize)]
pub struct SendCodeParams {
    pub email: String,
}

pub async fn send_verification_code(
    State(state): State<AppState>,
    Json(params): Json<SendCodeParams>,
) -> Response {
    match state.users.send_verification_code(params.email) {
        Ok(()) => success(()),
        Err(err) => failure(&err),
    }
}
