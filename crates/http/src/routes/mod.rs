use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

mod comments;
mod communities;
mod debug;
mod posts;
mod users;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/user/register", post(users::register))
        .route("/user/login", post(users::login))
        .route("/user/profile", get(users::profile))
        .route("/user/update", post(users::update_profile))
        .route("/user/posts", get(users::posts))
        .route("/token/refresh", post(users::refresh))
        .route("/email/verification", post(users::send_verification_code))
        .route("/community/create", post(communities::create))
        .route("/community/list", get(communities::list))
        .route("/community/{id}", get(communities::detail))
        .route("/post/create", post(posts::create))
        .route("/post/vote", post(posts::vote))
        .route("/post/remove", delete(posts::remove))
        .route("/post/list", get(posts::list))
        .route("/post/hot", get(posts::hot))
        .route("/post/search", get(posts::search))
        .route("/post/search2", get(posts::search_record_store))
        .route("/post/{id}", get(posts::detail))
        .route("/comment/create", post(comments::create))
        .route("/comment/remove", delete(comments::remove))
        .route("/comment/list", get(comments::list))
        .route("/comment/like", post(comments::like))
        .route("/comment/hate", post(comments::hate))
        .route("/comment/liked", get(comments::user_like_ids))
        .route("/debug/message/{unique_key}", get(debug::message_status))
}
