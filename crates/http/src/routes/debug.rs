use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::Response;
use serde_json::json;

use crate::response::{failure, success};
use crate::state::AppState;

/// Poll the consumption outcome of one event-log message by its unique key
/// (e.g. `create_<comment_id>`). The entry clears once observed.
pub async fn message_status(
    State(state): State<AppState>,
    Path(unique_key): Path<String>,
) -> Response {
    match state
        .status
        .check_if_consumed(&unique_key, 5, Duration::from_millis(100))
        .await
    {
        Ok(consumed) => success(json!({ "unique_key": unique_key, "consumed": consumed })),
        Err(err) => failure(&err),
    }
}
