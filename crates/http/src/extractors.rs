use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::response::Response;

use driftboard_common::Error;

use crate::response::failure;
use crate::state::AppState;

/// The authenticated caller, resolved from the `Authorization: Bearer` header
/// against the token engine and the fast-store session mirror.
pub struct AuthUser(pub i64);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| failure(&Error::NeedLogin))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| failure(&Error::UnsupportedAuthProtocol))?;

        let user_id = state
            .users
            .verify_token(token)
            .await
            .map_err(|err| failure(&err))?;
        Ok(AuthUser(user_id))
    }
}
