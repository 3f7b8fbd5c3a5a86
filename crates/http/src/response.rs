use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use driftboard_common::Error;

/// Business codes carried in the response envelope. HTTP status stays 200 for
/// every processed request; clients dispatch on this code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Code {
    Success = 1000,
    Internal = 1001,
    Busy = 1002,
    InvalidParam = 1003,
    UnsupportedAuthProtocol = 1004,
    InvalidToken = 1005,
    ExpiredToken = 1006,
    UserExist = 1007,
    UserNotExist = 1008,
    WrongPassword = 1009,
    NeedLogin = 1010,
    ExpiredLogin = 1011,
    EmailExist = 1012,
    InvalidVerificationCode = 1013,
    Forbidden = 1014,
    NotFound = 1015,
    Timeout = 1016,
    NoSuchCommunity = 1017,
    NoSuchPost = 1018,
    NoSuchComment = 1019,
    VoteTimeExpire = 1020,
}

impl Code {
    pub fn msg(self) -> &'static str {
        match self {
            Code::Success => "success",
            Code::Internal => "internal error",
            Code::Busy => "server busy",
            Code::InvalidParam => "invalid parameter",
            Code::UnsupportedAuthProtocol => "unsupported auth protocol",
            Code::InvalidToken => "invalid token",
            Code::ExpiredToken => "expired token",
            Code::UserExist => "user already exists",
            Code::UserNotExist => "user does not exist",
            Code::WrongPassword => "wrong password",
            Code::NeedLogin => "login required",
            Code::ExpiredLogin => "login expired",
            Code::EmailExist => "email already registered",
            Code::InvalidVerificationCode => "invalid verification code",
            Code::Forbidden => "forbidden",
            Code::NotFound => "not found",
            Code::Timeout => "operation timed out",
            Code::NoSuchCommunity => "no such community",
            Code::NoSuchPost => "no such post",
            Code::NoSuchComment => "no such comment",
            Code::VoteTimeExpire => "voting window has expired",
        }
    }

    pub fn from_error(err: &Error) -> Code {
        match err.root() {
            Error::InvalidParam(_) => Code::InvalidParam,
            Error::NotFound(_) => Code::NotFound,
            Error::Forbidden => Code::Forbidden,
            Error::Timeout => Code::Timeout,
            Error::InvalidToken => Code::InvalidToken,
            Error::ExpiredToken => Code::ExpiredToken,
            Error::NeedLogin => Code::NeedLogin,
            Error::ExpiredLogin => Code::ExpiredLogin,
            Error::UnsupportedAuthProtocol => Code::UnsupportedAuthProtocol,
            Error::UserExist => Code::UserExist,
            Error::UserNotExist => Code::UserNotExist,
            Error::WrongPassword => Code::WrongPassword,
            Error::EmailExist => Code::EmailExist,
            Error::NoSuchCommunity => Code::NoSuchCommunity,
            Error::NoSuchPost => Code::NoSuchPost,
            Error::NoSuchComment => Code::NoSuchComment,
            Error::VoteTimeExpire => Code::VoteTimeExpire,
            Error::InvalidVerificationCode => Code::InvalidVerificationCode,
            _ => Code::Internal,
        }
    }
}

pub fn success<T: Serialize>(data: T) -> Response {
    Json(json!({
        "code": Code::Success as u32,
        "msg": Code::Success.msg(),
        "data": data,
    }))
    .into_response()
}

/// Map an engine error to its business code. Unclassified errors log with
/// their chain and surface as `Internal`.
pub fn failure(err: &Error) -> Response {
    let code = Code::from_error(err);
    if code == Code::Internal {
        tracing::error!(%err, "request failed");
    }
    error_response(code)
}

pub fn error_response(code: Code) -> Response {
    Json(json!({
        "code": code as u32,
        "msg": code.msg(),
        "data": null,
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_their_codes() {
        assert_eq!(Code::from_error(&Error::VoteTimeExpire), Code::VoteTimeExpire);
        assert_eq!(Code::from_error(&Error::Forbidden), Code::Forbidden);
        assert_eq!(
            Code::from_error(&Error::Internal("x".into())),
            Code::Internal
        );
    }

    #[test]
    fn shared_errors_map_through_their_root() {
        let err = Error::Shared(std::sync::Arc::new(Error::NoSuchPost));
        assert_eq!(Code::from_error(&err), Code::NoSuchPost);
    }
}
