use std::sync::Arc;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Redis error: {0}")]
    Redis(fred::error::Error),

    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden")]
    Forbidden,

    #[error("Operation timed out")]
    Timeout,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Expired token")]
    ExpiredToken,

    #[error("Login required")]
    NeedLogin,

    #[error("Login expired")]
    ExpiredLogin,

    #[error("Unsupported auth protocol")]
    UnsupportedAuthProtocol,

    #[error("User already exists")]
    UserExist,

    #[error("User does not exist")]
    UserNotExist,

    #[error("Wrong password")]
    WrongPassword,

    #[error("Email already registered")]
    EmailExist,

    #[error("No such community")]
    NoSuchCommunity,

    #[error("No such post")]
    NoSuchPost,

    #[error("No such comment")]
    NoSuchComment,

    #[error("Voting window has expired")]
    VoteTimeExpire,

    #[error("Invalid verification code")]
    InvalidVerificationCode,

    /// A failure observed through a single-flight group. Every waiter of the
    /// collapsed call receives the same underlying error.
    #[error(transparent)]
    Shared(Arc<Error>),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<fred::error::Error> for Error {
    fn from(err: fred::error::Error) -> Self {
        if matches!(err.kind(), fred::error::ErrorKind::Timeout) {
            Error::Timeout
        } else {
            Error::Redis(err)
        }
    }
}

impl Error {
    /// Unwrap the `Shared` layer so callers can match on the original kind.
    pub fn root(&self) -> &Error {
        match self {
            Error::Shared(inner) => inner.root(),
            other => other,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Error::Timeout)
    }
}

/// Postgres unique-violation (SQLSTATE 23505). Subject and like/hate-mapping
/// inserts racing through concurrent consumers hit this benignly.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_errors_expose_the_root_kind() {
        let inner = Arc::new(Error::NoSuchPost);
        let err = Error::Shared(Arc::new(Error::Shared(inner)));
        assert!(matches!(err.root(), Error::NoSuchPost));
    }

    #[test]
    fn timeout_is_detected_through_shared() {
        let err = Error::Shared(Arc::new(Error::Timeout));
        assert!(err.is_timeout());
        assert!(!Error::Forbidden.is_timeout());
    }
}
