//! Error taxonomy for the realtime engine.
//!
//! `AuthError` ends a handshake. `EventError` never leaves the event router:
//! it is logged and the event is dropped without an ack to the client.

use crate::directory::DirectoryError;

/// Handshake failure. Raised before any registry or room state is touched.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing or invalid token")]
    InvalidToken,
    #[error("token expired")]
    TokenExpired,
    #[error("directory unavailable during handshake: {0}")]
    Upstream(DirectoryError),
}

impl AuthError {
    /// WebSocket close code sent to the client before the socket is dropped.
    pub fn close_code(&self) -> u16 {
        match self {
            Self::TokenExpired => 4001,
            Self::InvalidToken => 4002,
            Self::Upstream(_) => 1011,
        }
    }

    pub fn close_reason(&self) -> &'static str {
        match self {
            Self::TokenExpired => "Token expired",
            Self::InvalidToken => "Token invalid",
            Self::Upstream(_) => "Service unavailable",
        }
    }
}

impl From<DirectoryError> for AuthError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::InvalidToken | DirectoryError::NotFound => Self::InvalidToken,
            DirectoryError::TokenExpired => Self::TokenExpired,
            other => Self::Upstream(other),
        }
    }
}

/// Per-event failure inside the router.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("connection is not registered")]
    Unauthenticated,
    #[error("not authorized: {0}")]
    AuthorizationDenied(&'static str),
    #[error("invalid event: {0}")]
    Validation(&'static str),
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("directory unavailable: {0}")]
    UpstreamUnavailable(DirectoryError),
    #[error("{0} not found")]
    NotFound(&'static str),
}

impl From<DirectoryError> for EventError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::NotFound => Self::NotFound("record"),
            DirectoryError::Forbidden => Self::AuthorizationDenied("directory refused"),
            other => Self::UpstreamUnavailable(other),
        }
    }
}
