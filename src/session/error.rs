//! Error taxonomy returned by the session flows.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Wrong email or password; deliberately does not say which.
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("already exists")]
    AlreadyExists,
    #[error("not found")]
    NotFound,
    #[error("device limit ({limit}) reached for your subscription")]
    DeviceLimitReached { limit: u32 },
    #[error("too many requests")]
    ResourceExhausted { retry_after: Duration },
    #[error("token revoked")]
    Revoked,
    #[error("invalid or expired token")]
    InvalidOrExpiredToken,
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}
