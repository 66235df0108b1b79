//! HTTP handlers and the helpers they share: request authentication, client
//! address resolution, throttling and error mapping.

pub mod auth;
pub mod devices;
pub mod health;
pub mod types;

use crate::session::{
    AuthError, SessionConfig, SessionService,
    rate_limit::{RateLimitAction, RateLimitDecision, RateLimiter},
};
use axum::{
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{AUTHORIZATION, RETRY_AFTER},
    },
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use tracing::error;
use uuid::Uuid;

/// Everything handlers need, shared behind an `Arc` extension.
pub struct ApiState {
    pub sessions: SessionService,
    pub limiter: RateLimiter,
    pub config: SessionConfig,
    /// Use `X-Forwarded-For` / `X-Real-IP` for the client address.
    pub trust_forwarded_for: bool,
}

impl ApiState {
    /// Resolve the bearer access credential to an account id.
    ///
    /// # Errors
    /// `Unauthenticated` if the header is missing or the credential is invalid.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Uuid, AuthError> {
        let token = extract_bearer_token(headers).ok_or(AuthError::Unauthenticated)?;
        self.sessions.validate(&token)
    }

    /// Count one request against the action's window for this client.
    ///
    /// # Errors
    /// `ResourceExhausted` when the window is used up.
    pub async fn throttle(
        &self,
        action: RateLimitAction,
        headers: &HeaderMap,
        peer: SocketAddr,
    ) -> Result<(), AuthError> {
        let address = self
            .trust_forwarded_for
            .then(|| extract_client_ip(headers))
            .flatten()
            .unwrap_or_else(|| peer.ip().to_string());
        match self
            .limiter
            .check(action, &address, self.config.rate_limit(action))
            .await
        {
            RateLimitDecision::Allowed => Ok(()),
            RateLimitDecision::Limited { retry_after } => {
                Err(AuthError::ResourceExhausted { retry_after })
            }
        }
    }
}

pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Extract a client IP for rate limiting from common proxy headers.
pub(crate) fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidArgument(_) | Self::InvalidOrExpiredToken => StatusCode::BAD_REQUEST,
            Self::InvalidCredentials | Self::Unauthenticated | Self::Revoked => {
                StatusCode::UNAUTHORIZED
            }
            Self::DeviceLimitReached { .. } => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::AlreadyExists => StatusCode::CONFLICT,
            Self::ResourceExhausted { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(err) => {
                error!("Request failed: {err:#}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let mut response = (status, self.to_string()).into_response();
        if let Self::ResourceExhausted { retry_after } = self {
            let seconds = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            if let Ok(value) = HeaderValue::from_str(&seconds.max(1).to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}
