//! Credential lifecycle endpoints.

use super::{
    ApiState,
    types::{
        AccountResponse, ConfirmEmailChangeRequest, EmailChangeRequest, ForgotPasswordRequest,
        LoginRequest, LogoutRequest, RefreshRequest, RegisterRequest, ResetPasswordRequest,
        TokenResponse, ValidateRequest,
    },
};
use crate::session::{self, AuthError, rate_limit::RateLimitAction};
use axum::{
    Json,
    extract::{ConnectInfo, Extension},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::{net::SocketAddr, sync::Arc};

fn require<T>(payload: Option<Json<T>>) -> Result<T, AuthError> {
    payload
        .map(|Json(payload)| payload)
        .ok_or_else(|| AuthError::invalid_argument("missing payload"))
}

#[utoipa::path(
    post,
    path = "/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = AccountResponse),
        (status = 400, description = "Invalid input", body = String),
        (status = 409, description = "Email or username already registered", body = String)
    ),
    tag = "auth"
)]
pub async fn register(
    state: Extension<Arc<ApiState>>,
    payload: Option<Json<RegisterRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let request = require(payload)?;
    let account_id = state
        .sessions
        .register(&request.username, &request.email, &request.password)
        .await?;
    Ok((StatusCode::CREATED, Json(AccountResponse { account_id })))
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Credentials issued", body = TokenResponse),
        (status = 400, description = "Invalid input", body = String),
        (status = 401, description = "Invalid credentials", body = String),
        (status = 403, description = "Device limit reached", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    state: Extension<Arc<ApiState>>,
    payload: Option<Json<LoginRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    // Throttle before any password work.
    state
        .throttle(RateLimitAction::Login, &headers, peer)
        .await?;
    let request = require(payload)?;
    let pair = state
        .sessions
        .login(&session::LoginRequest {
            email: request.email,
            password: request.password,
            device_id: request.device_id,
            device_name: request.device_name,
        })
        .await?;
    Ok(Json(TokenResponse::new(pair, state.config.access_ttl())))
}

#[utoipa::path(
    post,
    path = "/v1/auth/validate",
    request_body = ValidateRequest,
    responses(
        (status = 200, description = "Credential is valid", body = AccountResponse),
        (status = 401, description = "Invalid or expired credential", body = String)
    ),
    tag = "auth"
)]
pub async fn validate(
    state: Extension<Arc<ApiState>>,
    payload: Option<Json<ValidateRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let request = require(payload)?;
    let account_id = state.sessions.validate(request.access_token.trim())?;
    Ok(Json(AccountResponse { account_id }))
}

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Credentials rotated", body = TokenResponse),
        (status = 401, description = "Invalid, expired or revoked credential", body = String)
    ),
    tag = "auth"
)]
pub async fn refresh(
    state: Extension<Arc<ApiState>>,
    payload: Option<Json<RefreshRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let request = require(payload)?;
    let pair = state.sessions.refresh(request.refresh_token.trim()).await?;
    Ok(Json(TokenResponse::new(pair, state.config.access_ttl())))
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    request_body = LogoutRequest,
    responses(
        (status = 204, description = "Logged out")
    ),
    tag = "auth"
)]
pub async fn logout(
    state: Extension<Arc<ApiState>>,
    payload: Option<Json<LogoutRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let request = require(payload)?;
    state
        .sessions
        .logout(request.refresh_token.trim(), request.device_id.as_deref())
        .await;
    Ok(StatusCode::NO_CONTENT)
}

/// Always answers 204 so callers cannot probe which emails are registered.
#[utoipa::path(
    post,
    path = "/v1/auth/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 204, description = "Reset link sent if the account exists"),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn forgot_password(
    headers: HeaderMap,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    state: Extension<Arc<ApiState>>,
    payload: Option<Json<ForgotPasswordRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    state
        .throttle(RateLimitAction::ForgotPassword, &headers, peer)
        .await?;
    let request = require(payload)?;
    state.sessions.forgot_password(&request.email).await;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/auth/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 204, description = "Password updated"),
        (status = 400, description = "Invalid or expired token", body = String)
    ),
    tag = "auth"
)]
pub async fn reset_password(
    state: Extension<Arc<ApiState>>,
    payload: Option<Json<ResetPasswordRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let request = require(payload)?;
    state
        .sessions
        .reset_password(request.token.trim(), &request.new_password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/auth/email-change",
    request_body = EmailChangeRequest,
    params(
        ("Authorization" = String, Header, description = "Bearer access credential")
    ),
    responses(
        (status = 202, description = "Confirmation link sent to the new address"),
        (status = 400, description = "Invalid email", body = String),
        (status = 401, description = "Missing or invalid credential", body = String),
        (status = 409, description = "Email already in use", body = String)
    ),
    tag = "auth"
)]
pub async fn request_email_change(
    headers: HeaderMap,
    state: Extension<Arc<ApiState>>,
    payload: Option<Json<EmailChangeRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let account_id = state.authenticate(&headers)?;
    let request = require(payload)?;
    state
        .sessions
        .request_email_change(account_id, &request.new_email)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

#[utoipa::path(
    post,
    path = "/v1/auth/email-change/confirm",
    request_body = ConfirmEmailChangeRequest,
    responses(
        (status = 204, description = "Email changed"),
        (status = 400, description = "Invalid or expired token", body = String),
        (status = 409, description = "Email already in use", body = String)
    ),
    tag = "auth"
)]
pub async fn confirm_email_change(
    state: Extension<Arc<ApiState>>,
    payload: Option<Json<ConfirmEmailChangeRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let request = require(payload)?;
    state
        .sessions
        .confirm_email_change(request.token.trim())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
