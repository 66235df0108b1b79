//! Request/response types for the HTTP surface.

use crate::session::CredentialPair;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AccountResponse {
    pub account_id: Uuid,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub device_id: String,
    #[serde(default)]
    pub device_name: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access credential lifetime in seconds.
    pub expires_in: u64,
}

impl TokenResponse {
    pub(crate) fn new(pair: CredentialPair, access_ttl: Duration) -> Self {
        Self {
            access_token: pair.access,
            refresh_token: pair.refresh,
            token_type: "Bearer".to_string(),
            expires_in: access_ttl.as_secs(),
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ValidateRequest {
    pub access_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LogoutRequest {
    pub refresh_token: String,
    #[serde(default)]
    pub device_id: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct EmailChangeRequest {
    pub new_email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ConfirmEmailChangeRequest {
    pub token: String,
}
