//! Registered device listing and removal for the authenticated account.

use super::ApiState;
use crate::session::{AuthError, device::Device, utils::valid_device_id};
use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;

#[utoipa::path(
    get,
    path = "/v1/devices",
    params(
        ("Authorization" = String, Header, description = "Bearer access credential")
    ),
    responses(
        (status = 200, description = "Devices, most recently active first", body = [Device]),
        (status = 401, description = "Missing or invalid credential", body = String)
    ),
    tag = "devices"
)]
pub async fn list_devices(
    headers: HeaderMap,
    state: Extension<Arc<ApiState>>,
) -> Result<impl IntoResponse, AuthError> {
    let account_id = state.authenticate(&headers)?;
    let devices = state.sessions.list_devices(account_id).await?;
    Ok(Json(devices))
}

#[utoipa::path(
    delete,
    path = "/v1/devices/{device_id}",
    params(
        ("device_id" = String, Path, description = "Client-supplied device identifier"),
        ("Authorization" = String, Header, description = "Bearer access credential")
    ),
    responses(
        (status = 204, description = "Device removed"),
        (status = 400, description = "Invalid device id", body = String),
        (status = 401, description = "Missing or invalid credential", body = String)
    ),
    tag = "devices"
)]
pub async fn remove_device(
    headers: HeaderMap,
    Path(device_id): Path<String>,
    state: Extension<Arc<ApiState>>,
) -> Result<impl IntoResponse, AuthError> {
    let account_id = state.authenticate(&headers)?;
    if !valid_device_id(&device_id) {
        return Err(AuthError::invalid_argument("invalid device id"));
    }
    state.sessions.remove_device(account_id, &device_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
