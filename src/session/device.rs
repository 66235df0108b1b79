//! Per-account device registry and the login-time device limit check.
//!
//! Counting and inserting a new device happen as one unit in every backend
//! (`create_within_limit`), so two concurrent logins from new devices cannot
//! both take the last free slot.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Device {
    pub account_id: Uuid,
    pub device_id: String,
    pub device_name: String,
    pub last_active_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Device {
    #[must_use]
    pub fn new(account_id: Uuid, device_id: &str, device_name: &str) -> Self {
        let now = Utc::now();
        Self {
            account_id,
            device_id: device_id.to_string(),
            device_name: device_name.to_string(),
            last_active_at: now,
            created_at: now,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// The (account, device) pair already exists.
    Duplicate,
    LimitReached,
}

#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn find(&self, account_id: Uuid, device_id: &str) -> Result<Option<Device>>;

    async fn count(&self, account_id: Uuid) -> Result<u64>;

    /// Insert without a limit; `false` when the pair already exists.
    async fn create(&self, device: &Device) -> Result<bool>;

    /// Count and insert as one unit, refusing once `limit` devices exist.
    async fn create_within_limit(&self, device: &Device, limit: u32) -> Result<CreateOutcome>;

    /// Refresh `last_active_at`.
    async fn touch(&self, account_id: Uuid, device_id: &str) -> Result<()>;

    /// Devices ordered by `last_active_at`, most recent first.
    async fn list(&self, account_id: Uuid) -> Result<Vec<Device>>;

    async fn delete(&self, account_id: Uuid, device_id: &str) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// Re-login from a registered device; no slot consumed.
    Known,
    /// A new device took a free slot.
    Registered,
}

#[derive(Debug, Error)]
pub enum DeviceLimitError {
    #[error("device limit ({0}) reached")]
    LimitReached(u32),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Admit `device_id` for `account_id` under `limit`.
///
/// Known devices are touched and always admitted. New devices are admitted
/// only while the account holds fewer than `limit` devices.
///
/// # Errors
/// Returns [`DeviceLimitError::LimitReached`] when no slot is free, or the
/// registry error.
pub async fn check_device_limit(
    registry: &dyn DeviceRegistry,
    account_id: Uuid,
    device_id: &str,
    device_name: &str,
    limit: u32,
) -> Result<Admission, DeviceLimitError> {
    if registry.find(account_id, device_id).await?.is_some() {
        registry.touch(account_id, device_id).await?;
        return Ok(Admission::Known);
    }

    let device = Device::new(account_id, device_id, device_name);
    match registry.create_within_limit(&device, limit).await? {
        CreateOutcome::Created => Ok(Admission::Registered),
        CreateOutcome::Duplicate => {
            // A concurrent login from the same device registered it first.
            debug!("device {device_id} registered concurrently; treating as known");
            registry.touch(account_id, device_id).await?;
            Ok(Admission::Known)
        }
        CreateOutcome::LimitReached => Err(DeviceLimitError::LimitReached(limit)),
    }
}

#[derive(Debug, Default)]
pub struct MemoryDeviceRegistry {
    devices: Mutex<HashMap<Uuid, Vec<Device>>>,
}

impl MemoryDeviceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceRegistry for MemoryDeviceRegistry {
    async fn find(&self, account_id: Uuid, device_id: &str) -> Result<Option<Device>> {
        let devices = self.devices.lock().await;
        Ok(devices
            .get(&account_id)
            .and_then(|list| list.iter().find(|device| device.device_id == device_id))
            .cloned())
    }

    async fn count(&self, account_id: Uuid) -> Result<u64> {
        let devices = self.devices.lock().await;
        Ok(devices
            .get(&account_id)
            .map_or(0, |list| list.len() as u64))
    }

    async fn create(&self, device: &Device) -> Result<bool> {
        let mut devices = self.devices.lock().await;
        let list = devices.entry(device.account_id).or_default();
        if list.iter().any(|existing| existing.device_id == device.device_id) {
            return Ok(false);
        }
        list.push(device.clone());
        Ok(true)
    }

    async fn create_within_limit(&self, device: &Device, limit: u32) -> Result<CreateOutcome> {
        let mut devices = self.devices.lock().await;
        let list = devices.entry(device.account_id).or_default();
        if list.iter().any(|existing| existing.device_id == device.device_id) {
            return Ok(CreateOutcome::Duplicate);
        }
        if list.len() as u64 >= u64::from(limit) {
            return Ok(CreateOutcome::LimitReached);
        }
        list.push(device.clone());
        Ok(CreateOutcome::Created)
    }

    async fn touch(&self, account_id: Uuid, device_id: &str) -> Result<()> {
        let mut devices = self.devices.lock().await;
        if let Some(device) = devices
            .get_mut(&account_id)
            .and_then(|list| list.iter_mut().find(|device| device.device_id == device_id))
        {
            device.last_active_at = Utc::now();
        }
        Ok(())
    }

    async fn list(&self, account_id: Uuid) -> Result<Vec<Device>> {
        let devices = self.devices.lock().await;
        let mut list = devices.get(&account_id).cloned().unwrap_or_default();
        list.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));
        Ok(list)
    }

    async fn delete(&self, account_id: Uuid, device_id: &str) -> Result<()> {
        let mut devices = self.devices.lock().await;
        if let Some(list) = devices.get_mut(&account_id) {
            list.retain(|device| device.device_id != device_id);
        }
        Ok(())
    }
}
