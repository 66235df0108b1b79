//! Profile directory: the external owner of subscription policy.
//!
//! The session core reads one value from it (the device policy) and pushes two
//! best-effort updates to it (profile creation, email sync).

use crate::APP_USER_AGENT;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, time::Duration};
use tokio::sync::Mutex;
use tracing::{Instrument, info_span};
use url::Url;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicePolicy {
    pub device_limit: u32,
    pub subscription_active: bool,
}

impl DevicePolicy {
    /// A lapsed subscription keeps a single device regardless of plan.
    #[must_use]
    pub const fn effective_limit(&self) -> u32 {
        if self.subscription_active {
            self.device_limit
        } else {
            1
        }
    }
}

/// Subscription attributes held per profile.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub plan: String,
    pub device_limit: u32,
    pub course_limit: i32,
    pub channel_access: bool,
    /// `None` never lapses.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Default for Subscription {
    fn default() -> Self {
        Self {
            plan: "free".to_string(),
            device_limit: 1,
            course_limit: 0,
            channel_access: false,
            expires_at: None,
        }
    }
}

/// Partial update of a [`Subscription`]; `None` leaves a field untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_limit: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_access: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl SubscriptionPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl Subscription {
    pub fn apply(&mut self, patch: SubscriptionPatch) {
        if let Some(plan) = patch.plan {
            self.plan = plan;
        }
        if let Some(device_limit) = patch.device_limit {
            self.device_limit = device_limit;
        }
        if let Some(course_limit) = patch.course_limit {
            self.course_limit = course_limit;
        }
        if let Some(channel_access) = patch.channel_access {
            self.channel_access = channel_access;
        }
        if let Some(expires_at) = patch.expires_at {
            self.expires_at = Some(expires_at);
        }
    }

    #[must_use]
    pub fn device_policy(&self, now: DateTime<Utc>) -> DevicePolicy {
        DevicePolicy {
            device_limit: self.device_limit,
            subscription_active: self.expires_at.is_none_or(|expires_at| now < expires_at),
        }
    }
}

#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    async fn create_profile(&self, account_id: Uuid, username: &str, email: &str) -> Result<()>;

    async fn device_policy(&self, account_id: Uuid) -> Result<DevicePolicy>;

    async fn sync_email(&self, account_id: Uuid, email: &str) -> Result<()>;
}

#[derive(Serialize)]
struct CreateProfileRequest<'a> {
    account_id: Uuid,
    username: &'a str,
    email: &'a str,
}

#[derive(Serialize)]
struct SyncEmailRequest<'a> {
    email: &'a str,
}

/// Profile directory reached over HTTP.
#[derive(Clone, Debug)]
pub struct HttpProfileDirectory {
    client: Client,
    base_url: Url,
}

impl HttpProfileDirectory {
    /// # Errors
    /// Returns an error if the base URL is invalid or the client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base_url = Url::parse(base_url)
            .with_context(|| format!("invalid profile service URL: {base_url}"))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("failed to build profile service client")?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("invalid profile endpoint: {path}"))
    }
}

#[async_trait]
impl ProfileDirectory for HttpProfileDirectory {
    async fn create_profile(&self, account_id: Uuid, username: &str, email: &str) -> Result<()> {
        let url = self.endpoint("v1/profiles")?;
        let span = info_span!("profile.create", http.method = "POST", %account_id);
        self.client
            .post(url)
            .json(&CreateProfileRequest {
                account_id,
                username,
                email,
            })
            .send()
            .instrument(span)
            .await
            .context("profile service request failed")?
            .error_for_status()
            .context("profile service rejected profile creation")?;
        Ok(())
    }

    async fn device_policy(&self, account_id: Uuid) -> Result<DevicePolicy> {
        let url = self.endpoint(&format!("v1/profiles/{account_id}/device-policy"))?;
        let span = info_span!("profile.device_policy", http.method = "GET", %account_id);
        let response = self
            .client
            .get(url)
            .send()
            .instrument(span)
            .await
            .context("profile service request failed")?
            .error_for_status()
            .context("profile service rejected device policy lookup")?;
        response
            .json::<DevicePolicy>()
            .await
            .context("invalid device policy response")
    }

    async fn sync_email(&self, account_id: Uuid, email: &str) -> Result<()> {
        let url = self.endpoint(&format!("v1/profiles/{account_id}/email"))?;
        let span = info_span!("profile.sync_email", http.method = "PUT", %account_id);
        self.client
            .put(url)
            .json(&SyncEmailRequest { email })
            .send()
            .instrument(span)
            .await
            .context("profile service request failed")?
            .error_for_status()
            .context("profile service rejected email sync")?;
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Profile {
    pub username: String,
    pub email: String,
    pub subscription: Subscription,
}

/// In-process profile directory for development and tests.
#[derive(Debug, Default)]
pub struct MemoryProfileDirectory {
    default_subscription: Subscription,
    profiles: Mutex<HashMap<Uuid, Profile>>,
}

impl MemoryProfileDirectory {
    /// New profiles start with `default_subscription`.
    #[must_use]
    pub fn new(default_subscription: Subscription) -> Self {
        Self {
            default_subscription,
            profiles: Mutex::default(),
        }
    }

    pub async fn profile(&self, account_id: Uuid) -> Option<Profile> {
        self.profiles.lock().await.get(&account_id).cloned()
    }

    /// Apply a typed patch; `false` when the profile does not exist.
    pub async fn update_subscription(&self, account_id: Uuid, patch: SubscriptionPatch) -> bool {
        let mut profiles = self.profiles.lock().await;
        match profiles.get_mut(&account_id) {
            Some(profile) => {
                profile.subscription.apply(patch);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl ProfileDirectory for MemoryProfileDirectory {
    async fn create_profile(&self, account_id: Uuid, username: &str, email: &str) -> Result<()> {
        self.profiles.lock().await.insert(
            account_id,
            Profile {
                username: username.to_string(),
                email: email.to_string(),
                subscription: self.default_subscription.clone(),
            },
        );
        Ok(())
    }

    async fn device_policy(&self, account_id: Uuid) -> Result<DevicePolicy> {
        self.profiles
            .lock()
            .await
            .get(&account_id)
            .map(|profile| profile.subscription.device_policy(Utc::now()))
            .ok_or_else(|| anyhow!("profile {account_id} not found"))
    }

    async fn sync_email(&self, account_id: Uuid, email: &str) -> Result<()> {
        let mut profiles = self.profiles.lock().await;
        let profile = profiles
            .get_mut(&account_id)
            .ok_or_else(|| anyhow!("profile {account_id} not found"))?;
        profile.email = email.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn lapsed_subscription_collapses_limit() {
        let now = Utc::now();
        let mut subscription = Subscription {
            plan: "premium".to_string(),
            device_limit: 3,
            course_limit: 10,
            channel_access: true,
            expires_at: Some(now + ChronoDuration::days(1)),
        };
        assert_eq!(subscription.device_policy(now).effective_limit(), 3);

        subscription.expires_at = Some(now - ChronoDuration::days(1));
        let policy = subscription.device_policy(now);
        assert!(!policy.subscription_active);
        assert_eq!(policy.effective_limit(), 1);
    }

    #[test]
    fn open_ended_subscription_never_lapses() {
        let subscription = Subscription {
            device_limit: 5,
            ..Subscription::default()
        };
        assert!(subscription.device_policy(Utc::now()).subscription_active);
    }

    #[test]
    fn patch_touches_only_named_fields() {
        let mut subscription = Subscription::default();
        subscription.apply(SubscriptionPatch {
            device_limit: Some(4),
            channel_access: Some(true),
            ..SubscriptionPatch::default()
        });
        assert_eq!(subscription.device_limit, 4);
        assert!(subscription.channel_access);
        assert_eq!(subscription.plan, "free");
        assert_eq!(subscription.course_limit, 0);
        assert_eq!(subscription.expires_at, None);
    }

    #[test]
    fn patch_serializes_only_present_fields() -> Result<()> {
        let patch = SubscriptionPatch {
            plan: Some("premium".to_string()),
            ..SubscriptionPatch::default()
        };
        assert_eq!(serde_json::to_string(&patch)?, r#"{"plan":"premium"}"#);
        assert!(SubscriptionPatch::default().is_empty());
        assert!(!patch.is_empty());

        let parsed: SubscriptionPatch = serde_json::from_str(r#"{"device_limit":2}"#)?;
        assert_eq!(parsed.device_limit, Some(2));
        assert_eq!(parsed.plan, None);
        Ok(())
    }

    #[tokio::test]
    async fn memory_directory_round_trip() -> Result<()> {
        let directory = MemoryProfileDirectory::new(Subscription {
            device_limit: 2,
            ..Subscription::default()
        });
        let account = Uuid::new_v4();
        assert!(directory.device_policy(account).await.is_err());

        directory.create_profile(account, "alice", "a@x.com").await?;
        assert_eq!(directory.device_policy(account).await?.effective_limit(), 2);

        assert!(
            directory
                .update_subscription(
                    account,
                    SubscriptionPatch {
                        device_limit: Some(5),
                        ..SubscriptionPatch::default()
                    }
                )
                .await
        );
        assert_eq!(directory.device_policy(account).await?.device_limit, 5);

        directory.sync_email(account, "b@x.com").await?;
        assert_eq!(
            directory.profile(account).await.map(|profile| profile.email),
            Some("b@x.com".to_string())
        );
        Ok(())
    }

    #[test]
    fn http_directory_joins_endpoints_under_base_path() -> Result<()> {
        let directory =
            HttpProfileDirectory::new("http://profiles.internal/api", Duration::from_secs(5))?;
        assert_eq!(
            directory.endpoint("v1/profiles")?.as_str(),
            "http://profiles.internal/api/v1/profiles"
        );
        Ok(())
    }
}
