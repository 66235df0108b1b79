#![allow(dead_code)]

use anyhow::{Result, bail};
use async_trait::async_trait;
use secrecy::SecretString;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tessera::session::{
    Backends, SessionConfig, SessionService,
    account::MemoryAccountStore,
    device::MemoryDeviceRegistry,
    kv::{KeyValueStore, MemoryKeyValueStore, WindowCount},
    notify::{EmailMessage, EmailSender, MailerHandle, spawn_mailer},
    password::PasswordHasher,
    profile::{
        DevicePolicy, MemoryProfileDirectory, ProfileDirectory, Subscription, SubscriptionPatch,
    },
};
use tokio::sync::Mutex;
use uuid::Uuid;

pub const FRONTEND: &str = "https://app.tessera.test";

#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<EmailMessage>>,
}

impl RecordingSender {
    pub async fn sent_to(&self, to_email: &str) -> Vec<EmailMessage> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|message| message.to_email == to_email)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EmailSender for RecordingSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        self.sent.lock().await.push(message.clone());
        Ok(())
    }
}

/// Profile directory whose email sync always fails.
pub struct UnsyncedProfiles {
    pub inner: MemoryProfileDirectory,
}

#[async_trait]
impl ProfileDirectory for UnsyncedProfiles {
    async fn create_profile(&self, account_id: Uuid, username: &str, email: &str) -> Result<()> {
        self.inner.create_profile(account_id, username, email).await
    }

    async fn device_policy(&self, account_id: Uuid) -> Result<DevicePolicy> {
        self.inner.device_policy(account_id).await
    }

    async fn sync_email(&self, _account_id: Uuid, _email: &str) -> Result<()> {
        bail!("profile service unavailable")
    }
}

/// Memory key-value store that can be switched into an outage.
#[derive(Default)]
pub struct SwitchableStore {
    pub inner: MemoryKeyValueStore,
    down: AtomicBool,
}

impl SwitchableStore {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            bail!("key-value store unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for SwitchableStore {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.check()?;
        self.inner.set_with_ttl(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn take(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        self.inner.take(key).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount> {
        self.check()?;
        self.inner.increment(key, window).await
    }

    async fn ping(&self) -> Result<()> {
        self.check()?;
        self.inner.ping().await
    }
}

pub struct Harness {
    pub service: SessionService,
    pub config: SessionConfig,
    pub kv: Arc<SwitchableStore>,
    pub accounts: Arc<MemoryAccountStore>,
    pub profiles: Arc<MemoryProfileDirectory>,
    pub outbox: Arc<RecordingSender>,
    pub mailer: MailerHandle,
}

pub fn config() -> SessionConfig {
    SessionConfig::new(
        SecretString::from("access-signing-key"),
        SecretString::from("refresh-signing-key"),
        FRONTEND.to_string(),
    )
}

pub fn subscription(device_limit: u32) -> Subscription {
    Subscription {
        plan: "premium".to_string(),
        device_limit,
        ..Subscription::default()
    }
}

/// Cheap argon2 parameters so tests stay fast.
pub fn hasher() -> PasswordHasher {
    PasswordHasher::with_params(1024, 1, 1).expect("valid argon2 params")
}

impl Harness {
    pub fn new(device_limit: u32) -> Self {
        Self::with_config(config(), device_limit)
    }

    pub fn with_config(config: SessionConfig, device_limit: u32) -> Self {
        let profiles = Arc::new(MemoryProfileDirectory::new(subscription(device_limit)));
        Self::build(config, profiles.clone(), profiles)
    }

    pub fn with_profiles(profiles: Arc<dyn ProfileDirectory>) -> Self {
        let unused = Arc::new(MemoryProfileDirectory::new(subscription(1)));
        Self::build(config(), unused, profiles)
    }

    fn build(
        config: SessionConfig,
        profiles: Arc<MemoryProfileDirectory>,
        directory: Arc<dyn ProfileDirectory>,
    ) -> Self {
        let kv = Arc::new(SwitchableStore::default());
        let accounts = Arc::new(MemoryAccountStore::new());
        let outbox = Arc::new(RecordingSender::default());
        let (mailer, handle) = spawn_mailer(outbox.clone(), 16);
        let service = SessionService::new(
            &config,
            Backends {
                kv: kv.clone(),
                accounts: accounts.clone(),
                devices: Arc::new(MemoryDeviceRegistry::new()),
                profiles: directory,
            },
            hasher(),
            mailer,
        )
        .expect("valid session config");

        Self {
            service,
            config,
            kv,
            accounts,
            profiles,
            outbox,
            mailer: handle,
        }
    }

    pub async fn set_subscription(&self, account_id: Uuid, patch: SubscriptionPatch) {
        assert!(self.profiles.update_subscription(account_id, patch).await);
    }

    /// Wait for the notification worker to deliver a message to `to_email`
    /// and return the token from its link.
    pub async fn token_sent_to(&self, to_email: &str) -> String {
        for _ in 0..200 {
            if let Some(message) = self.outbox.sent_to(to_email).await.pop() {
                return token_from(&message);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no message delivered to {to_email}");
    }
}

pub fn token_from(message: &EmailMessage) -> String {
    let (_, rest) = message
        .text_body
        .split_once("token=")
        .expect("message carries a token link");
    rest.split_whitespace()
        .next()
        .expect("token after token=")
        .to_string()
}
