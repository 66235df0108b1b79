//! Fixed-window rate limiting keyed by operation class and client address.
//!
//! Counters live in the shared key-value backend under
//! `ratelimit:<class>:<address>`. The window starts with the first request and
//! is never extended by later ones; bursts across a window boundary are
//! possible.
//!
//! Backend errors fail open: the request is allowed and a warning is logged.

use super::kv::KeyValueStore;
use std::{sync::Arc, time::Duration};
use tracing::warn;

const KEY_PREFIX: &str = "ratelimit";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateLimitAction {
    Login,
    ForgotPassword,
}

impl RateLimitAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::ForgotPassword => "forgot_password",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub limit: u64,
    pub window: Duration,
}

impl RateLimitPolicy {
    #[must_use]
    pub const fn new(limit: u64, window: Duration) -> Self {
        Self { limit, window }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited { retry_after: Duration },
}

impl RateLimitDecision {
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    kv: Arc<dyn KeyValueStore>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Count one request for (`class`, `address`) and decide whether it fits
    /// in the current window.
    pub async fn allow(
        &self,
        class: &str,
        address: &str,
        policy: RateLimitPolicy,
    ) -> RateLimitDecision {
        let key = format!("{KEY_PREFIX}:{class}:{address}");
        match self.kv.increment(&key, policy.window).await {
            Ok(window) if window.count > policy.limit => RateLimitDecision::Limited {
                retry_after: window.ttl,
            },
            Ok(_) => RateLimitDecision::Allowed,
            Err(err) => {
                warn!(class, address, "Rate limiter store error, allowing request: {err:#}");
                RateLimitDecision::Allowed
            }
        }
    }

    pub async fn check(
        &self,
        action: RateLimitAction,
        address: &str,
        policy: RateLimitPolicy,
    ) -> RateLimitDecision {
        self.allow(action.as_str(), address, policy).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::kv::{MemoryKeyValueStore, WindowCount};
    use anyhow::{Result, bail};
    use async_trait::async_trait;

    fn limiter() -> RateLimiter {
        RateLimiter::new(Arc::new(MemoryKeyValueStore::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn denies_after_limit_until_window_rolls_over() {
        let limiter = limiter();
        let policy = RateLimitPolicy::new(5, Duration::from_secs(60));

        for _ in 0..5 {
            assert!(limiter.check(RateLimitAction::Login, "10.0.0.1", policy).await.is_allowed());
        }
        tokio::time::advance(Duration::from_secs(15)).await;
        assert_eq!(
            limiter.check(RateLimitAction::Login, "10.0.0.1", policy).await,
            RateLimitDecision::Limited {
                retry_after: Duration::from_secs(45)
            }
        );

        tokio::time::advance(Duration::from_secs(45)).await;
        assert!(limiter.check(RateLimitAction::Login, "10.0.0.1", policy).await.is_allowed());
    }

    #[tokio::test]
    async fn keys_are_scoped_by_class_and_address() {
        let limiter = limiter();
        let policy = RateLimitPolicy::new(1, Duration::from_secs(300));

        assert!(limiter.check(RateLimitAction::ForgotPassword, "a", policy).await.is_allowed());
        assert!(!limiter.check(RateLimitAction::ForgotPassword, "a", policy).await.is_allowed());
        assert!(limiter.check(RateLimitAction::ForgotPassword, "b", policy).await.is_allowed());
        assert!(limiter.check(RateLimitAction::Login, "a", policy).await.is_allowed());
    }

    #[tokio::test]
    async fn concurrent_requests_never_exceed_limit() -> Result<()> {
        let limiter = limiter();
        let policy = RateLimitPolicy::new(5, Duration::from_secs(60));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.check(RateLimitAction::Login, "10.0.0.9", policy).await
            }));
        }
        let mut allowed = 0;
        for handle in handles {
            if handle.await?.is_allowed() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 5);
        Ok(())
    }

    struct BrokenStore;

    #[async_trait]
    impl KeyValueStore for BrokenStore {
        async fn set_with_ttl(&self, _: &str, _: &str, _: Duration) -> Result<()> {
            bail!("down")
        }
        async fn get(&self, _: &str) -> Result<Option<String>> {
            bail!("down")
        }
        async fn take(&self, _: &str) -> Result<Option<String>> {
            bail!("down")
        }
        async fn delete(&self, _: &str) -> Result<()> {
            bail!("down")
        }
        async fn increment(&self, _: &str, _: Duration) -> Result<WindowCount> {
            bail!("down")
        }
        async fn ping(&self) -> Result<()> {
            bail!("down")
        }
    }

    #[tokio::test]
    async fn store_errors_fail_open() {
        let limiter = RateLimiter::new(Arc::new(BrokenStore));
        let policy = RateLimitPolicy::new(0, Duration::from_secs(60));
        assert!(limiter.check(RateLimitAction::Login, "a", policy).await.is_allowed());
    }
}
