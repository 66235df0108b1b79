//! Session configuration, built once at startup and passed to constructors.

use super::rate_limit::{RateLimitAction, RateLimitPolicy};
use secrecy::SecretString;
use std::time::Duration;

pub const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const DEFAULT_SINGLE_USE_TTL: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_LOGIN_LIMIT: RateLimitPolicy = RateLimitPolicy::new(5, Duration::from_secs(60));
pub const DEFAULT_FORGOT_PASSWORD_LIMIT: RateLimitPolicy =
    RateLimitPolicy::new(1, Duration::from_secs(5 * 60));
pub const DEFAULT_MAIL_QUEUE_CAPACITY: usize = 256;

#[derive(Clone, Debug)]
pub struct SessionConfig {
    access_secret: SecretString,
    refresh_secret: SecretString,
    frontend_base_url: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    single_use_ttl: Duration,
    login_limit: RateLimitPolicy,
    forgot_password_limit: RateLimitPolicy,
    mail_queue_capacity: usize,
}

impl SessionConfig {
    #[must_use]
    pub fn new(
        access_secret: SecretString,
        refresh_secret: SecretString,
        frontend_base_url: String,
    ) -> Self {
        Self {
            access_secret,
            refresh_secret,
            frontend_base_url,
            access_ttl: DEFAULT_ACCESS_TTL,
            refresh_ttl: DEFAULT_REFRESH_TTL,
            single_use_ttl: DEFAULT_SINGLE_USE_TTL,
            login_limit: DEFAULT_LOGIN_LIMIT,
            forgot_password_limit: DEFAULT_FORGOT_PASSWORD_LIMIT,
            mail_queue_capacity: DEFAULT_MAIL_QUEUE_CAPACITY,
        }
    }

    #[must_use]
    pub fn with_access_ttl(mut self, ttl: Duration) -> Self {
        self.access_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_single_use_ttl(mut self, ttl: Duration) -> Self {
        self.single_use_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_rate_limit(mut self, action: RateLimitAction, policy: RateLimitPolicy) -> Self {
        match action {
            RateLimitAction::Login => self.login_limit = policy,
            RateLimitAction::ForgotPassword => self.forgot_password_limit = policy,
        }
        self
    }

    #[must_use]
    pub fn with_mail_queue_capacity(mut self, capacity: usize) -> Self {
        self.mail_queue_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn access_secret(&self) -> &SecretString {
        &self.access_secret
    }

    #[must_use]
    pub fn refresh_secret(&self) -> &SecretString {
        &self.refresh_secret
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    #[must_use]
    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    #[must_use]
    pub fn single_use_ttl(&self) -> Duration {
        self.single_use_ttl
    }

    #[must_use]
    pub fn rate_limit(&self, action: RateLimitAction) -> RateLimitPolicy {
        match action {
            RateLimitAction::Login => self.login_limit,
            RateLimitAction::ForgotPassword => self.forgot_password_limit,
        }
    }

    #[must_use]
    pub fn mail_queue_capacity(&self) -> usize {
        self.mail_queue_capacity
    }
}
