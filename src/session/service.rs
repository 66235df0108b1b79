//! Session flows: register, login, validate, refresh, logout, password reset,
//! email change and device management.
//!
//! The service holds no locks across backend calls; exclusion is left to the
//! backends (atomic take for refresh/single-use tokens, count-and-insert for
//! devices, unique constraints for accounts).

use super::{
    account::{AccountStore, CreateAccountOutcome, EmailUpdate, NewAccount},
    config::SessionConfig,
    credential::{CredentialCodec, CredentialKind, CredentialPair},
    device::{self, Device, DeviceLimitError, DeviceRegistry},
    error::AuthError,
    kv::KeyValueStore,
    notify::{EmailMessage, Mailer},
    password::PasswordHasher,
    profile::ProfileDirectory,
    revocation::{PendingEmailChange, RevocationStore, SingleUseKind},
    utils::{generate_token, normalize_email, valid_device_id, valid_email},
};
use anyhow::anyhow;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Backends the flows run against.
#[derive(Clone)]
pub struct Backends {
    pub kv: Arc<dyn KeyValueStore>,
    pub accounts: Arc<dyn AccountStore>,
    pub devices: Arc<dyn DeviceRegistry>,
    pub profiles: Arc<dyn ProfileDirectory>,
}

#[derive(Clone, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub device_id: String,
    pub device_name: String,
}

/// Readiness of the backing stores.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Readiness {
    pub accounts: bool,
    pub kv: bool,
}

impl Readiness {
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.accounts && self.kv
    }
}

pub struct SessionService {
    config: SessionConfig,
    codec: CredentialCodec,
    revocation: RevocationStore,
    accounts: Arc<dyn AccountStore>,
    devices: Arc<dyn DeviceRegistry>,
    profiles: Arc<dyn ProfileDirectory>,
    hasher: PasswordHasher,
    mailer: Mailer,
}

impl SessionService {
    /// # Errors
    /// Returns an error if the signing secrets are empty or identical.
    pub fn new(
        config: &SessionConfig,
        backends: Backends,
        hasher: PasswordHasher,
        mailer: Mailer,
    ) -> anyhow::Result<Self> {
        let codec = CredentialCodec::new(
            config.access_secret().clone(),
            config.refresh_secret().clone(),
            config.access_ttl(),
            config.refresh_ttl(),
        )?;
        Ok(Self {
            config: config.clone(),
            codec,
            revocation: RevocationStore::new(backends.kv),
            accounts: backends.accounts,
            devices: backends.devices,
            profiles: backends.profiles,
            hasher,
            mailer,
        })
    }

    /// Create an account and return its id.
    ///
    /// # Errors
    /// `InvalidArgument` for malformed input, `AlreadyExists` when the email or
    /// username is taken, `Internal` on backend failure.
    #[instrument(skip_all, fields(username = %username))]
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<Uuid, AuthError> {
        let username = username.trim();
        let email = normalize_email(email);
        if username.is_empty() {
            return Err(AuthError::invalid_argument("username is required"));
        }
        if !valid_email(&email) {
            return Err(AuthError::invalid_argument("invalid email"));
        }
        if password.is_empty() {
            return Err(AuthError::invalid_argument("password is required"));
        }

        let password_hash = self.hasher.hash(password).await?;
        let outcome = self
            .accounts
            .create_account(&NewAccount {
                username: username.to_string(),
                email: email.clone(),
                password_hash,
            })
            .await?;
        let CreateAccountOutcome::Created(account_id) = outcome else {
            return Err(AuthError::AlreadyExists);
        };

        if let Err(err) = self
            .profiles
            .create_profile(account_id, username, &email)
            .await
        {
            error!(%account_id, "Failed to create profile: {err:#}");
        }

        info!(%account_id, "Account registered");
        Ok(account_id)
    }

    /// Authenticate, admit the device and issue a credential pair.
    ///
    /// # Errors
    /// `InvalidCredentials` for an unknown email or wrong password,
    /// `DeviceLimitReached` when no device slot is free, `InvalidArgument` for
    /// malformed input, `Internal` on backend failure.
    #[instrument(skip_all, fields(device_id = %request.device_id))]
    pub async fn login(&self, request: &LoginRequest) -> Result<CredentialPair, AuthError> {
        let email = normalize_email(&request.email);
        if email.is_empty() || request.password.is_empty() {
            return Err(AuthError::invalid_argument("email and password are required"));
        }
        if !valid_device_id(&request.device_id) {
            return Err(AuthError::invalid_argument("invalid device id"));
        }

        let Some(account) = self.accounts.get_by_email(&email).await? else {
            self.hasher.verify_dummy(&request.password).await?;
            debug!("Login for unknown email");
            return Err(AuthError::InvalidCredentials);
        };
        if !self
            .hasher
            .verify(&account.password_hash, &request.password)
            .await?
        {
            debug!(account_id = %account.id, "Login with wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        let policy = self.profiles.device_policy(account.id).await?;
        let limit = policy.effective_limit();
        device::check_device_limit(
            self.devices.as_ref(),
            account.id,
            &request.device_id,
            &request.device_name,
            limit,
        )
        .await
        .map_err(|err| match err {
            DeviceLimitError::LimitReached(limit) => AuthError::DeviceLimitReached { limit },
            DeviceLimitError::Store(err) => AuthError::Internal(err),
        })?;

        self.issue(account.id).await
    }

    /// Account id carried by a valid access credential.
    ///
    /// # Errors
    /// `Unauthenticated` if the credential does not verify.
    pub fn validate(&self, access: &str) -> Result<Uuid, AuthError> {
        let claims = self
            .codec
            .verify(access, CredentialKind::Access)
            .map_err(|err| {
                debug!("Access credential rejected: {err}");
                AuthError::Unauthenticated
            })?;
        Uuid::parse_str(&claims.sub).map_err(|_| AuthError::Unauthenticated)
    }

    /// Rotate a refresh credential.
    ///
    /// The presented credential is consumed atomically, so of several
    /// concurrent refreshes with the same credential at most one succeeds.
    ///
    /// # Errors
    /// `Unauthenticated` if the credential does not verify, `Revoked` if it is
    /// no longer allow-listed, `Internal` on backend failure.
    pub async fn refresh(&self, refresh: &str) -> Result<CredentialPair, AuthError> {
        let claims = self
            .codec
            .verify(refresh, CredentialKind::Refresh)
            .map_err(|err| {
                debug!("Refresh credential rejected: {err}");
                AuthError::Unauthenticated
            })?;

        match self.revocation.consume_refresh(refresh).await? {
            Some(subject) if subject == claims.sub => {}
            Some(_) => {
                warn!(subject = %claims.sub, "Refresh allow-list entry names another subject");
                return Err(AuthError::Revoked);
            }
            None => return Err(AuthError::Revoked),
        }

        let account_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::Unauthenticated)?;
        self.issue(account_id).await
    }

    /// Revoke a refresh credential and optionally forget a device. Never fails.
    pub async fn logout(&self, refresh: &str, device_id: Option<&str>) {
        if let Some(device_id) = device_id.filter(|device_id| !device_id.is_empty())
            && let Ok(claims) = self.codec.verify(refresh, CredentialKind::Refresh)
            && let Ok(account_id) = Uuid::parse_str(&claims.sub)
            && let Err(err) = self.devices.delete(account_id, device_id).await
        {
            warn!(%account_id, device_id, "Failed to remove device on logout: {err:#}");
        }

        if let Err(err) = self.revocation.delete_refresh(refresh).await {
            error!("Failed to revoke refresh credential on logout: {err:#}");
        }
    }

    /// Start a password reset. Always succeeds from the caller's viewpoint;
    /// unknown emails and backend failures are only logged.
    pub async fn forgot_password(&self, email: &str) {
        let email = normalize_email(email);
        let account = match self.accounts.get_by_email(&email).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                debug!("Password reset requested for unknown email");
                return;
            }
            Err(err) => {
                error!("Failed to lookup account for password reset: {err:#}");
                return;
            }
        };

        let token = match generate_token() {
            Ok(token) => token,
            Err(err) => {
                error!("Failed to generate reset token: {err:#}");
                return;
            }
        };
        if let Err(err) = self
            .revocation
            .put_single_use(
                SingleUseKind::PasswordReset,
                &token,
                &account.id.to_string(),
                self.config.single_use_ttl(),
            )
            .await
        {
            error!(account_id = %account.id, "Failed to store reset token: {err:#}");
            return;
        }

        self.mailer.enqueue(EmailMessage::password_reset(
            self.config.frontend_base_url(),
            &account.email,
            &token,
            self.config.single_use_ttl(),
        ));
    }

    /// Consume a reset token and set a new password.
    ///
    /// The token is consumed before the password is written, so it is unusable
    /// afterwards even if the write fails.
    ///
    /// # Errors
    /// `InvalidArgument` for an empty password, `InvalidOrExpiredToken` for an
    /// unknown or used token, `Internal` on backend failure.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), AuthError> {
        if new_password.is_empty() {
            return Err(AuthError::invalid_argument("password is required"));
        }

        let payload = self
            .revocation
            .consume_single_use(SingleUseKind::PasswordReset, token)
            .await?
            .ok_or(AuthError::InvalidOrExpiredToken)?;
        let account_id = Uuid::parse_str(&payload)
            .map_err(|_| anyhow!("reset token payload is not an account id"))?;

        let password_hash = self.hasher.hash(new_password).await?;
        if !self
            .accounts
            .update_password(account_id, &password_hash)
            .await?
        {
            return Err(AuthError::InvalidOrExpiredToken);
        }

        info!(%account_id, "Password reset");
        Ok(())
    }

    /// Send a confirmation link to `new_email`.
    ///
    /// # Errors
    /// `InvalidArgument` for a malformed email, `AlreadyExists` if another
    /// account uses it, `Internal` on backend failure.
    pub async fn request_email_change(
        &self,
        account_id: Uuid,
        new_email: &str,
    ) -> Result<(), AuthError> {
        let new_email = normalize_email(new_email);
        if !valid_email(&new_email) {
            return Err(AuthError::invalid_argument("invalid email"));
        }
        if self.accounts.email_taken(&new_email).await? {
            return Err(AuthError::AlreadyExists);
        }

        let token = generate_token()?;
        let pending = PendingEmailChange {
            account_id,
            new_email,
        };
        self.revocation
            .put_single_use(
                SingleUseKind::EmailChange,
                &token,
                &pending.encode(),
                self.config.single_use_ttl(),
            )
            .await?;

        self.mailer.enqueue(EmailMessage::email_change(
            self.config.frontend_base_url(),
            &pending.new_email,
            &token,
            self.config.single_use_ttl(),
        ));
        Ok(())
    }

    /// Apply a pending email change.
    ///
    /// The profile directory is updated afterwards on a best-effort basis; a
    /// failure there is logged and leaves the two stores out of sync.
    ///
    /// # Errors
    /// `InvalidOrExpiredToken` for an unknown or used token, `AlreadyExists` if
    /// the address was taken in the meantime, `Internal` on backend failure.
    pub async fn confirm_email_change(&self, token: &str) -> Result<(), AuthError> {
        let payload = self
            .revocation
            .consume_single_use(SingleUseKind::EmailChange, token)
            .await?
            .ok_or(AuthError::InvalidOrExpiredToken)?;
        let pending = PendingEmailChange::decode(&payload)
            .ok_or_else(|| anyhow!("malformed email change payload"))?;

        match self
            .accounts
            .update_email(pending.account_id, &pending.new_email)
            .await?
        {
            EmailUpdate::Updated => {}
            EmailUpdate::Conflict => return Err(AuthError::AlreadyExists),
            EmailUpdate::NotFound => return Err(AuthError::InvalidOrExpiredToken),
        }

        if let Err(err) = self
            .profiles
            .sync_email(pending.account_id, &pending.new_email)
            .await
        {
            warn!(account_id = %pending.account_id, "Profile email out of sync: {err:#}");
        }

        info!(account_id = %pending.account_id, "Email changed");
        Ok(())
    }

    /// # Errors
    /// `Internal` on backend failure.
    pub async fn list_devices(&self, account_id: Uuid) -> Result<Vec<Device>, AuthError> {
        Ok(self.devices.list(account_id).await?)
    }

    /// Forget a device. Removing an unknown device succeeds.
    ///
    /// # Errors
    /// `Internal` on backend failure.
    pub async fn remove_device(&self, account_id: Uuid, device_id: &str) -> Result<(), AuthError> {
        Ok(self.devices.delete(account_id, device_id).await?)
    }

    pub async fn readiness(&self) -> Readiness {
        let (accounts, kv) = tokio::join!(self.accounts.ping(), self.revocation.ping());
        if let Err(err) = &accounts {
            error!("Account store is unhealthy: {err:#}");
        }
        if let Err(err) = &kv {
            error!("Key-value store is unhealthy: {err:#}");
        }
        Readiness {
            accounts: accounts.is_ok(),
            kv: kv.is_ok(),
        }
    }

    async fn issue(&self, account_id: Uuid) -> Result<CredentialPair, AuthError> {
        let subject = account_id.to_string();
        let pair = self
            .codec
            .issue(&subject)
            .map_err(|err| anyhow!("failed to issue credentials: {err}"))?;
        self.revocation
            .put_refresh(&pair.refresh, &subject, pair.refresh_ttl)
            .await?;
        Ok(pair)
    }
}
