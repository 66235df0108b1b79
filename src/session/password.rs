//! Argon2id password hashing.
//!
//! Hashing and verification are CPU-bound, so both run on the blocking pool.

use anyhow::{Context, Result, anyhow};
use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher as _, PasswordVerifier, Version,
    password_hash::{SaltString, rand_core::OsRng},
};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::warn;

const DUMMY_PASSWORD: &str = "tessera-dummy-password";

#[derive(Clone)]
pub struct PasswordHasher {
    argon2: Argon2<'static>,
    // Hash with this hasher's own cost, verified when there is no account.
    dummy: Arc<OnceCell<String>>,
}

impl std::fmt::Debug for PasswordHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordHasher").finish_non_exhaustive()
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self {
            argon2: Argon2::default(),
            dummy: Arc::default(),
        }
    }
}

impl PasswordHasher {
    /// Hasher with explicit cost parameters (memory in KiB, iterations, lanes).
    ///
    /// # Errors
    /// Returns an error if the parameters are out of range.
    pub fn with_params(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|err| anyhow!("invalid argon2 parameters: {err}"))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
            dummy: Arc::default(),
        })
    }

    /// Produce a PHC-formatted hash.
    ///
    /// # Errors
    /// Returns an error if hashing fails or the blocking task is cancelled.
    pub async fn hash(&self, password: &str) -> Result<String> {
        let argon2 = self.argon2.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            argon2
                .hash_password(password.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|err| anyhow!("failed to hash password: {err}"))
        })
        .await
        .context("password hashing task failed")?
    }

    /// Check `password` against a stored PHC hash. A malformed stored hash
    /// counts as a mismatch.
    ///
    /// # Errors
    /// Returns an error if the blocking task is cancelled.
    pub async fn verify(&self, stored_hash: &str, password: &str) -> Result<bool> {
        let argon2 = self.argon2.clone();
        let stored_hash = stored_hash.to_string();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || match PasswordHash::new(&stored_hash) {
            Ok(parsed) => argon2.verify_password(password.as_bytes(), &parsed).is_ok(),
            Err(err) => {
                warn!("Stored password hash is malformed: {err}");
                false
            }
        })
        .await
        .context("password verification task failed")
    }

    /// Spend one verification on a throwaway hash, so a lookup miss costs as
    /// much as a wrong password. Always a mismatch.
    ///
    /// # Errors
    /// Returns an error if the throwaway hash cannot be built or the blocking
    /// task is cancelled.
    pub async fn verify_dummy(&self, password: &str) -> Result<bool> {
        let dummy = self
            .dummy
            .get_or_try_init(|| self.hash(DUMMY_PASSWORD))
            .await?;
        self.verify(dummy, password).await?;
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> Result<PasswordHasher> {
        PasswordHasher::with_params(1024, 1, 1)
    }

    #[tokio::test]
    async fn hash_then_verify() -> Result<()> {
        let hasher = fast()?;
        let hash = hasher.hash("secret1").await?;
        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify(&hash, "secret1").await?);
        assert!(!hasher.verify(&hash, "secret2").await?);
        Ok(())
    }

    #[tokio::test]
    async fn salts_differ() -> Result<()> {
        let hasher = fast()?;
        assert_ne!(hasher.hash("same").await?, hasher.hash("same").await?);
        Ok(())
    }

    #[tokio::test]
    async fn malformed_hash_is_a_mismatch() -> Result<()> {
        let hasher = fast()?;
        assert!(!hasher.verify("not-a-phc-string", "secret").await?);
        Ok(())
    }

    #[tokio::test]
    async fn dummy_verification_never_matches() -> Result<()> {
        let hasher = fast()?;
        assert!(!hasher.verify_dummy("secret").await?);
        assert!(!hasher.verify_dummy(DUMMY_PASSWORD).await?);

        let first = hasher.dummy.get().cloned();
        hasher.clone().verify_dummy("other").await?;
        assert!(first.is_some());
        assert_eq!(hasher.dummy.get().cloned(), first);
        Ok(())
    }

    #[test]
    fn rejects_bad_params() {
        assert!(PasswordHasher::with_params(1, 0, 0).is_err());
    }
}
