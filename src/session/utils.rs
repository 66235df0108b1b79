//! Small helpers for input normalization and opaque token handling.

use anyhow::{Context, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{RngCore, rngs::OsRng};
use regex::Regex;
use sha2::{Digest, Sha256};

/// Upper bound for client-supplied device identifiers.
pub const MAX_DEVICE_ID_LEN: usize = 64;

/// Normalize an email for lookup/uniqueness checks.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Device identifiers are opaque but bounded and non-blank.
#[must_use]
pub fn valid_device_id(device_id: &str) -> bool {
    !device_id.trim().is_empty() && device_id.len() <= MAX_DEVICE_ID_LEN
}

/// Create a new single-use token for emailed links.
///
/// # Errors
/// Returns an error if the OS random source fails.
pub fn generate_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate single-use token")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// Digest a token so raw values never rest in the key-value store.
#[must_use]
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    Base64UrlUnpadded::encode_string(&digest)
}
