//! Signed access and refresh credentials.
//!
//! Credentials are compact HS256 JWTs. Access and refresh credentials are signed
//! with two distinct keys and carry a `typ` claim, so one kind never verifies as
//! the other. Each credential carries a fresh `jti`, so two credentials issued
//! for the same subject in the same second still differ.

use chrono::Utc;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use ulid::Ulid;

const ALG: Algorithm = Algorithm::HS256;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialClaims {
    pub sub: String,
    pub typ: CredentialKind,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

impl CredentialClaims {
    /// Seconds left before expiry, zero once expired.
    #[must_use]
    pub fn remaining(&self, now_unix_seconds: i64) -> Duration {
        Duration::from_secs(u64::try_from(self.exp - now_unix_seconds).unwrap_or(0))
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("invalid token format")]
    TokenFormat,
    #[error("unsupported algorithm")]
    UnsupportedAlg,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("wrong token kind")]
    WrongKind,
    #[error("signing key must not be empty")]
    EmptyKey,
    #[error("access and refresh signing keys must differ")]
    SharedKey,
    #[error("failed to encode token: {0}")]
    Encode(jsonwebtoken::errors::Error),
}

fn decode_error(err: &jsonwebtoken::errors::Error) -> CredentialError {
    match err.kind() {
        ErrorKind::InvalidSignature => CredentialError::InvalidSignature,
        ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
            CredentialError::UnsupportedAlg
        }
        ErrorKind::ExpiredSignature => CredentialError::Expired,
        _ => CredentialError::TokenFormat,
    }
}

/// Freshly issued access/refresh pair.
#[derive(Debug, Clone)]
pub struct CredentialPair {
    pub access: String,
    pub refresh: String,
    /// Remaining lifetime of the refresh credential, used as its allow-list TTL.
    pub refresh_ttl: Duration,
}

pub struct CredentialCodec {
    access_key: SecretString,
    refresh_key: SecretString,
    access_ttl: Duration,
    refresh_ttl: Duration,
    validation: Validation,
}

impl std::fmt::Debug for CredentialCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCodec")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

impl CredentialCodec {
    /// Build a codec from two signing secrets.
    ///
    /// # Errors
    /// Returns an error if either secret is empty or both are the same.
    pub fn new(
        access_key: SecretString,
        refresh_key: SecretString,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Result<Self, CredentialError> {
        if access_key.expose_secret().is_empty() || refresh_key.expose_secret().is_empty() {
            return Err(CredentialError::EmptyKey);
        }
        if access_key.expose_secret() == refresh_key.expose_secret() {
            return Err(CredentialError::SharedKey);
        }

        // Expiry is checked against the caller's clock in `verify_at`.
        let mut validation = Validation::new(ALG);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            access_key,
            refresh_key,
            access_ttl,
            refresh_ttl,
            validation,
        })
    }

    /// Issue an access/refresh pair for `subject`.
    ///
    /// # Errors
    /// Returns an error if the claims cannot be encoded.
    pub fn issue(&self, subject: &str) -> Result<CredentialPair, CredentialError> {
        self.issue_at(subject, Utc::now().timestamp())
    }

    /// Issue a pair as if the current time were `now_unix_seconds`.
    ///
    /// # Errors
    /// Returns an error if the claims cannot be encoded.
    pub fn issue_at(
        &self,
        subject: &str,
        now_unix_seconds: i64,
    ) -> Result<CredentialPair, CredentialError> {
        let access = self.sign(
            &self.claims(subject, CredentialKind::Access, now_unix_seconds),
            CredentialKind::Access,
        )?;
        let refresh_claims = self.claims(subject, CredentialKind::Refresh, now_unix_seconds);
        let refresh = self.sign(&refresh_claims, CredentialKind::Refresh)?;
        Ok(CredentialPair {
            access,
            refresh,
            refresh_ttl: refresh_claims.remaining(now_unix_seconds),
        })
    }

    /// Verify a credential of the expected kind and return its claims.
    ///
    /// # Errors
    /// Returns an error if the token is malformed, carries a bad signature, is
    /// expired, or is of the other kind.
    pub fn verify(
        &self,
        token: &str,
        expected: CredentialKind,
    ) -> Result<CredentialClaims, CredentialError> {
        self.verify_at(token, expected, Utc::now().timestamp())
    }

    /// Verify against an explicit clock.
    ///
    /// # Errors
    /// See [`CredentialCodec::verify`].
    pub fn verify_at(
        &self,
        token: &str,
        expected: CredentialKind,
        now_unix_seconds: i64,
    ) -> Result<CredentialClaims, CredentialError> {
        // A refresh credential presented as access fails the signature check
        // under the access key.
        let claims = decode::<CredentialClaims>(
            token,
            &DecodingKey::from_secret(self.key(expected).expose_secret().as_bytes()),
            &self.validation,
        )
        .map_err(|err| decode_error(&err))?
        .claims;

        if claims.typ != expected {
            return Err(CredentialError::WrongKind);
        }
        if claims.exp <= now_unix_seconds {
            return Err(CredentialError::Expired);
        }

        Ok(claims)
    }

    fn claims(&self, subject: &str, kind: CredentialKind, now: i64) -> CredentialClaims {
        let ttl = match kind {
            CredentialKind::Access => self.access_ttl,
            CredentialKind::Refresh => self.refresh_ttl,
        };
        CredentialClaims {
            sub: subject.to_string(),
            typ: kind,
            iat: now,
            exp: now.saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)),
            jti: Ulid::new().to_string(),
        }
    }

    fn sign(
        &self,
        claims: &CredentialClaims,
        kind: CredentialKind,
    ) -> Result<String, CredentialError> {
        encode(
            &Header::new(ALG),
            claims,
            &EncodingKey::from_secret(self.key(kind).expose_secret().as_bytes()),
        )
        .map_err(CredentialError::Encode)
    }

    fn key(&self, kind: CredentialKind) -> &SecretString {
        match kind {
            CredentialKind::Access => &self.access_key,
            CredentialKind::Refresh => &self.refresh_key,
        }
    }
}
