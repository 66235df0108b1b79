//! # Tessera (session credentials and device limits)
//!
//! `tessera` issues, validates, rotates and revokes session credentials for the
//! end users of a multi-service platform, and enforces two limits tied to them:
//! the number of registered devices per account and the rate of sensitive
//! operations per client address.
//!
//! ## Credentials
//!
//! Access and refresh credentials are HS256 JWTs signed with two distinct keys.
//! A refresh credential is honored only while it is unexpired **and** present in
//! the revocation store; every successful refresh consumes the stored entry and
//! installs a new one, so refresh credentials are single-use.
//!
//! ## Devices
//!
//! Each login names a client-supplied device identifier. Known devices never
//! consume a slot; new devices are admitted while the account is below the
//! limit resolved from its subscription policy. A lapsed subscription collapses
//! the limit to one.
//!
//! ## Rate limiting
//!
//! Login and password-reset requests pass a fixed-window counter keyed by
//! operation class and client address. Store failures fail open.

pub mod api;
pub mod cli;
pub mod session;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
