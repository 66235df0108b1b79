//! Session core: credentials, revocation, devices, throttling and the flows
//! that compose them.
//!
//! Backends are traits so the same flows run against PostgreSQL/Redis in
//! production and the in-memory implementations in development and tests.

pub mod account;
pub mod config;
pub mod credential;
pub mod device;
pub mod error;
pub mod kv;
pub mod kv_redis;
pub mod notify;
pub mod password;
pub mod profile;
pub mod rate_limit;
pub mod revocation;
pub mod service;
pub mod storage;
pub mod utils;

pub use config::SessionConfig;
pub use credential::{CredentialCodec, CredentialKind, CredentialPair};
pub use error::AuthError;
pub use service::{Backends, LoginRequest, SessionService};
