use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use secrecy::SecretString;
use std::time::Duration;

pub const ARG_ACCESS_SECRET: &str = "access-secret";
pub const ARG_REFRESH_SECRET: &str = "refresh-secret";
pub const ARG_ACCESS_TTL_SECONDS: &str = "access-ttl-seconds";
pub const ARG_REFRESH_TTL_SECONDS: &str = "refresh-ttl-seconds";
pub const ARG_SINGLE_USE_TTL_SECONDS: &str = "single-use-ttl-seconds";
pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_PROFILE_SERVICE_URL: &str = "profile-service-url";
pub const ARG_TRUST_FORWARDED_FOR: &str = "trust-forwarded-for";

#[derive(Debug)]
pub struct Options {
    pub access_secret: SecretString,
    pub refresh_secret: SecretString,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub single_use_ttl: Duration,
    pub frontend_base_url: String,
    pub profile_service_url: Option<String>,
    pub trust_forwarded_for: bool,
}

impl Options {
    /// # Errors
    /// Returns an error if a required secret is missing.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        let secret = |name: &str| {
            matches
                .get_one::<String>(name)
                .map(|value| SecretString::from(value.clone()))
                .with_context(|| format!("missing required argument: --{name}"))
        };
        let seconds = |name: &str| {
            matches
                .get_one::<u64>(name)
                .copied()
                .map(Duration::from_secs)
                .with_context(|| format!("missing required argument: --{name}"))
        };

        Ok(Self {
            access_secret: secret(ARG_ACCESS_SECRET)?,
            refresh_secret: secret(ARG_REFRESH_SECRET)?,
            access_ttl: seconds(ARG_ACCESS_TTL_SECONDS)?,
            refresh_ttl: seconds(ARG_REFRESH_TTL_SECONDS)?,
            single_use_ttl: seconds(ARG_SINGLE_USE_TTL_SECONDS)?,
            frontend_base_url: matches
                .get_one::<String>(ARG_FRONTEND_BASE_URL)
                .cloned()
                .context("missing required argument: --frontend-base-url")?,
            profile_service_url: matches.get_one::<String>(ARG_PROFILE_SERVICE_URL).cloned(),
            trust_forwarded_for: matches.get_flag(ARG_TRUST_FORWARDED_FOR),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ACCESS_SECRET)
                .long(ARG_ACCESS_SECRET)
                .help("HMAC key for access credentials")
                .env("TESSERA_ACCESS_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_REFRESH_SECRET)
                .long(ARG_REFRESH_SECRET)
                .help("HMAC key for refresh credentials, must differ from the access key")
                .env("TESSERA_REFRESH_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_ACCESS_TTL_SECONDS)
                .long(ARG_ACCESS_TTL_SECONDS)
                .help("Access credential lifetime in seconds")
                .env("TESSERA_ACCESS_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TTL_SECONDS)
                .long(ARG_REFRESH_TTL_SECONDS)
                .help("Refresh credential lifetime in seconds")
                .env("TESSERA_REFRESH_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_SINGLE_USE_TTL_SECONDS)
                .long(ARG_SINGLE_USE_TTL_SECONDS)
                .help("Password reset and email change token lifetime in seconds")
                .env("TESSERA_SINGLE_USE_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL used for emailed links")
                .env("TESSERA_FRONTEND_BASE_URL")
                .default_value("http://localhost:3000"),
        )
        .arg(
            Arg::new(ARG_PROFILE_SERVICE_URL)
                .long(ARG_PROFILE_SERVICE_URL)
                .help("Profile service base URL; device policies default to one device when absent")
                .env("TESSERA_PROFILE_SERVICE_URL"),
        )
        .arg(
            Arg::new(ARG_TRUST_FORWARDED_FOR)
                .long(ARG_TRUST_FORWARDED_FOR)
                .help("Rate limit by X-Forwarded-For / X-Real-IP instead of the peer address")
                .env("TESSERA_TRUST_FORWARDED_FOR")
                .action(ArgAction::SetTrue),
        )
}
