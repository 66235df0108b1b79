use crate::session::rate_limit::RateLimitPolicy;
use anyhow::{Context, Result};
use clap::{Arg, Command};
use std::time::Duration;

pub const ARG_LOGIN_RATE_LIMIT: &str = "login-rate-limit";
pub const ARG_LOGIN_RATE_WINDOW_SECONDS: &str = "login-rate-window-seconds";
pub const ARG_FORGOT_PASSWORD_RATE_LIMIT: &str = "forgot-password-rate-limit";
pub const ARG_FORGOT_PASSWORD_RATE_WINDOW_SECONDS: &str = "forgot-password-rate-window-seconds";

#[derive(Debug)]
pub struct Options {
    pub login: RateLimitPolicy,
    pub forgot_password: RateLimitPolicy,
}

impl Options {
    /// # Errors
    /// Returns an error if a limit or window is missing.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        let policy = |limit: &str, window: &str| -> Result<RateLimitPolicy> {
            let limit = matches
                .get_one::<u64>(limit)
                .copied()
                .with_context(|| format!("missing required argument: --{limit}"))?;
            let window = matches
                .get_one::<u64>(window)
                .copied()
                .with_context(|| format!("missing required argument: --{window}"))?;
            Ok(RateLimitPolicy::new(limit, Duration::from_secs(window)))
        };

        Ok(Self {
            login: policy(ARG_LOGIN_RATE_LIMIT, ARG_LOGIN_RATE_WINDOW_SECONDS)?,
            forgot_password: policy(
                ARG_FORGOT_PASSWORD_RATE_LIMIT,
                ARG_FORGOT_PASSWORD_RATE_WINDOW_SECONDS,
            )?,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_LOGIN_RATE_LIMIT)
                .long(ARG_LOGIN_RATE_LIMIT)
                .help("Login attempts allowed per client address and window")
                .env("TESSERA_LOGIN_RATE_LIMIT")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_LOGIN_RATE_WINDOW_SECONDS)
                .long(ARG_LOGIN_RATE_WINDOW_SECONDS)
                .help("Login rate limit window in seconds")
                .env("TESSERA_LOGIN_RATE_WINDOW_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_FORGOT_PASSWORD_RATE_LIMIT)
                .long(ARG_FORGOT_PASSWORD_RATE_LIMIT)
                .help("Password reset requests allowed per client address and window")
                .env("TESSERA_FORGOT_PASSWORD_RATE_LIMIT")
                .default_value("1")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_FORGOT_PASSWORD_RATE_WINDOW_SECONDS)
                .long(ARG_FORGOT_PASSWORD_RATE_WINDOW_SECONDS)
                .help("Password reset rate limit window in seconds")
                .env("TESSERA_FORGOT_PASSWORD_RATE_WINDOW_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}
