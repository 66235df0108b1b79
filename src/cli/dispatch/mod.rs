//! Map validated CLI arguments to an action carrying its full configuration.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{ARG_DSN, ARG_PORT, ARG_REDIS_URL, email, limits, session};
use crate::session::{SessionConfig, rate_limit::RateLimitAction};
use anyhow::{Result, bail};
use secrecy::ExposeSecret;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);

    let session_opts = session::Options::parse(matches)?;
    if session_opts.access_secret.expose_secret() == session_opts.refresh_secret.expose_secret() {
        bail!("--access-secret and --refresh-secret must differ");
    }
    let limit_opts = limits::Options::parse(matches)?;
    let email_opts = email::Options::parse(matches)?;

    let config = SessionConfig::new(
        session_opts.access_secret,
        session_opts.refresh_secret,
        session_opts.frontend_base_url,
    )
    .with_access_ttl(session_opts.access_ttl)
    .with_refresh_ttl(session_opts.refresh_ttl)
    .with_single_use_ttl(session_opts.single_use_ttl)
    .with_rate_limit(RateLimitAction::Login, limit_opts.login)
    .with_rate_limit(RateLimitAction::ForgotPassword, limit_opts.forgot_password)
    .with_mail_queue_capacity(email_opts.queue_capacity);

    Ok(Action::Server(Args {
        port,
        dsn: matches.get_one::<String>(ARG_DSN).cloned(),
        redis_url: matches.get_one::<String>(ARG_REDIS_URL).cloned(),
        profile_service_url: session_opts.profile_service_url,
        trust_forwarded_for: session_opts.trust_forwarded_for,
        sendgrid_api_key: email_opts.sendgrid_api_key,
        email_from: email_opts.from_email,
        email_from_name: email_opts.from_name,
        config,
    }))
}
