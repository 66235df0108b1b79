use anyhow::{Context, Result};
use clap::{Arg, Command};
use secrecy::SecretString;

pub const ARG_SENDGRID_API_KEY: &str = "sendgrid-api-key";
pub const ARG_EMAIL_FROM: &str = "email-from";
pub const ARG_EMAIL_FROM_NAME: &str = "email-from-name";
pub const ARG_MAIL_QUEUE_CAPACITY: &str = "mail-queue-capacity";

#[derive(Debug)]
pub struct Options {
    /// Emails are only logged when absent.
    pub sendgrid_api_key: Option<SecretString>,
    pub from_email: String,
    pub from_name: String,
    pub queue_capacity: usize,
}

impl Options {
    /// # Errors
    /// Returns an error if a defaulted argument is missing.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        Ok(Self {
            sendgrid_api_key: matches
                .get_one::<String>(ARG_SENDGRID_API_KEY)
                .map(|key| SecretString::from(key.clone())),
            from_email: matches
                .get_one::<String>(ARG_EMAIL_FROM)
                .cloned()
                .context("missing required argument: --email-from")?,
            from_name: matches
                .get_one::<String>(ARG_EMAIL_FROM_NAME)
                .cloned()
                .context("missing required argument: --email-from-name")?,
            queue_capacity: matches
                .get_one::<usize>(ARG_MAIL_QUEUE_CAPACITY)
                .copied()
                .context("missing required argument: --mail-queue-capacity")?,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SENDGRID_API_KEY)
                .long(ARG_SENDGRID_API_KEY)
                .help("SendGrid API key; emails are logged instead of sent when absent")
                .env("TESSERA_SENDGRID_API_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_EMAIL_FROM)
                .long(ARG_EMAIL_FROM)
                .help("Sender address for outgoing email")
                .env("TESSERA_EMAIL_FROM")
                .default_value("noreply@tessera.dev"),
        )
        .arg(
            Arg::new(ARG_EMAIL_FROM_NAME)
                .long(ARG_EMAIL_FROM_NAME)
                .help("Sender display name for outgoing email")
                .env("TESSERA_EMAIL_FROM_NAME")
                .default_value("Tessera"),
        )
        .arg(
            Arg::new(ARG_MAIL_QUEUE_CAPACITY)
                .long(ARG_MAIL_QUEUE_CAPACITY)
                .help("Pending email queue capacity; further messages are dropped")
                .env("TESSERA_MAIL_QUEUE_CAPACITY")
                .default_value("256")
                .value_parser(clap::value_parser!(usize)),
        )
}
