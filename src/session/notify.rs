//! Out-of-band user notifications.
//!
//! Flows hand rendered messages to a [`Mailer`], which puts them on a bounded
//! queue and returns immediately. One worker task drains the queue into an
//! [`EmailSender`]. Delivery failures are logged and never reach the caller.
//!
//! The worker stops when [`MailerHandle::shutdown`] is called, after draining
//! whatever was already queued, so no task outlives the process teardown.
//!
//! The default sender for local dev is [`LogEmailSender`], which logs and
//! returns `Ok(())`.

use crate::APP_USER_AGENT;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{Instrument, debug, error, info, info_span, warn};

const SENDGRID_ENDPOINT: &str = "https://api.sendgrid.com/v3/mail/send";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailMessage {
    pub to_email: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

impl EmailMessage {
    /// Password-reset link message.
    #[must_use]
    pub fn password_reset(
        frontend_base_url: &str,
        to_email: &str,
        token: &str,
        ttl: Duration,
    ) -> Self {
        let link = build_link(frontend_base_url, "reset-password", token);
        let expiry = describe_ttl(ttl);
        Self {
            to_email: to_email.to_string(),
            subject: "Password reset".to_string(),
            text_body: format!(
                "Follow this link to reset your password: {link}\nThe link expires in {expiry}."
            ),
            html_body: format!(
                "<p>Follow this link to reset your password:</p><p><a href=\"{link}\">{link}</a></p><p>The link expires in {expiry}.</p>"
            ),
        }
    }

    /// Email-change confirmation, sent to the pending new address.
    #[must_use]
    pub fn email_change(
        frontend_base_url: &str,
        to_email: &str,
        token: &str,
        ttl: Duration,
    ) -> Self {
        let link = build_link(frontend_base_url, "confirm-email", token);
        let expiry = describe_ttl(ttl);
        Self {
            to_email: to_email.to_string(),
            subject: "Confirm your new email".to_string(),
            text_body: format!(
                "Follow this link to confirm your new email address: {link}\nThe link expires in {expiry}."
            ),
            html_body: format!(
                "<p>Follow this link to confirm your new email address:</p><p><a href=\"{link}\">{link}</a></p><p>The link expires in {expiry}.</p>"
            ),
        }
    }
}

/// Human wording for a link lifetime: whole minutes when exact, seconds otherwise.
fn describe_ttl(ttl: Duration) -> String {
    let seconds = ttl.as_secs();
    match (seconds / 60, seconds % 60) {
        (1, 0) => "1 minute".to_string(),
        (minutes, 0) if minutes > 0 => format!("{minutes} minutes"),
        _ if seconds == 1 => "1 second".to_string(),
        _ => format!("{seconds} seconds"),
    }
}

fn build_link(frontend_base_url: &str, path: &str, token: &str) -> String {
    let base = frontend_base_url.trim_end_matches('/');
    format!("{base}/{path}?token={token}")
}

/// Email delivery abstraction used by the notification worker.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error, which is logged.
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Local dev sender that logs the message instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to_email = %message.to_email,
            subject = %message.subject,
            body = %message.text_body,
            "email send stub"
        );
        Ok(())
    }
}

/// Sender backed by the SendGrid v3 mail API.
#[derive(Clone, Debug)]
pub struct SendGridEmailSender {
    client: Client,
    api_key: SecretString,
    from_email: String,
    from_name: String,
    endpoint: String,
}

impl SendGridEmailSender {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(api_key: SecretString, from_email: String, from_name: String) -> Result<Self> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(Duration::from_secs(15))
            .build()
            .context("failed to build email client")?;
        Ok(Self {
            client,
            api_key,
            from_email,
            from_name,
            endpoint: SENDGRID_ENDPOINT.to_string(),
        })
    }

    fn body(&self, message: &EmailMessage) -> serde_json::Value {
        json!({
            "personalizations": [{ "to": [{ "email": message.to_email }] }],
            "from": { "email": self.from_email, "name": self.from_name },
            "subject": message.subject,
            "content": [
                { "type": "text/plain", "value": message.text_body },
                { "type": "text/html", "value": message.html_body },
            ],
        })
    }
}

#[async_trait]
impl EmailSender for SendGridEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let span = info_span!("email.send", http.method = "POST", provider = "sendgrid");
        self.client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&self.body(message))
            .send()
            .instrument(span)
            .await
            .context("email provider request failed")?
            .error_for_status()
            .context("email provider rejected message")?;
        Ok(())
    }
}

/// Producer side of the notification queue. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Mailer {
    tx: mpsc::Sender<EmailMessage>,
}

impl Mailer {
    /// Queue a message without waiting. Returns `false` if it was dropped.
    pub fn enqueue(&self, message: EmailMessage) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(message)) => {
                warn!(to_email = %message.to_email, "Notification queue full; message dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(message)) => {
                warn!(to_email = %message.to_email, "Notification worker stopped; message dropped");
                false
            }
        }
    }
}

/// Owner of the notification worker task.
#[derive(Debug)]
pub struct MailerHandle {
    shutdown: watch::Sender<bool>,
    worker: JoinHandle<()>,
}

impl MailerHandle {
    /// Stop accepting messages, drain what is queued and wait up to `grace`
    /// for the worker; abort it after that.
    pub async fn shutdown(self, grace: Duration) {
        let _ = self.shutdown.send(true);
        let abort = self.worker.abort_handle();
        match tokio::time::timeout(grace, self.worker).await {
            Ok(Ok(())) => debug!("Notification worker stopped"),
            Ok(Err(err)) => error!("Notification worker failed: {err}"),
            Err(_) => {
                warn!("Notification worker did not drain within {grace:?}; aborting");
                abort.abort();
            }
        }
    }
}

/// Spawn the notification worker with a queue of `capacity` messages.
#[must_use]
pub fn spawn_mailer(sender: Arc<dyn EmailSender>, capacity: usize) -> (Mailer, MailerHandle) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(run_worker(sender, rx, shutdown_rx));
    (
        Mailer { tx },
        MailerHandle {
            shutdown: shutdown_tx,
            worker,
        },
    )
}

async fn run_worker(
    sender: Arc<dyn EmailSender>,
    mut rx: mpsc::Receiver<EmailMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            message = rx.recv() => match message {
                Some(message) => deliver(sender.as_ref(), &message).await,
                None => return,
            },
        }
    }

    rx.close();
    while let Some(message) = rx.recv().await {
        deliver(sender.as_ref(), &message).await;
    }
}

async fn deliver(sender: &dyn EmailSender, message: &EmailMessage) {
    match sender.send(message).await {
        Ok(()) => debug!(to_email = %message.to_email, "Notification delivered"),
        Err(err) => error!(to_email = %message.to_email, "Notification delivery failed: {err:#}"),
    }
}
