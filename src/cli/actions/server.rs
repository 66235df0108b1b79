use crate::{
    api::{self, ApiState},
    cli::telemetry,
    session::{
        Backends, SessionConfig, SessionService,
        account::{AccountStore, MemoryAccountStore},
        device::{DeviceRegistry, MemoryDeviceRegistry},
        kv::{KeyValueStore, MemoryKeyValueStore},
        kv_redis::RedisKeyValueStore,
        notify::{EmailSender, LogEmailSender, SendGridEmailSender, spawn_mailer},
        password::PasswordHasher,
        profile::{HttpProfileDirectory, MemoryProfileDirectory, ProfileDirectory, Subscription},
        rate_limit::RateLimiter,
        storage::{PgAccountStore, PgDeviceRegistry},
    },
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

const PROFILE_TIMEOUT: Duration = Duration::from_secs(5);
const MAILER_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub redis_url: Option<String>,
    pub profile_service_url: Option<String>,
    pub trust_forwarded_for: bool,
    pub sendgrid_api_key: Option<SecretString>,
    pub email_from: String,
    pub email_from_name: String,
    pub config: SessionConfig,
}

/// Execute the server action.
/// # Errors
/// Returns an error if a backend cannot be reached or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let (accounts, devices): (Arc<dyn AccountStore>, Arc<dyn DeviceRegistry>) =
        if let Some(dsn) = &args.dsn {
            let pool = PgPoolOptions::new()
                .min_connections(1)
                .max_connections(5)
                .max_lifetime(Duration::from_secs(60 * 2))
                .test_before_acquire(true)
                .connect(dsn)
                .await
                .context("Failed to connect to database")?;
            (
                Arc::new(PgAccountStore::new(pool.clone())),
                Arc::new(PgDeviceRegistry::new(pool)),
            )
        } else {
            warn!("No --dsn given; accounts and devices are kept in memory");
            (
                Arc::new(MemoryAccountStore::new()),
                Arc::new(MemoryDeviceRegistry::new()),
            )
        };

    let kv: Arc<dyn KeyValueStore> = if let Some(url) = &args.redis_url {
        Arc::new(RedisKeyValueStore::connect(url).await?)
    } else {
        warn!("No --redis-url given; tokens and rate limit counters are kept in memory");
        Arc::new(MemoryKeyValueStore::new())
    };

    let profiles: Arc<dyn ProfileDirectory> = if let Some(url) = &args.profile_service_url {
        Arc::new(HttpProfileDirectory::new(url, PROFILE_TIMEOUT)?)
    } else {
        warn!("No --profile-service-url given; every account gets the default subscription");
        Arc::new(MemoryProfileDirectory::new(Subscription::default()))
    };

    let sender: Arc<dyn EmailSender> = if let Some(api_key) = args.sendgrid_api_key {
        Arc::new(SendGridEmailSender::new(
            api_key,
            args.email_from,
            args.email_from_name,
        )?)
    } else {
        info!("No SendGrid API key given; emails are logged");
        Arc::new(LogEmailSender)
    };
    let (mailer, mailer_handle) = spawn_mailer(sender, args.config.mail_queue_capacity());

    let sessions = SessionService::new(
        &args.config,
        Backends {
            kv: kv.clone(),
            accounts,
            devices,
            profiles,
        },
        PasswordHasher::default(),
        mailer,
    )?;
    let state = Arc::new(ApiState {
        sessions,
        limiter: RateLimiter::new(kv),
        config: args.config,
        trust_forwarded_for: args.trust_forwarded_for,
    });

    let served = api::serve(args.port, state, api::shutdown_signal()).await;

    mailer_handle.shutdown(MAILER_GRACE).await;
    telemetry::shutdown_tracer();

    served
}
