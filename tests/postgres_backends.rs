//! PostgreSQL account store and device registry against a live database.
//!
//! Skipped unless `TESSERA_TEST_DSN` points at a database the tests may
//! create tables in.

use anyhow::{Context, Result};
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::sync::Arc;
use tessera::session::{
    account::{AccountStore, CreateAccountOutcome, EmailUpdate, NewAccount},
    device::{Admission, CreateOutcome, Device, DeviceRegistry, check_device_limit},
    storage::{PgAccountStore, PgDeviceRegistry},
};
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

async fn pool() -> Result<Option<PgPool>> {
    let Ok(dsn) = std::env::var("TESSERA_TEST_DSN") else {
        eprintln!("TESSERA_TEST_DSN not set; skipping");
        return Ok(None);
    };
    let pool = PgPoolOptions::new()
        .max_connections(12)
        .connect(&dsn)
        .await
        .context("Failed to connect to test database")?;
    sqlx::raw_sql(SCHEMA_SQL)
        .execute(&pool)
        .await
        .context("Failed to apply schema")?;
    Ok(Some(pool))
}

async fn new_account(accounts: &PgAccountStore) -> Result<(Uuid, String)> {
    let suffix = Uuid::new_v4().simple().to_string();
    let email = format!("{suffix}@x.com");
    let outcome = accounts
        .create_account(&NewAccount {
            username: format!("user-{suffix}"),
            email: email.clone(),
            password_hash: "hash".to_string(),
        })
        .await?;
    match outcome {
        CreateAccountOutcome::Created(id) => Ok((id, email)),
        CreateAccountOutcome::Conflict => anyhow::bail!("fresh account conflicted"),
    }
}

#[tokio::test]
async fn accounts_enforce_unique_email() -> Result<()> {
    let Some(pool) = pool().await? else {
        return Ok(());
    };
    let accounts = PgAccountStore::new(pool);
    let (first, first_email) = new_account(&accounts).await?;
    let (second, second_email) = new_account(&accounts).await?;

    let duplicate = accounts
        .create_account(&NewAccount {
            username: format!("other-{}", Uuid::new_v4().simple()),
            email: first_email.clone(),
            password_hash: "hash".to_string(),
        })
        .await?;
    assert_eq!(duplicate, CreateAccountOutcome::Conflict);

    assert_eq!(
        accounts.update_email(second, &first_email).await?,
        EmailUpdate::Conflict
    );
    assert_eq!(
        accounts.update_email(Uuid::new_v4(), "nobody@x.com").await?,
        EmailUpdate::NotFound
    );
    assert!(accounts.update_password(first, "new-hash").await?);
    let account = accounts
        .get_by_email(&first_email)
        .await?
        .context("account exists")?;
    assert_eq!(account.password_hash, "new-hash");
    assert!(accounts.email_taken(&second_email).await?);
    accounts.ping().await
}

#[tokio::test]
async fn concurrent_device_inserts_respect_limit() -> Result<()> {
    let Some(pool) = pool().await? else {
        return Ok(());
    };
    let accounts = PgAccountStore::new(pool.clone());
    let registry = Arc::new(PgDeviceRegistry::new(pool));
    let (account_id, _) = new_account(&accounts).await?;

    let mut handles = Vec::new();
    for index in 0..10 {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            let device = Device::new(account_id, &format!("dev-{index}"), "phone");
            registry.create_within_limit(&device, 3).await
        }));
    }
    let mut created = 0;
    for handle in handles {
        if handle.await?? == CreateOutcome::Created {
            created += 1;
        }
    }
    assert_eq!(created, 3);
    assert_eq!(registry.count(account_id).await?, 3);

    let existing = registry.list(account_id).await?;
    let duplicate = Device::new(account_id, &existing[0].device_id, "phone");
    assert_eq!(
        registry.create_within_limit(&duplicate, 5).await?,
        CreateOutcome::Duplicate
    );
    // A full account still reports a registered device as a duplicate.
    assert_eq!(
        registry.create_within_limit(&duplicate, 3).await?,
        CreateOutcome::Duplicate
    );

    registry.delete(account_id, &existing[0].device_id).await?;
    assert_eq!(registry.count(account_id).await?, 2);
    Ok(())
}

#[tokio::test]
async fn same_new_device_racing_at_the_limit_is_admitted() -> Result<()> {
    let Some(pool) = pool().await? else {
        return Ok(());
    };
    let accounts = PgAccountStore::new(pool.clone());
    let registry = Arc::new(PgDeviceRegistry::new(pool));

    for _ in 0..10 {
        let (account_id, _) = new_account(&accounts).await?;
        let (first, second) = tokio::join!(
            check_device_limit(registry.as_ref(), account_id, "phone-a", "Phone", 1),
            check_device_limit(registry.as_ref(), account_id, "phone-a", "Phone", 1),
        );
        let mut outcomes = vec![first?, second?];
        outcomes.sort_by_key(|admission| matches!(admission, Admission::Registered));
        assert_eq!(outcomes, [Admission::Known, Admission::Registered]);
        assert_eq!(registry.count(account_id).await?, 1);
    }
    Ok(())
}
