//! PostgreSQL-backed account store and device registry.
//!
//! Schema lives in `sql/schema.sql`.

use super::{
    account::{Account, AccountStore, CreateAccountOutcome, EmailUpdate, NewAccount},
    device::{CreateOutcome, Device, DeviceRegistry},
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Connection, PgPool, Row, postgres::PgRow};
use tracing::{Instrument, Span};
use uuid::Uuid;

fn query_span(operation: &'static str, statement: &'static str) -> Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

async fn ping_pool(pool: &PgPool) -> Result<()> {
    let acquire_span = tracing::info_span!(
        "db.acquire",
        db.system = "postgresql",
        db.operation = "ACQUIRE"
    );
    let mut conn = pool
        .acquire()
        .instrument(acquire_span)
        .await
        .context("failed to acquire database connection")?;
    let ping_span = tracing::info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
    conn.ping()
        .instrument(ping_span)
        .await
        .context("failed to ping database")
}

#[derive(Clone, Debug)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn account_from_row(row: &PgRow) -> Account {
    Account {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn create_account(&self, account: &NewAccount) -> Result<CreateAccountOutcome> {
        let query = r"
            INSERT INTO accounts (id, username, email, password_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING id
        ";
        let row = sqlx::query(query)
            .bind(Uuid::new_v4())
            .bind(&account.username)
            .bind(&account.email)
            .bind(&account.password_hash)
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", query))
            .await;

        match row {
            Ok(row) => Ok(CreateAccountOutcome::Created(row.get("id"))),
            Err(err) if is_unique_violation(&err) => Ok(CreateAccountOutcome::Conflict),
            Err(err) => Err(err).context("failed to insert account"),
        }
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<Account>> {
        let query = "SELECT id, username, email, password_hash FROM accounts WHERE email = $1";
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup account by email")?;
        Ok(row.as_ref().map(account_from_row))
    }

    async fn update_password(&self, account_id: Uuid, password_hash: &str) -> Result<bool> {
        let query =
            "UPDATE accounts SET password_hash = $2, updated_at = NOW() WHERE id = $1";
        let result = sqlx::query(query)
            .bind(account_id)
            .bind(password_hash)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to update password")?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_email(&self, account_id: Uuid, email: &str) -> Result<EmailUpdate> {
        let query = "UPDATE accounts SET email = $2, updated_at = NOW() WHERE id = $1";
        let result = sqlx::query(query)
            .bind(account_id)
            .bind(email)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await;

        match result {
            Ok(result) if result.rows_affected() == 0 => Ok(EmailUpdate::NotFound),
            Ok(_) => Ok(EmailUpdate::Updated),
            Err(err) if is_unique_violation(&err) => Ok(EmailUpdate::Conflict),
            Err(err) => Err(err).context("failed to update email"),
        }
    }

    async fn ping(&self) -> Result<()> {
        ping_pool(&self.pool).await
    }
}

#[derive(Clone, Debug)]
pub struct PgDeviceRegistry {
    pool: PgPool,
}

impl PgDeviceRegistry {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn device_from_row(row: &PgRow) -> Device {
    Device {
        account_id: row.get("account_id"),
        device_id: row.get("device_id"),
        device_name: row.get("device_name"),
        last_active_at: row.get("last_active_at"),
        created_at: row.get("created_at"),
    }
}

const INSERT_DEVICE: &str = r"
    INSERT INTO devices (account_id, device_id, device_name, last_active_at, created_at)
    VALUES ($1, $2, $3, $4, $5)
    ON CONFLICT (account_id, device_id) DO NOTHING
";

#[async_trait]
impl DeviceRegistry for PgDeviceRegistry {
    async fn find(&self, account_id: Uuid, device_id: &str) -> Result<Option<Device>> {
        let query = r"
            SELECT account_id, device_id, device_name, last_active_at, created_at
            FROM devices
            WHERE account_id = $1 AND device_id = $2
        ";
        let row = sqlx::query(query)
            .bind(account_id)
            .bind(device_id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup device")?;
        Ok(row.as_ref().map(device_from_row))
    }

    async fn count(&self, account_id: Uuid) -> Result<u64> {
        let query = "SELECT COUNT(*) AS total FROM devices WHERE account_id = $1";
        let row = sqlx::query(query)
            .bind(account_id)
            .fetch_one(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to count devices")?;
        let total: i64 = row.get("total");
        Ok(u64::try_from(total).unwrap_or(0))
    }

    async fn create(&self, device: &Device) -> Result<bool> {
        let result = sqlx::query(INSERT_DEVICE)
            .bind(device.account_id)
            .bind(&device.device_id)
            .bind(&device.device_name)
            .bind(device.last_active_at)
            .bind(device.created_at)
            .execute(&self.pool)
            .instrument(query_span("INSERT", INSERT_DEVICE))
            .await
            .context("failed to insert device")?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_within_limit(&self, device: &Device, limit: u32) -> Result<CreateOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin device transaction")?;

        // Serializes count-then-insert per account until commit/rollback.
        let lock = "SELECT pg_advisory_xact_lock(hashtext($1::text))";
        sqlx::query(lock)
            .bind(device.account_id.to_string())
            .execute(&mut *tx)
            .instrument(query_span("SELECT", lock))
            .await
            .context("failed to lock account devices")?;

        // A device that is already registered never counts against the limit.
        let existing = "SELECT 1 FROM devices WHERE account_id = $1 AND device_id = $2";
        let known = sqlx::query(existing)
            .bind(device.account_id)
            .bind(&device.device_id)
            .fetch_optional(&mut *tx)
            .instrument(query_span("SELECT", existing))
            .await
            .context("failed to lookup device")?;
        if known.is_some() {
            tx.rollback().await.context("rollback device transaction")?;
            return Ok(CreateOutcome::Duplicate);
        }

        let count = "SELECT COUNT(*) AS total FROM devices WHERE account_id = $1";
        let row = sqlx::query(count)
            .bind(device.account_id)
            .fetch_one(&mut *tx)
            .instrument(query_span("SELECT", count))
            .await
            .context("failed to count devices")?;
        let total: i64 = row.get("total");
        if total >= i64::from(limit) {
            tx.rollback().await.context("rollback device transaction")?;
            return Ok(CreateOutcome::LimitReached);
        }

        let result = sqlx::query(INSERT_DEVICE)
            .bind(device.account_id)
            .bind(&device.device_id)
            .bind(&device.device_name)
            .bind(device.last_active_at)
            .bind(device.created_at)
            .execute(&mut *tx)
            .instrument(query_span("INSERT", INSERT_DEVICE))
            .await
            .context("failed to insert device")?;

        tx.commit().await.context("commit device transaction")?;

        Ok(if result.rows_affected() > 0 {
            CreateOutcome::Created
        } else {
            CreateOutcome::Duplicate
        })
    }

    async fn touch(&self, account_id: Uuid, device_id: &str) -> Result<()> {
        let query =
            "UPDATE devices SET last_active_at = NOW() WHERE account_id = $1 AND device_id = $2";
        sqlx::query(query)
            .bind(account_id)
            .bind(device_id)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to touch device")?;
        Ok(())
    }

    async fn list(&self, account_id: Uuid) -> Result<Vec<Device>> {
        let query = r"
            SELECT account_id, device_id, device_name, last_active_at, created_at
            FROM devices
            WHERE account_id = $1
            ORDER BY last_active_at DESC
        ";
        let rows = sqlx::query(query)
            .bind(account_id)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to list devices")?;
        Ok(rows.iter().map(device_from_row).collect())
    }

    async fn delete(&self, account_id: Uuid, device_id: &str) -> Result<()> {
        let query = "DELETE FROM devices WHERE account_id = $1 AND device_id = $2";
        sqlx::query(query)
            .bind(account_id)
            .bind(device_id)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to delete device")?;
        Ok(())
    }
}
