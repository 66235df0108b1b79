//! Durable account records consumed by the session flows.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

#[derive(Clone, Debug)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateAccountOutcome {
    Created(Uuid),
    /// Email or username already taken.
    Conflict,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmailUpdate {
    Updated,
    Conflict,
    NotFound,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn create_account(&self, account: &NewAccount) -> Result<CreateAccountOutcome>;

    async fn get_by_email(&self, email: &str) -> Result<Option<Account>>;

    async fn email_taken(&self, email: &str) -> Result<bool> {
        Ok(self.get_by_email(email).await?.is_some())
    }

    /// Returns `false` when the account does not exist.
    async fn update_password(&self, account_id: Uuid, password_hash: &str) -> Result<bool>;

    async fn update_email(&self, account_id: Uuid, email: &str) -> Result<EmailUpdate>;

    async fn ping(&self) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    accounts: Mutex<HashMap<Uuid, Account>>,
}

impl MemoryAccountStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn create_account(&self, account: &NewAccount) -> Result<CreateAccountOutcome> {
        let mut accounts = self.accounts.lock().await;
        if accounts
            .values()
            .any(|existing| {
                existing.email == account.email || existing.username == account.username
            })
        {
            return Ok(CreateAccountOutcome::Conflict);
        }

        let id = Uuid::new_v4();
        accounts.insert(
            id,
            Account {
                id,
                username: account.username.clone(),
                email: account.email.clone(),
                password_hash: account.password_hash.clone(),
            },
        );
        Ok(CreateAccountOutcome::Created(id))
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<Account>> {
        let accounts = self.accounts.lock().await;
        Ok(accounts
            .values()
            .find(|account| account.email == email)
            .cloned())
    }

    async fn update_password(&self, account_id: Uuid, password_hash: &str) -> Result<bool> {
        let mut accounts = self.accounts.lock().await;
        Ok(accounts.get_mut(&account_id).is_some_and(|account| {
            account.password_hash = password_hash.to_string();
            true
        }))
    }

    async fn update_email(&self, account_id: Uuid, email: &str) -> Result<EmailUpdate> {
        let mut accounts = self.accounts.lock().await;
        if accounts
            .values()
            .any(|account| account.id != account_id && account.email == email)
        {
            return Ok(EmailUpdate::Conflict);
        }
        Ok(match accounts.get_mut(&account_id) {
            Some(account) => {
                account.email = email.to_string();
                EmailUpdate::Updated
            }
            None => EmailUpdate::NotFound,
        })
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
