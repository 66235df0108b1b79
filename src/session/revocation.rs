//! Refresh allow-list and single-use token vault.
//!
//! Entries are keyed by a digest of the full token value:
//! `refresh:<digest>` -> account id, `reset:<digest>` -> account id and
//! `emailchange:<digest>` -> `"<account id>|<new email>"`.

use super::{kv::KeyValueStore, utils::hash_token};
use anyhow::Result;
use std::{sync::Arc, time::Duration};
use uuid::Uuid;

const REFRESH_PREFIX: &str = "refresh";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SingleUseKind {
    PasswordReset,
    EmailChange,
}

impl SingleUseKind {
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::PasswordReset => "reset",
            Self::EmailChange => "emailchange",
        }
    }
}

/// Payload of an email-change token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingEmailChange {
    pub account_id: Uuid,
    pub new_email: String,
}

impl PendingEmailChange {
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{}|{}", self.account_id, self.new_email)
    }

    #[must_use]
    pub fn decode(payload: &str) -> Option<Self> {
        let (account_id, new_email) = payload.split_once('|')?;
        let account_id = Uuid::parse_str(account_id).ok()?;
        if new_email.is_empty() {
            return None;
        }
        Some(Self {
            account_id,
            new_email: new_email.to_string(),
        })
    }
}

#[derive(Clone)]
pub struct RevocationStore {
    kv: Arc<dyn KeyValueStore>,
}

impl RevocationStore {
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Allow-list a refresh credential for `ttl`.
    ///
    /// # Errors
    /// Returns an error if the backend is unavailable.
    pub async fn put_refresh(&self, refresh: &str, subject: &str, ttl: Duration) -> Result<()> {
        self.kv
            .set_with_ttl(&refresh_key(refresh), subject, ttl)
            .await
    }

    /// Subject a refresh credential is allow-listed for, if any.
    ///
    /// # Errors
    /// Returns an error if the backend is unavailable.
    pub async fn check_refresh(&self, refresh: &str) -> Result<Option<String>> {
        self.kv.get(&refresh_key(refresh)).await
    }

    /// Remove a refresh credential from the allow-list and return its subject.
    /// Only one of several concurrent callers observes `Some`.
    ///
    /// # Errors
    /// Returns an error if the backend is unavailable.
    pub async fn consume_refresh(&self, refresh: &str) -> Result<Option<String>> {
        self.kv.take(&refresh_key(refresh)).await
    }

    /// # Errors
    /// Returns an error if the backend is unavailable.
    pub async fn delete_refresh(&self, refresh: &str) -> Result<()> {
        self.kv.delete(&refresh_key(refresh)).await
    }

    /// # Errors
    /// Returns an error if the backend is unavailable.
    pub async fn put_single_use(
        &self,
        kind: SingleUseKind,
        token: &str,
        payload: &str,
        ttl: Duration,
    ) -> Result<()> {
        self.kv
            .set_with_ttl(&single_use_key(kind, token), payload, ttl)
            .await
    }

    /// Read and delete a single-use token in one step.
    ///
    /// # Errors
    /// Returns an error if the backend is unavailable.
    pub async fn consume_single_use(
        &self,
        kind: SingleUseKind,
        token: &str,
    ) -> Result<Option<String>> {
        self.kv.take(&single_use_key(kind, token)).await
    }

    /// # Errors
    /// Returns an error if the backend is unavailable.
    pub async fn ping(&self) -> Result<()> {
        self.kv.ping().await
    }
}

fn refresh_key(refresh: &str) -> String {
    format!("{REFRESH_PREFIX}:{}", hash_token(refresh))
}

fn single_use_key(kind: SingleUseKind, token: &str) -> String {
    format!("{}:{}", kind.prefix(), hash_token(token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::kv::MemoryKeyValueStore;

    fn store() -> (Arc<MemoryKeyValueStore>, RevocationStore) {
        let kv = Arc::new(MemoryKeyValueStore::new());
        (kv.clone(), RevocationStore::new(kv))
    }

    #[tokio::test]
    async fn refresh_allow_list_lifecycle() -> Result<()> {
        let (_, store) = store();
        store
            .put_refresh("r1", "user-1", Duration::from_secs(60))
            .await?;
        assert_eq!(store.check_refresh("r1").await?.as_deref(), Some("user-1"));

        store.delete_refresh("r1").await?;
        assert_eq!(store.check_refresh("r1").await?, None);
        // Idempotent.
        store.delete_refresh("r1").await?;
        Ok(())
    }

    #[tokio::test]
    async fn consume_refresh_only_once() -> Result<()> {
        let (_, store) = store();
        store
            .put_refresh("r1", "user-1", Duration::from_secs(60))
            .await?;
        assert_eq!(store.consume_refresh("r1").await?.as_deref(), Some("user-1"));
        assert_eq!(store.consume_refresh("r1").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn raw_tokens_are_not_used_as_keys() -> Result<()> {
        let (kv, store) = store();
        store
            .put_single_use(SingleUseKind::PasswordReset, "tok", "user-1", Duration::from_secs(60))
            .await?;
        assert_eq!(kv.get("reset:tok").await?, None);
        assert_eq!(
            kv.get(&format!("reset:{}", hash_token("tok"))).await?.as_deref(),
            Some("user-1")
        );
        Ok(())
    }

    #[tokio::test]
    async fn single_use_namespaces_are_disjoint() -> Result<()> {
        let (_, store) = store();
        store
            .put_single_use(SingleUseKind::PasswordReset, "tok", "user-1", Duration::from_secs(60))
            .await?;
        assert_eq!(
            store
                .consume_single_use(SingleUseKind::EmailChange, "tok")
                .await?,
            None
        );
        assert_eq!(
            store
                .consume_single_use(SingleUseKind::PasswordReset, "tok")
                .await?
                .as_deref(),
            Some("user-1")
        );
        assert_eq!(
            store
                .consume_single_use(SingleUseKind::PasswordReset, "tok")
                .await?,
            None
        );
        Ok(())
    }

    #[tokio::test]
    async fn racing_consumers_see_one_payload() -> Result<()> {
        let (_, store) = store();
        store
            .put_single_use(SingleUseKind::PasswordReset, "tok", "user-1", Duration::from_secs(60))
            .await?;

        let (first, second) = tokio::join!(
            store.consume_single_use(SingleUseKind::PasswordReset, "tok"),
            store.consume_single_use(SingleUseKind::PasswordReset, "tok"),
        );
        let hits = [first?, second?].iter().filter(|hit| hit.is_some()).count();
        assert_eq!(hits, 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn single_use_tokens_expire() -> Result<()> {
        let (_, store) = store();
        store
            .put_single_use(SingleUseKind::EmailChange, "tok", "x", Duration::from_secs(900))
            .await?;
        tokio::time::advance(Duration::from_secs(901)).await;
        assert_eq!(
            store
                .consume_single_use(SingleUseKind::EmailChange, "tok")
                .await?,
            None
        );
        Ok(())
    }

    #[test]
    fn pending_email_change_payload() {
        let pending = PendingEmailChange {
            account_id: Uuid::nil(),
            new_email: "new@x.com".to_string(),
        };
        let encoded = pending.encode();
        assert_eq!(
            encoded,
            "00000000-0000-0000-0000-000000000000|new@x.com"
        );
        assert_eq!(PendingEmailChange::decode(&encoded), Some(pending));
        assert_eq!(PendingEmailChange::decode("not-a-uuid|a@b.c"), None);
        assert_eq!(PendingEmailChange::decode("no separator"), None);
    }
}
