//! Redis-backed key-value store.
//!
//! Single-use consumption relies on `GETDEL`; counters use a Lua script so the
//! increment, the first-hit `PEXPIRE` and the `PTTL` read are one atomic step.

use super::kv::{KeyValueStore, WindowCount};
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::{Client, Script, aio::ConnectionManager};
use std::time::Duration;
use tracing::{Instrument, info_span};

const INCREMENT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return {count, redis.call('PTTL', KEYS[1])}
";

#[derive(Clone)]
pub struct RedisKeyValueStore {
    conn: ConnectionManager,
    increment: Script,
}

impl RedisKeyValueStore {
    /// Connect to Redis; the manager reconnects transparently afterwards.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the initial connection fails.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url).context("invalid redis url")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("failed to connect to redis")?;
        Ok(Self {
            conn,
            increment: Script::new(INCREMENT_SCRIPT),
        })
    }
}

fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn span(operation: &'static str) -> tracing::Span {
    info_span!("db.query", db.system = "redis", db.operation = operation)
}

#[async_trait]
impl KeyValueStore for RedisKeyValueStore {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let (): () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .instrument(span("SET"))
            .await
            .context("failed to store key")?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .instrument(span("GET"))
            .await
            .context("failed to read key")?;
        Ok(value)
    }

    async fn take(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GETDEL")
            .arg(key)
            .query_async(&mut conn)
            .instrument(span("GETDEL"))
            .await
            .context("failed to consume key")?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .instrument(span("DEL"))
            .await
            .context("failed to delete key")?;
        Ok(())
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount> {
        let mut conn = self.conn.clone();
        let (count, pttl): (i64, i64) = self
            .increment
            .key(key)
            .arg(millis(window))
            .invoke_async(&mut conn)
            .instrument(span("EVALSHA"))
            .await
            .context("failed to increment counter")?;

        Ok(WindowCount {
            count: u64::try_from(count).unwrap_or(0),
            ttl: Duration::from_millis(u64::try_from(pttl).unwrap_or(0)),
        })
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .instrument(span("PING"))
            .await
            .context("failed to ping redis")?;
        Ok(())
    }
}
