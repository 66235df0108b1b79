//! Key-value backend with per-entry expiry.
//!
//! The revocation store and the rate limiter share one backend under disjoint
//! key prefixes. Every entry carries a TTL; nothing is stored forever.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::{collections::HashMap, time::Duration};
use tokio::{sync::Mutex, time::Instant};

/// Counter value and remaining window after an atomic increment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowCount {
    pub count: u64,
    pub ttl: Duration,
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Read and remove an entry in one atomic step.
    async fn take(&self, key: &str) -> Result<Option<String>>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Atomically increment a counter. The TTL is armed only when the
    /// increment creates the counter (0 -> 1).
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount>;

    async fn ping(&self) -> Result<()>;
}

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Reads skip expired entries; writes sweep the whole map at most
/// once per interval.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct State {
    entries: HashMap<String, Entry>,
    next_sweep: Instant,
}

impl State {
    fn sweep(&mut self, now: Instant) {
        if now >= self.next_sweep {
            self.entries.retain(|_, entry| entry.is_live(now));
            self.next_sweep = now + SWEEP_INTERVAL;
        }
    }
}

/// Process-local backend used for development and tests.
///
/// Uses `tokio::time`, so paused-clock tests observe expiry deterministically.
#[derive(Debug)]
pub struct MemoryKeyValueStore {
    state: Mutex<State>,
}

impl Default for MemoryKeyValueStore {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                entries: HashMap::new(),
                next_sweep: Instant::now() + SWEEP_INTERVAL,
            }),
        }
    }
}

impl MemoryKeyValueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.sweep(now);
        state.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let state = self.state.lock().await;
        Ok(state
            .entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn take(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        Ok(state
            .entries
            .remove(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.state.lock().await.entries.remove(key);
        Ok(())
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.sweep(now);
        let entry = state.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: "0".to_string(),
            expires_at: now + window,
        });
        if !entry.is_live(now) {
            entry.value = "0".to_string();
            entry.expires_at = now + window;
        }

        let count = entry
            .value
            .parse::<u64>()
            .map_err(|_| anyhow!("value at {key} is not a counter"))?
            .saturating_add(1);
        entry.value = count.to_string();

        Ok(WindowCount {
            count,
            ttl: entry.expires_at.saturating_duration_since(now),
        })
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
