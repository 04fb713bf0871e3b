use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use tokio::{sync::Mutex, time::Instant};

use crate::{errors::Error, store::KvStore, Result};

#[derive(Clone, Debug)]
struct Entry {
    value: u64,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-process [`KvStore`]: one mutex over one map.
///
/// Every operation holds the lock for its whole read-modify-write, which is
/// what makes `set_if_absent` and `increment_below` atomic. Expired entries
/// are ignored on read and dropped lazily; [`MemoryStore::purge_expired`]
/// bounds memory for keys that are never touched again.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut map = self.entries.lock().await;
        let before = map.len();
        map.retain(|_, e| e.is_live(now));
        before - map.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn expiry(now: Instant, ttl: Duration) -> Result<Instant> {
    now.checked_add(ttl)
        .ok_or_else(|| Error::Store(format!("ttl out of range: {ttl:?}")))
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let expires_at = expiry(now, ttl)?;
        let mut map = self.entries.lock().await;
        if map.get(key).is_some_and(|e| e.is_live(now)) {
            return Ok(false);
        }
        map.insert(
            key.to_string(),
            Entry {
                value: 1,
                expires_at,
            },
        );
        Ok(true)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        let map = self.entries.lock().await;
        Ok(map.get(key).is_some_and(|e| e.is_live(now)))
    }

    async fn count(&self, key: &str) -> Result<u64> {
        let now = Instant::now();
        let map = self.entries.lock().await;
        Ok(map
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value)
            .unwrap_or(0))
    }

    async fn increment_below(
        &self,
        key: &str,
        ceiling: u64,
        window: Duration,
    ) -> Result<Option<u64>> {
        let now = Instant::now();
        let mut map = self.entries.lock().await;

        if let Some(entry) = map.get_mut(key).filter(|e| e.is_live(now)) {
            if entry.value >= ceiling {
                return Ok(None);
            }
            entry.value += 1;
            return Ok(Some(entry.value));
        }

        if ceiling == 0 {
            return Ok(None);
        }
        map.insert(
            key.to_string(),
            Entry {
                value: 1,
                expires_at: expiry(now, window)?,
            },
        );
        Ok(Some(1))
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let now = Instant::now();
        let map = self.entries.lock().await;
        Ok(map
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.expires_at.saturating_duration_since(now)))
    }
}
