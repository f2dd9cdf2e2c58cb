//! Windowed counter store abstraction.
//!
//! Counters are keyed by `load:{restaurant_id}:{bucket_start}`. The store's
//! own atomicity is what keeps concurrent increments from losing updates;
//! callers never wrap it in an application-level lock.

use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Short backend name used in logs and the live-context source tag.
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> Result<()>;

    /// Atomically add 1 and return the new count.
    async fn increment(&self, key: &str) -> Result<u64>;

    /// (Re-)arm the key's time-to-live. No-op for absent keys.
    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Increment and re-arm the TTL as one atomic unit.
    async fn increment_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64>;

    /// Batched read. Missing or expired keys come back as `None`.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<u64>>>;

    /// Overwrite a value with a fresh TTL (simulation overrides).
    async fn set_with_expiry(&self, key: &str, value: u64, ttl: Duration) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    value: u64,
    expires_at: Option<Instant>,
}

impl Entry {
    #[inline]
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// In-process counter store.
///
/// Every operation runs under one short `parking_lot` critical section, which
/// gives the same linearizability the Redis backend gets from `MULTI`. TTLs
/// run on `tokio::time::Instant`, so paused-clock tests can time-travel.
#[derive(Default)]
pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Periodically purge expired entries so idle keys don't accumulate.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let removed = store.purge_expired();
                if removed > 0 {
                    debug!(removed, "Purged expired counters");
                }
            }
        })
    }

    fn bump(&self, key: &str, ttl: Option<Duration>) -> u64 {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.to_string()).or_insert(Entry {
            value: 0,
            expires_at: None,
        });
        if !entry.is_live(now) {
            *entry = Entry {
                value: 0,
                expires_at: None,
            };
        }
        entry.value += 1;
        if let Some(ttl) = ttl {
            entry.expires_at = Some(now + ttl);
        }
        entry.value
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn increment(&self, key: &str) -> Result<u64> {
        Ok(self.bump(key, None))
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let live = entries.get(key).map(|e| e.is_live(now));
        match live {
            Some(true) => {
                if let Some(entry) = entries.get_mut(key) {
                    entry.expires_at = Some(now + ttl);
                }
            }
            Some(false) => {
                entries.remove(key);
            }
            None => {}
        }
        Ok(())
    }

    async fn increment_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64> {
        Ok(self.bump(key, Some(ttl)))
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<u64>>> {
        let now = Instant::now();
        let entries = self.entries.lock();
        Ok(keys
            .iter()
            .map(|k| entries.get(k).filter(|e| e.is_live(now)).map(|e| e.value))
            .collect())
    }

    async fn set_with_expiry(&self, key: &str, value: u64, ttl: Duration) -> Result<()> {
        let expires_at = Some(Instant::now() + ttl);
        self.entries
            .lock()
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_increment_creates_then_counts() {
        let store = MemoryCounterStore::new();
        assert_eq!(store.increment("load:r1:0").await.unwrap(), 1);
        assert_eq!(store.increment("load:r1:0").await.unwrap(), 2);
        let values = store
            .get_many(&["load:r1:0".to_string(), "load:r1:300".to_string()])
            .await
            .unwrap();
        assert_eq!(values, vec![Some(2), None]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_resets_on_every_write() {
        let store = MemoryCounterStore::new();
        let ttl = Duration::from_secs(3600);
        let key = "load:r1:0".to_string();

        store.increment_with_expiry(&key, ttl).await.unwrap();
        tokio::time::advance(Duration::from_secs(3000)).await;
        store.increment_with_expiry(&key, ttl).await.unwrap();

        // 3000 + 3000 = 6000s after creation, but only 3000s since last write.
        tokio::time::advance(Duration::from_secs(3000)).await;
        assert_eq!(store.get_many(&[key.clone()]).await.unwrap(), vec![Some(2)]);

        tokio::time::advance(Duration::from_secs(601)).await;
        assert_eq!(store.get_many(&[key.clone()]).await.unwrap(), vec![None]);

        // Expired key restarts from 1.
        assert_eq!(store.increment_with_expiry(&key, ttl).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_expiry_on_absent_key_is_noop() {
        let store = MemoryCounterStore::new();
        store
            .set_expiry("load:missing:0", Duration::from_secs(10))
            .await
            .unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let store = MemoryCounterStore::new();
        store
            .set_with_expiry("simulation:r1", 5, Duration::from_secs(1200))
            .await
            .unwrap();
        store
            .increment_with_expiry("load:r1:0", Duration::from_secs(3600))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(1201)).await;
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_lose_nothing() {
        let store = Arc::new(MemoryCounterStore::new());
        let ttl = Duration::from_secs(3600);
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for _ in 0..250 {
                    store.increment_with_expiry("load:r1:0", ttl).await.unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let values = store.get_many(&["load:r1:0".to_string()]).await.unwrap();
        assert_eq!(values, vec![Some(4000)]);
    }
}
