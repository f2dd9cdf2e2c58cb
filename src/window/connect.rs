//! Counter store construction with bounded startup retries.

use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tracing::{error, info, warn};

use super::redis_store::RedisCounterStore;
use super::store::{CounterStore, MemoryCounterStore};
use crate::config::{StoreBackend, StoreConfig};

/// Build the configured store, retrying the Redis handshake up to
/// `connect_attempts` times. Exhausting the attempts is an error; callers
/// decide whether that is fatal.
pub async fn connect_store(config: &StoreConfig) -> Result<Arc<dyn CounterStore>> {
    match config.backend {
        StoreBackend::Memory => {
            let store = Arc::new(MemoryCounterStore::new());
            store.spawn_sweeper(Duration::from_secs(60));
            info!("✅ Using in-memory counter store");
            Ok(store)
        }
        StoreBackend::Redis => {
            let op_timeout = Duration::from_millis(config.op_timeout_ms);
            let backoff = Duration::from_millis(config.connect_backoff_ms);
            let attempts = config.connect_attempts.max(1);

            for attempt in 1..=attempts {
                let result = match RedisCounterStore::connect(&config.redis_url, op_timeout).await {
                    Ok(store) => store.ping().await.map(|_| store),
                    Err(e) => Err(e),
                };
                match result {
                    Ok(store) => {
                        info!(url = %config.redis_url, "✅ Connected to Redis");
                        return Ok(Arc::new(store));
                    }
                    Err(e) => {
                        warn!(
                            attempt,
                            attempts,
                            error = %e,
                            "⚠️ Redis connection failed"
                        );
                        if attempt < attempts {
                            tokio::time::sleep(backoff).await;
                        }
                    }
                }
            }
            bail!(
                "Redis unreachable at {} after {} attempts",
                config.redis_url,
                attempts
            )
        }
    }
}

/// Like [`connect_store`], but a store that can't be reached is replaced by
/// [`UnavailableStore`] so the service still starts and serves zero load.
pub async fn connect_store_or_degraded(config: &StoreConfig) -> Arc<dyn CounterStore> {
    match connect_store(config).await {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "❌ Counter store unavailable, live load will read as 0");
            Arc::new(UnavailableStore::new(format!("{:#}", e)))
        }
    }
}

/// Stand-in for a store that never came up. Every operation fails, which
/// the read path turns into a zero count.
pub struct UnavailableStore {
    reason: String,
}

impl UnavailableStore {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn err(&self) -> anyhow::Error {
        anyhow!("counter store unavailable: {}", self.reason)
    }
}

#[async_trait]
impl CounterStore for UnavailableStore {
    fn backend(&self) -> &'static str {
        "unavailable"
    }

    async fn ping(&self) -> Result<()> {
        Err(self.err())
    }

    async fn increment(&self, _key: &str) -> Result<u64> {
        Err(self.err())
    }

    async fn set_expiry(&self, _key: &str, _ttl: Duration) -> Result<()> {
        Err(self.err())
    }

    async fn increment_with_expiry(&self, _key: &str, _ttl: Duration) -> Result<u64> {
        Err(self.err())
    }

    async fn get_many(&self, _keys: &[String]) -> Result<Vec<Option<u64>>> {
        Err(self.err())
    }

    async fn set_with_expiry(&self, _key: &str, _value: u64, _ttl: Duration) -> Result<()> {
        Err(self.err())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backend_always_connects() {
        let config = StoreConfig {
            backend: StoreBackend::Memory,
            ..StoreConfig::default()
        };
        let store = connect_store(&config).await.unwrap();
        assert_eq!(store.backend(), "memory");
        store.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_redis_gives_up_after_bounded_attempts() {
        let config = StoreConfig {
            backend: StoreBackend::Redis,
            // Port 1 is reserved and refuses connections.
            redis_url: "redis://127.0.0.1:1".to_string(),
            op_timeout_ms: 100,
            connect_attempts: 2,
            connect_backoff_ms: 10,
        };
        let err = connect_store(&config).await.err().unwrap();
        assert!(err.to_string().contains("after 2 attempts"));
    }

    #[tokio::test]
    async fn test_degraded_store_reads_as_zero() {
        use crate::config::WindowConfig;
        use crate::window::{LiveLoadReader, LoadSource};

        let config = StoreConfig {
            backend: StoreBackend::Redis,
            redis_url: "redis://127.0.0.1:1".to_string(),
            op_timeout_ms: 100,
            connect_attempts: 1,
            connect_backoff_ms: 10,
        };
        let store = connect_store_or_degraded(&config).await;
        assert_eq!(store.backend(), "unavailable");
        assert!(store.ping().await.is_err());

        let reader = LiveLoadReader::new(store, WindowConfig::default());
        let load = reader.read("r1", 1_700_000_000).await;
        assert_eq!(load.active_orders, 0);
        assert_eq!(load.source, LoadSource::Unavailable);
    }
}
