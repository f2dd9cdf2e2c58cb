//! Redis-backed counter store.
//!
//! Increment and expiry go out as a `MULTI`/`EXEC` pipeline so the pair is
//! applied atomically; reads are a single `MGET`. Every round trip is bounded
//! by `op_timeout` so a stalled server can't hold up a request.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tokio::time::timeout;

use super::store::CounterStore;

#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
    op_timeout: Duration,
}

impl RedisCounterStore {
    /// Open a managed connection. The manager reconnects on its own after
    /// the initial handshake succeeds.
    pub async fn connect(url: &str, op_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url).context("Invalid Redis URL")?;
        let connect_timeout = op_timeout.max(Duration::from_secs(1));
        let conn = timeout(connect_timeout, client.get_connection_manager())
            .await
            .context("Redis connect timed out")?
            .context("Failed to establish Redis connection")?;
        Ok(Self { conn, op_timeout })
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = redis::RedisResult<T>>,
    {
        timeout(self.op_timeout, fut)
            .await
            .with_context(|| format!("Redis {} timed out after {:?}", op, self.op_timeout))?
            .with_context(|| format!("Redis {} failed", op))
    }
}

#[inline]
fn ttl_secs(ttl: Duration) -> i64 {
    ttl.as_secs().max(1) as i64
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let pong: String = self
            .bounded("PING", redis::cmd("PING").query_async(&mut conn))
            .await?;
        anyhow::ensure!(pong == "PONG", "unexpected PING reply: {}", pong);
        Ok(())
    }

    async fn increment(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        self.bounded("INCR", redis::cmd("INCR").arg(key).query_async(&mut conn))
            .await
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .bounded(
                "EXPIRE",
                redis::cmd("EXPIRE")
                    .arg(key)
                    .arg(ttl_secs(ttl))
                    .query_async(&mut conn),
            )
            .await?;
        Ok(())
    }

    async fn increment_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64> {
        let mut conn = self.conn.clone();
        let (count,): (u64,) = self
            .bounded(
                "INCR+EXPIRE",
                redis::pipe()
                    .atomic()
                    .cmd("INCR")
                    .arg(key)
                    .cmd("EXPIRE")
                    .arg(key)
                    .arg(ttl_secs(ttl))
                    .ignore()
                    .query_async(&mut conn),
            )
            .await?;
        Ok(count)
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<u64>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let raw: Vec<Option<i64>> = self
            .bounded("MGET", redis::cmd("MGET").arg(keys).query_async(&mut conn))
            .await?;
        Ok(raw.into_iter().map(|v| v.map(|n| n.max(0) as u64)).collect())
    }

    async fn set_with_expiry(&self, key: &str, value: u64, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = self
            .bounded(
                "SET EX",
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("EX")
                    .arg(ttl_secs(ttl))
                    .query_async(&mut conn),
            )
            .await?;
        Ok(())
    }
}
