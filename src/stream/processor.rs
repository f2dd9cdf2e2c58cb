//! Folds order events into the windowed load counters.
//!
//! One event is one `INCR` on `load:{restaurant_id}:{bucket_start}` plus a TTL
//! re-arm, done atomically by the store. The bucket comes from the event's own
//! timestamp, never the consumer's clock, so replays land in the right window.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Result;
use tracing::{debug, info, warn};

use super::event::{LoadEvent, SkipReason};
use super::source::{EventSource, LineSource, WebSocketSource};
use crate::config::{EventSourceKind, StreamConfig, WindowConfig};
use crate::window::{bucket::bucket_start_f64, load_key, CounterStore};

#[derive(Debug, Default)]
pub struct ProcessorStats {
    pub processed: AtomicU64,
    pub skipped: AtomicU64,
    pub failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub processed: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl ProcessorStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// What happened to a single message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Counted { key: String, count: u64 },
    Skipped(SkipReason),
    StoreFailed,
}

pub struct StreamProcessor {
    store: Arc<dyn CounterStore>,
    bucket_size_secs: i64,
    retention: Duration,
    stats: Arc<ProcessorStats>,
}

impl StreamProcessor {
    pub fn new(store: Arc<dyn CounterStore>, window: &WindowConfig) -> Self {
        Self {
            store,
            bucket_size_secs: window.bucket_size_secs,
            retention: Duration::from_secs(window.retention_secs),
            stats: Arc::new(ProcessorStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<ProcessorStats> {
        self.stats.clone()
    }

    pub async fn process_message(&self, raw: &str) -> Outcome {
        let event = match LoadEvent::parse(raw) {
            Ok(ev) => ev,
            Err(reason) => {
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                debug!(reason = reason.as_str(), "Skipping malformed event");
                return Outcome::Skipped(reason);
            }
        };

        let bucket = bucket_start_f64(event.timestamp, self.bucket_size_secs);
        let key = load_key(&event.restaurant_id, bucket);

        match self.store.increment_with_expiry(&key, self.retention).await {
            Ok(count) => {
                self.stats.processed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    restaurant_id = %event.restaurant_id,
                    bucket,
                    count,
                    "Load counter incremented"
                );
                Outcome::Counted { key, count }
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "⚠️ Counter update failed, event dropped");
                Outcome::StoreFailed
            }
        }
    }

    /// Consume `source` until it reports end of feed. Per-event failures are
    /// logged and counted; only a source error ends the loop early.
    pub async fn run(
        &self,
        mut source: Box<dyn EventSource>,
        stats_every: Duration,
    ) -> Result<()> {
        info!(source = %source.describe(), "🚀 Stream processor started");
        let mut ticker = tokio::time::interval(stats_every.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                msg = source.next_message() => {
                    match msg? {
                        Some(raw) => {
                            self.process_message(&raw).await;
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    let s = self.stats.snapshot();
                    info!(
                        processed = s.processed,
                        skipped = s.skipped,
                        failed = s.failed,
                        "📊 Stream processor stats"
                    );
                }
            }
        }

        let s = self.stats.snapshot();
        info!(
            processed = s.processed,
            skipped = s.skipped,
            failed = s.failed,
            "🛑 Event feed ended"
        );
        Ok(())
    }
}

/// Open the configured event feed.
pub async fn build_source(cfg: &StreamConfig) -> Result<Box<dyn EventSource>> {
    Ok(match cfg.source {
        EventSourceKind::Websocket => Box::new(WebSocketSource::new(cfg.url.clone())),
        EventSourceKind::Stdin => Box::new(LineSource::stdin()),
        EventSourceKind::Tcp => Box::new(LineSource::connect_tcp(&cfg.addr).await?),
    })
}
