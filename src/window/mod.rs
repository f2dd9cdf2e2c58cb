//! Sliding-window restaurant load.
//!
//! Events are folded into 5-minute buckets keyed `load:{id}:{bucket_start}`;
//! the read path sums the last four buckets (20 minutes) plus an optional
//! `simulation:{id}` override.

pub mod bucket;
pub mod connect;
pub mod reader;
pub mod redis_store;
pub mod store;

pub use bucket::{bucket_start, load_key, simulation_key, unix_now};
pub use connect::{connect_store, connect_store_or_degraded, UnavailableStore};
pub use reader::{LiveLoad, LiveLoadReader, LoadSource};
pub use redis_store::RedisCounterStore;
pub use store::{CounterStore, MemoryCounterStore};
