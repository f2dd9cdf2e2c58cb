//! Bucket clock and counter key derivation.
//!
//! Writers (the stream processor) and readers (the live load reader) both
//! derive keys through these functions, so bucket boundaries always agree.

/// Default bucket width: 5 minutes.
pub const BUCKET_SIZE_SECS: i64 = 300;
/// Default counter retention, measured from the last write.
pub const RETENTION_SECS: u64 = 3600;
/// Default number of buckets in the rolling read (4 x 5 min = 20 min).
pub const WINDOW_BUCKETS: usize = 4;
/// Default lifetime of an operator-injected simulation override.
pub const SIMULATION_TTL_SECS: u64 = 1200;

/// Start of the bucket containing `ts`.
///
/// Floors toward negative infinity, so pre-epoch timestamps land in the
/// bucket that actually contains them.
#[inline]
pub fn bucket_start(ts: i64, size: i64) -> i64 {
    debug_assert!(size > 0, "bucket size must be positive");
    ts.div_euclid(size) * size
}

/// Bucket start for a fractional event timestamp.
#[inline]
pub fn bucket_start_f64(ts: f64, size: i64) -> i64 {
    bucket_start(ts.floor() as i64, size)
}

/// Bucket starts for the current bucket and the `n - 1` before it, newest first.
pub fn recent_buckets(now: i64, n: usize, size: i64) -> Vec<i64> {
    let current = bucket_start(now, size);
    (0..n as i64).map(|i| current - i * size).collect()
}

#[inline]
pub fn load_key(restaurant_id: &str, bucket_start: i64) -> String {
    format!("load:{}:{}", restaurant_id, bucket_start)
}

#[inline]
pub fn simulation_key(restaurant_id: &str) -> String {
    format!("simulation:{}", restaurant_id)
}

/// Wall-clock unix seconds.
#[inline]
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
