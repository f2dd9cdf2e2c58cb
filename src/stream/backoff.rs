//! Exponential reconnect backoff with jitter.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
    /// ±fraction of the capped delay
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        // 100ms base, 2x multiplier, 30s cap, ±30% jitter
        Self {
            base_ms: 100,
            max_ms: 30_000,
            multiplier: 2.0,
            jitter_factor: 0.3,
        }
    }
}

#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    pub fn next_backoff(&mut self) -> Duration {
        let base = (self.config.base_ms as f64) * self.config.multiplier.powi(self.attempt as i32);
        let capped = base.min(self.config.max_ms as f64);

        let jitter_range = capped * self.config.jitter_factor;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        let final_ms = (capped + jitter).max(self.config.base_ms as f64);

        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(final_ms as u64)
    }

    /// Reset after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grows_and_caps() {
        let mut b = Backoff::new(BackoffConfig {
            jitter_factor: 0.0,
            ..BackoffConfig::default()
        });
        assert_eq!(b.next_backoff(), Duration::from_millis(100));
        assert_eq!(b.next_backoff(), Duration::from_millis(200));
        assert_eq!(b.next_backoff(), Duration::from_millis(400));
        for _ in 0..20 {
            b.next_backoff();
        }
        assert_eq!(b.next_backoff(), Duration::from_millis(30_000));
        b.reset();
        assert_eq!(b.attempt(), 0);
        assert_eq!(b.next_backoff(), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        // attempt 5: 100 * 2^5 = 3200ms ±30%
        for _ in 0..50 {
            let mut sample = Backoff::new(BackoffConfig::default());
            for _ in 0..5 {
                sample.next_backoff();
            }
            let d = sample.next_backoff().as_millis() as f64;
            assert!((2239.0..=4160.0).contains(&d), "{}", d);
        }
    }
}
