//! Engine configuration.
//!
//! Defaults, then an optional TOML file, then environment overrides.

use std::path::Path;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

use crate::window::bucket::{BUCKET_SIZE_SECS, RETENTION_SECS, SIMULATION_TTL_SECS, WINDOW_BUCKETS};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub window: WindowConfig,
    pub routing: RoutingConfig,
    pub models: ModelConfig,
    pub estimator: EstimatorConfig,
    pub stream: StreamConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl StoreBackend {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Some(Self::Redis),
            "memory" | "mem" => Some(Self::Memory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub redis_url: String,
    /// Upper bound on any single store round trip
    pub op_timeout_ms: u64,
    /// Startup connection attempts before giving up
    pub connect_attempts: u32,
    pub connect_backoff_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Redis,
            redis_url: "redis://localhost:6379".to_string(),
            op_timeout_ms: 250,
            connect_attempts: 5,
            connect_backoff_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub bucket_size_secs: i64,
    pub retention_secs: u64,
    pub n_buckets: usize,
    pub simulation_ttl_secs: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            bucket_size_secs: BUCKET_SIZE_SECS,
            retention_secs: RETENTION_SECS,
            n_buckets: WINDOW_BUCKETS,
            simulation_ttl_secs: SIMULATION_TTL_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub osrm_host: String,
    pub timeout_ms: u64,
    /// Substituted whenever the provider fails
    pub fallback_distance_meters: f64,
    pub fallback_duration_seconds: f64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            osrm_host: "http://localhost:5000".to_string(),
            timeout_ms: 2000,
            fallback_distance_meters: 0.0,
            fallback_duration_seconds: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub manifest_path: String,
    pub cooking_path: Option<String>,
    pub allocation_path: Option<String>,
    pub delivery_path: Option<String>,
    /// Serve (with 503 on /predict) instead of exiting when a stage is missing
    pub allow_missing: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            manifest_path: "model_manifest.json".to_string(),
            cooking_path: None,
            allocation_path: None,
            delivery_path: None,
            allow_missing: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Extra cooking seconds per order in the restaurant's rolling window
    pub backlog_penalty_secs: u64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            backlog_penalty_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSourceKind {
    Websocket,
    Stdin,
    Tcp,
}

impl EventSourceKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "websocket" | "ws" => Some(Self::Websocket),
            "stdin" => Some(Self::Stdin),
            "tcp" => Some(Self::Tcp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub source: EventSourceKind,
    /// WebSocket feed URL
    pub url: String,
    /// TCP address for newline-delimited JSON
    pub addr: String,
    /// Run a consumer inside the service process
    pub embedded: bool,
    pub stats_interval_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            source: EventSourceKind::Websocket,
            url: "ws://localhost:9001/order_events".to_string(),
            addr: "127.0.0.1:9092".to_string(),
            embedded: false,
            stats_interval_secs: 60,
        }
    }
}

fn env_str(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_str(name).and_then(|v| v.trim().parse().ok())
}

fn env_flag(name: &str) -> Option<bool> {
    env_str(name).map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "on" | "ON" | "yes"))
}

impl EngineConfig {
    /// Defaults, optionally overlaid by a TOML file, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config {}", p.display()))?;
                toml::from_str(&content)
                    .with_context(|| format!("Invalid config {}", p.display()))?
            }
            None => Self::default(),
        };
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_env(&mut self) {
        if let Some(v) = env_str("BIND_ADDR") {
            self.server.bind_addr = v;
        }

        if let Some(b) = env_str("STORE_BACKEND").and_then(|v| StoreBackend::parse(&v)) {
            self.store.backend = b;
        }
        if let Some(url) = env_str("REDIS_URL") {
            self.store.redis_url = url;
        } else if let Some(host) = env_str("REDIS_HOST") {
            let port = env_parse::<u16>("REDIS_PORT").unwrap_or(6379);
            self.store.redis_url = format!("redis://{}:{}", host, port);
        }
        if let Some(ms) = env_parse("STORE_OP_TIMEOUT_MS") {
            self.store.op_timeout_ms = ms;
        }

        if let Some(host) = env_str("OSRM_HOST") {
            self.routing.osrm_host = host;
        }
        if let Some(ms) = env_parse("OSRM_TIMEOUT_MS") {
            self.routing.timeout_ms = ms;
        }

        if let Some(p) = env_str("MODEL_MANIFEST") {
            self.models.manifest_path = p;
        }
        if let Some(p) = env_str("COOKING_MODEL_PATH") {
            self.models.cooking_path = Some(p);
        }
        if let Some(p) = env_str("ALLOCATION_MODEL_PATH") {
            self.models.allocation_path = Some(p);
        }
        if let Some(p) = env_str("DELIVERY_MODEL_PATH") {
            self.models.delivery_path = Some(p);
        }
        if let Some(f) = env_flag("ALLOW_MISSING_MODELS") {
            self.models.allow_missing = f;
        }

        if let Some(secs) = env_parse("BACKLOG_PENALTY_SECS") {
            self.estimator.backlog_penalty_secs = secs;
        }

        if let Some(kind) = env_str("EVENT_SOURCE").and_then(|v| EventSourceKind::parse(&v)) {
            self.stream.source = kind;
        }
        if let Some(url) = env_str("EVENT_SOURCE_URL") {
            self.stream.url = url;
        }
        if let Some(addr) = env_str("EVENT_SOURCE_ADDR") {
            self.stream.addr = addr;
        }
        if let Some(f) = env_flag("EMBEDDED_STREAM") {
            self.stream.embedded = f;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let w = &self.window;
        ensure!(w.bucket_size_secs > 0, "window.bucket_size_secs must be > 0");
        ensure!(w.n_buckets >= 1, "window.n_buckets must be >= 1");
        ensure!(
            w.retention_secs >= w.bucket_size_secs as u64 * w.n_buckets as u64,
            "window.retention_secs ({}) shorter than the read window ({}s)",
            w.retention_secs,
            w.bucket_size_secs as u64 * w.n_buckets as u64
        );
        ensure!(w.simulation_ttl_secs > 0, "window.simulation_ttl_secs must be > 0");
        ensure!(self.store.op_timeout_ms > 0, "store.op_timeout_ms must be > 0");
        ensure!(self.routing.timeout_ms > 0, "routing.timeout_ms must be > 0");
        ensure!(
            self.routing.fallback_distance_meters >= 0.0
                && self.routing.fallback_duration_seconds >= 0.0,
            "routing fallback pair must be non-negative"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = EngineConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.window.bucket_size_secs, 300);
        assert_eq!(cfg.window.retention_secs, 3600);
        assert_eq!(cfg.window.n_buckets, 4);
        assert_eq!(cfg.window.simulation_ttl_secs, 1200);
        assert_eq!(cfg.estimator.backlog_penalty_secs, 60);
        assert_eq!(cfg.routing.timeout_ms, 2000);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[store]
backend = "memory"

[estimator]
backlog_penalty_secs = 120
"#
        )
        .unwrap();

        let cfg: EngineConfig =
            toml::from_str(&std::fs::read_to_string(file.path()).unwrap()).unwrap();
        assert_eq!(cfg.store.backend, StoreBackend::Memory);
        assert_eq!(cfg.store.op_timeout_ms, 250);
        assert_eq!(cfg.estimator.backlog_penalty_secs, 120);
        assert_eq!(cfg.routing.osrm_host, "http://localhost:5000");
    }

    #[test]
    fn test_retention_shorter_than_window_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.window.retention_secs = 600;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_source_kind_parse() {
        assert_eq!(EventSourceKind::parse("WS"), Some(EventSourceKind::Websocket));
        assert_eq!(EventSourceKind::parse("tcp"), Some(EventSourceKind::Tcp));
        assert_eq!(EventSourceKind::parse("kafka"), None);
        assert_eq!(StoreBackend::parse(" Redis "), Some(StoreBackend::Redis));
    }
}
