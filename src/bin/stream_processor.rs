//! Stream Processor
//!
//! Consumes order lifecycle events and maintains the per-restaurant windowed
//! load counters that the ETA service reads.
//!
//! Usage:
//!   stream_processor --config eta.toml --source websocket --url ws://feed:9001/order_events
//!   producer | stream_processor --source stdin
//!
//! Environment Variables:
//!   ETA_CONFIG_PATH - Path to TOML config file
//!   REDIS_URL / REDIS_HOST + REDIS_PORT - Counter store
//!   EVENT_SOURCE, EVENT_SOURCE_URL, EVENT_SOURCE_ADDR - Event feed

use std::time::Duration;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use eta_engine::{
    config::{EngineConfig, EventSourceKind},
    stream::{build_source, StreamProcessor},
    window::connect_store,
};

#[derive(Parser, Debug)]
#[command(name = "stream_processor")]
#[command(about = "Fold order events into windowed restaurant load counters")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "ETA_CONFIG_PATH")]
    config: Option<String>,

    /// Event feed kind (websocket, stdin, tcp)
    #[arg(short, long)]
    source: Option<String>,

    /// WebSocket feed URL
    #[arg(long)]
    url: Option<String>,

    /// TCP address for newline-delimited JSON
    #[arg(long)]
    addr: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = EngineConfig::load(args.config.as_deref().map(std::path::Path::new))?;
    if let Some(kind) = args.source.as_deref() {
        config.stream.source = EventSourceKind::parse(kind)
            .ok_or_else(|| anyhow::anyhow!("Unknown event source '{}'", kind))?;
    }
    if let Some(url) = args.url {
        config.stream.url = url;
    }
    if let Some(addr) = args.addr {
        config.stream.addr = addr;
    }

    info!("🚀 Starting stream processor");

    // Without a store there is nothing to write to; exit non-zero.
    let store = match connect_store(&config.store).await {
        Ok(store) => store,
        Err(e) => {
            error!("❌ {:#}", e);
            return Err(e);
        }
    };

    let source = build_source(&config.stream).await?;
    let processor = StreamProcessor::new(store, &config.window);
    let stats_every = Duration::from_secs(config.stream.stats_interval_secs);

    tokio::select! {
        result = processor.run(source, stats_every) => result?,
        _ = tokio::signal::ctrl_c() => {
            let s = processor.stats().snapshot();
            info!(
                processed = s.processed,
                skipped = s.skipped,
                failed = s.failed,
                "🛑 Shutdown signal received"
            );
        }
    }

    Ok(())
}
