//! ETA engine service.
//!
//! Loads the three scoring stages, connects the counter store and routing
//! client, optionally runs an embedded stream consumer, and serves the
//! estimate API.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use eta_engine::{
    api::{create_router, AppState},
    config::EngineConfig,
    orchestrator::EstimationOrchestrator,
    routing::OsrmClient,
    scoring::StageRegistry,
    stream::{build_source, StreamProcessor},
    window::{connect_store_or_degraded, LiveLoadReader},
};

#[derive(Parser, Debug)]
#[command(name = "eta-engine")]
#[command(about = "Real-time delivery ETA service")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "ETA_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Override server.bind_addr
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let args = Args::parse();
    let mut config = EngineConfig::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }

    info!("🚀 Starting ETA engine v{}", env!("CARGO_PKG_VERSION"));

    let stages = match StageRegistry::load(&config.models) {
        Ok(stages) => stages,
        Err(e) => {
            error!("❌ Failed to load scoring models: {:#}", e);
            return Err(e);
        }
    };
    if stages.is_ready() {
        info!("✅ All scoring stages loaded");
    }

    let store = connect_store_or_degraded(&config.store).await;
    let router = OsrmClient::new(&config.routing)?;
    info!(osrm = %config.routing.osrm_host, "🗺️  Routing client ready");

    if config.stream.embedded {
        let processor = StreamProcessor::new(store.clone(), &config.window);
        let stream_cfg = config.stream.clone();
        tokio::spawn(async move {
            let stats_every = Duration::from_secs(stream_cfg.stats_interval_secs);
            let result = match build_source(&stream_cfg).await {
                Ok(source) => processor.run(source, stats_every).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                error!("❌ Embedded stream processor stopped: {:#}", e);
            }
        });
        info!("📡 Embedded stream processor spawned");
    }

    let orchestrator = EstimationOrchestrator::new(
        Arc::new(stages),
        LiveLoadReader::new(store, config.window.clone()),
        Arc::new(router),
        config.estimator.backlog_penalty_secs,
    );

    let app = create_router(AppState::new(orchestrator));

    let listener = TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!("🎯 API server listening on {}", config.server.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("👋 ETA engine stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("🛑 Shutdown signal received");
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "eta_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // Standard dotenv search (cwd + parents), then the crate root.
    let _ = dotenv();

    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}
