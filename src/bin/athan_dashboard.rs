use anyhow::Result;
use athan_rs::client::AthanClient;
use athan_rs::config::ClientConfig;
use athan_rs::sync::SyncEngine;
use athan_rs::ui::run_dashboard;
use clap::Parser;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "athan_dashboard")]
#[command(about = "Terminal dashboard for the Athan scheduler: next event, countdown and per-item settings")]
struct Args {
    /// Service URL (or set ATHAN_BASE_URL env var)
    #[arg(short, long)]
    base_url: Option<String>,

    /// Status refresh interval in seconds (overrides ATHAN_STATUS_POLL_MS)
    #[arg(long)]
    poll_seconds: Option<u64>,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging on stderr so it stays off the terminal UI
    tracing_subscriber::fmt()
        .with_env_filter(format!("athan_rs={}", args.log_level))
        .with_writer(std::io::stderr)
        .init();

    let mut config = ClientConfig::from_env_with_base_url(args.base_url)?;
    if let Some(seconds) = args.poll_seconds.filter(|s| *s > 0) {
        config.status_poll_interval = Duration::from_secs(seconds);
    }

    info!("🚀 Starting dashboard");
    info!("   Service: {}", config.base_url);
    info!("   Status TTL: {:?}", config.status_ttl);
    info!("   Poll interval: {:?}", config.status_poll_interval);

    let client = AthanClient::new(&config)?;
    let mut engine = SyncEngine::new(client, &config);

    let report = engine.load().await;
    for failure in &report.failures {
        warn!("Startup fetch failed: {}", failure);
    }

    run_dashboard(&mut engine, &config).await
}
