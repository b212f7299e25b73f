//! Lendcore service entry point.
//!
//! Binary name: `lendcore`
//!
//! Parses CLI arguments, loads configuration from the data directory,
//! wires the application state, and serves the HTTP API. A background
//! task sweeps expired sessions and stale verification records hourly.

mod http;
mod state;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use lendcore_core::storage::VerificationLedger;
use lendcore_infra::config::load_app_config;
use state::AppState;

/// Interval between background cleanup sweeps.
const CLEANUP_INTERVAL_SECS: u64 = 3_600;

#[derive(Debug, Parser)]
#[command(name = "lendcore", about = "Multi-agent loan origination chat service")]
struct Args {
    /// Data directory holding config.toml, contexts, and uploads.
    #[arg(long, default_value = "data", env = "LENDCORE_DATA_DIR")]
    data_dir: PathBuf,

    /// Override the bind address from config.toml.
    #[arg(long)]
    bind: Option<String>,

    /// Export spans through the OpenTelemetry stdout pipeline.
    #[arg(long, default_value_t = false)]
    otel: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    lendcore_observe::tracing_setup::init_tracing(args.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let mut config = load_app_config(&args.data_dir).await;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }

    let state = AppState::init(&args.data_dir, &config).await?;
    spawn_cleanup_task(state.clone());

    let router = http::router::build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "lendcore listening");

    axum::serve(listener, router).await?;

    lendcore_observe::tracing_setup::shutdown_tracing();
    Ok(())
}

/// Hourly sweep of idle sessions and stale verification records.
fn spawn_cleanup_task(state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(CLEANUP_INTERVAL_SECS));
        interval.tick().await;
        loop {
            interval.tick().await;
            let sessions_cleaned = state.sessions().cleanup_expired_sessions().await;
            let records_cleaned = state.sessions().ledger().cleanup_stale();
            tracing::info!(sessions_cleaned, records_cleaned, "cleanup sweep finished");
        }
    });
}
