//! Process entry point: CLI/env config, tracing init, axum router, and
//! graceful shutdown, mirroring the teacher's own `main.rs` bootstrap shape
//! (load env, init tracing, assemble shared state, build the router, serve).
//!
//! Exit codes: 0 normal, 1 fatal error (§6 CLI surface).

use anyhow::{Context, Result};
use backtest_core::command::CommandDispatcher;
use backtest_core::config::{Cli, Config};
use backtest_core::data_provider::{DataProvider, Record, VecDataProvider};
use backtest_core::event_bus::EventBus;
use backtest_core::replay_controller::ReplayController;
use backtest_core::session::{self, AppState};
use backtest_core::snapshot_manager::SnapshotManager;
use chrono::Utc;
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        tracing::error!(error = %err, "fatal error, exiting");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env().apply_cli(&cli);
    init_tracing(config.debug);

    info!(host = %config.host, port = config.port, "backtest-core starting");

    let bus = Arc::new(EventBus::new());
    let manager = Arc::new(SnapshotManager::new());
    let provider: Arc<dyn DataProvider> = Arc::new(load_data_provider());
    let total = provider.len().unwrap_or(0);

    let controller = ReplayController::new(config.replay_config());
    let now = Utc::now();
    controller
        .initialize(bus.clone(), manager.clone(), provider, now, now, total)
        .context("replay controller initialization failed")?;
    info!(total_records = total, "replay controller initialized, awaiting commands");

    let dispatcher = Arc::new(CommandDispatcher::new(controller, None, None));
    let app_state = AppState::new(dispatcher, &bus, None, config.session_config());
    let app = session::router(app_state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening for session connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

/// Reads a JSON array of [`Record`] from `BACKTEST_DATA_FILE` if set; an
/// empty provider otherwise, leaving the controller initialized with
/// `total = 0` until a real data source is wired in (data ingestion is a
/// deployment concern, not part of the wire protocol — see spec §1
/// Non-goals on real exchange connectivity).
fn load_data_provider() -> VecDataProvider {
    let Ok(path) = std::env::var("BACKTEST_DATA_FILE") else {
        warn!("BACKTEST_DATA_FILE not set; starting with an empty data provider");
        return VecDataProvider::new(Vec::new());
    };
    match std::fs::read_to_string(&path) {
        Ok(text) => match serde_json::from_str::<Vec<Record>>(&text) {
            Ok(records) => {
                info!(path = %path, count = records.len(), "loaded data provider records");
                VecDataProvider::new(records)
            }
            Err(e) => {
                warn!(path = %path, error = %e, "failed to parse BACKTEST_DATA_FILE; starting empty");
                VecDataProvider::new(Vec::new())
            }
        },
        Err(e) => {
            warn!(path = %path, error = %e, "failed to read BACKTEST_DATA_FILE; starting empty");
            VecDataProvider::new(Vec::new())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}

fn init_tracing(debug: bool) {
    let default_filter = if debug {
        "backtest_core=debug,tower_http=debug"
    } else {
        "backtest_core=info,tower_http=info"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
