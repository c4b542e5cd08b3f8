//! Startup configuration (§6 Configuration, §6 CLI surface).
//!
//! Host, port, heartbeat interval/timeout, max message size, reconnect
//! grace period, replay time-unit, initial speed, auto-snapshot interval,
//! and snapshot directory, all supplied at startup — env first (via
//! [`Config::from_env`], the teacher's `models::Config` pattern), then
//! overridden by the `--host/--port/--heartbeat-interval/--heartbeat-timeout/--debug`
//! CLI flags the original entry point exposes.

use crate::replay_controller::{ReplayConfig, ReplaySpeed};
use crate::session::SessionConfig;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line overrides. Mirrors the original `--host/--port/
/// --heartbeat-interval/--heartbeat-timeout/--debug` surface; anything not
/// passed falls back to the environment-derived [`Config`].
#[derive(Debug, Parser)]
#[command(name = "backtest-core", about = "Interactive backtesting platform core")]
pub struct Cli {
    #[arg(long, env = "BACKTEST_HOST")]
    pub host: Option<String>,

    #[arg(long, env = "BACKTEST_PORT")]
    pub port: Option<u16>,

    #[arg(long = "heartbeat-interval", env = "BACKTEST_HEARTBEAT_INTERVAL")]
    pub heartbeat_interval: Option<f64>,

    #[arg(long = "heartbeat-timeout", env = "BACKTEST_HEARTBEAT_TIMEOUT")]
    pub heartbeat_timeout: Option<f64>,

    #[arg(long, env = "BACKTEST_DEBUG")]
    pub debug: bool,
}

/// Fully-resolved runtime configuration, assembled from the environment
/// (`Config::from_env`) and then the CLI flags layered on top.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub max_message_size: usize,
    pub reconnect_grace_period: Duration,
    pub replay_time_unit: Duration,
    pub replay_initial_speed: ReplaySpeed,
    pub auto_snapshot_interval: u64,
    pub snapshot_dir: PathBuf,
    pub initial_cash: f64,
    pub debug: bool,
}

impl Config {
    /// Reads every field from the environment (`.env` loaded by the caller
    /// via `dotenv`, same as the teacher's bootstrap), falling back to the
    /// documented defaults from §6/§4.3.
    pub fn from_env() -> Self {
        let host = std::env::var("BACKTEST_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = std::env::var("BACKTEST_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8765);
        let heartbeat_interval = std::env::var("BACKTEST_HEARTBEAT_INTERVAL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30.0);
        let heartbeat_timeout = std::env::var("BACKTEST_HEARTBEAT_TIMEOUT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60.0);
        let max_message_size = std::env::var("BACKTEST_MAX_MESSAGE_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1 << 20);
        let reconnect_grace_period = std::env::var("BACKTEST_RECONNECT_GRACE_PERIOD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(300.0);
        let replay_time_unit_ms = std::env::var("BACKTEST_REPLAY_TIME_UNIT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1000u64);
        let replay_initial_speed = match std::env::var("BACKTEST_REPLAY_INITIAL_SPEED")
            .unwrap_or_else(|_| "1".to_string())
            .as_str()
        {
            "2" => ReplaySpeed::X2,
            "4" => ReplaySpeed::X4,
            "10" => ReplaySpeed::X10,
            "unlimited" => ReplaySpeed::Unlimited,
            _ => ReplaySpeed::X1,
        };
        let auto_snapshot_interval = std::env::var("BACKTEST_AUTO_SNAPSHOT_INTERVAL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1000);
        let snapshot_dir = std::env::var("BACKTEST_SNAPSHOT_DIR")
            .unwrap_or_else(|_| "snapshots".to_string())
            .into();
        let initial_cash = std::env::var("BACKTEST_INITIAL_CASH")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(100_000.0);
        let debug = std::env::var("BACKTEST_DEBUG")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
            .unwrap_or(false);

        Self {
            host,
            port,
            heartbeat_interval: Duration::from_secs_f64(heartbeat_interval),
            heartbeat_timeout: Duration::from_secs_f64(heartbeat_timeout),
            max_message_size,
            reconnect_grace_period: Duration::from_secs_f64(reconnect_grace_period),
            replay_time_unit: Duration::from_millis(replay_time_unit_ms),
            replay_initial_speed,
            auto_snapshot_interval,
            snapshot_dir,
            initial_cash,
            debug,
        }
    }

    /// Layers CLI flags over an env-derived config; a flag present on the
    /// command line always wins.
    pub fn apply_cli(mut self, cli: &Cli) -> Self {
        if let Some(host) = &cli.host {
            self.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(secs) = cli.heartbeat_interval {
            self.heartbeat_interval = Duration::from_secs_f64(secs);
        }
        if let Some(secs) = cli.heartbeat_timeout {
            self.heartbeat_timeout = Duration::from_secs_f64(secs);
        }
        self.debug = self.debug || cli.debug;
        self
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            heartbeat_interval: self.heartbeat_interval,
            heartbeat_timeout: self.heartbeat_timeout,
            reconnect_grace_period: self.reconnect_grace_period,
            max_message_size: self.max_message_size,
        }
    }

    pub fn replay_config(&self) -> ReplayConfig {
        ReplayConfig {
            initial_speed: self.replay_initial_speed,
            time_unit: self.replay_time_unit,
            auto_snapshot_interval: self.auto_snapshot_interval,
            snapshot_dir: self.snapshot_dir.clone(),
            initial_cash: self.initial_cash,
        }
    }
}
