//! Replay session demo.
//!
//! Demonstrates a full single-step replay session over an in-memory data
//! provider: publish through the Event Bus, subscribe a console printer,
//! save a mid-run snapshot, then restore it to show the bus's sequence
//! counter following it across the load.
//!
//! Run with:
//!   cargo run --example replay_session_demo

use backtest_core::data_provider::{DataProvider, Record, VecDataProvider};
use backtest_core::event::{Event, EventKind, MarketData};
use backtest_core::event_bus::EventBus;
use backtest_core::replay_controller::{ReplayConfig, ReplayController};
use backtest_core::snapshot_manager::SnapshotManager;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

const BOX_H: &str = "═";
const FG_CYAN: &str = "\x1b[96m";
const FG_GREEN: &str = "\x1b[92m";
const RESET: &str = "\x1b[0m";

fn banner(title: &str) {
    let rule: String = BOX_H.repeat(52);
    println!("{FG_CYAN}{rule}{RESET}");
    println!("{FG_CYAN} {title}{RESET}");
    println!("{FG_CYAN}{rule}{RESET}");
}

fn bar_records(n: u64) -> Vec<Record> {
    let start: DateTime<Utc> = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
    (0..n)
        .map(|i| Record {
            timestamp: start + chrono::Duration::minutes(i as i64),
            data: MarketData {
                symbol: "BTC/USDT".into(),
                exchange: "binance".into(),
                close: Some(50_000.0 + i as f64 * 10.0),
                ..Default::default()
            },
        })
        .collect()
}

fn print_event(event: &Event) -> Result<(), String> {
    println!(
        "  {FG_GREEN}#{:<4}{RESET} {:?} @ {}",
        event.sequence,
        event.kind,
        event.timestamp.format("%H:%M:%S")
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    banner("REPLAY SESSION DEMO");

    let bus = Arc::new(EventBus::new());
    bus.subscribe(EventKind::Bar, Arc::new(print_event));

    let manager = Arc::new(SnapshotManager::new());
    let provider: Arc<dyn DataProvider> = Arc::new(VecDataProvider::new(bar_records(10)));
    let controller = ReplayController::new(ReplayConfig {
        time_unit: Duration::from_millis(1),
        snapshot_dir: std::env::temp_dir().join("replay_session_demo"),
        ..Default::default()
    });

    let start = bar_records(1)[0].timestamp;
    controller
        .initialize(bus.clone(), manager, provider, start, start, 10)
        .expect("initialize");

    println!("\nStepping through 5 of 10 records...");
    for _ in 0..5 {
        controller.step().expect("step");
    }

    let path = controller.save_snapshot(Some("demo checkpoint".into())).expect("save_snapshot");
    println!("\nSaved snapshot to {}", path.display());

    println!("Seeking back to index 0, then restoring the snapshot...");
    controller.seek_to_index(0).expect("seek_to_index");
    controller.load_snapshot(&path).expect("load_snapshot");

    let status = controller.get_status();
    println!(
        "\nAfter restore: index={}, event_sequence={}, progress={:.0}%",
        status.current_index, status.event_sequence, status.progress_percent
    );

    println!("\nStepping the remaining records...");
    loop {
        match controller.step() {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                eprintln!("step failed: {e}");
                break;
            }
        }
    }

    let status = controller.get_status();
    println!(
        "\nFinal status: state={:?}, event_sequence={}, progress={:.0}%",
        status.state, status.event_sequence, status.progress_percent
    );
}
