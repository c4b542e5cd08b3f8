//! End-to-end snapshot save/load/version-gating tests (P5, P6 from
//! spec.md §8), exercised through the public `ReplayController` API.

use backtest_core::data_provider::{DataProvider, Record, VecDataProvider};
use backtest_core::event::MarketData;
use backtest_core::event_bus::EventBus;
use backtest_core::replay_controller::{ReplayConfig, ReplayController};
use backtest_core::snapshot_manager::SnapshotManager;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

fn bar_records(n: u64) -> Vec<Record> {
    let start: DateTime<Utc> = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
    (0..n)
        .map(|i| Record {
            timestamp: start + chrono::Duration::seconds(i as i64),
            data: MarketData {
                symbol: "BTC/USDT".into(),
                exchange: "binance".into(),
                close: Some(50_000.0 + i as f64),
                ..Default::default()
            },
        })
        .collect()
}

fn controller_with(n: u64, snapshot_dir: std::path::PathBuf) -> (ReplayController, Arc<EventBus>) {
    let bus = Arc::new(EventBus::new());
    let manager = Arc::new(SnapshotManager::new());
    let provider: Arc<dyn DataProvider> = Arc::new(VecDataProvider::new(bar_records(n)));
    let controller = ReplayController::new(ReplayConfig {
        time_unit: Duration::from_millis(1),
        snapshot_dir,
        ..Default::default()
    });
    let start = bar_records(1)[0].timestamp;
    controller
        .initialize(bus.clone(), manager, provider, start, start, n)
        .expect("initialize");
    (controller, bus)
}

#[test]
fn snapshot_round_trips_bus_sequence_across_a_seek() {
    let dir = tempfile::tempdir().unwrap();
    let (controller, bus) = controller_with(10, dir.path().to_path_buf());

    for _ in 0..4 {
        controller.step().unwrap();
    }
    let sequence_at_save = bus.current_sequence();
    let index_at_save = controller.get_status().current_index;

    let path = controller.save_snapshot(Some("mid-run checkpoint".into())).unwrap();
    assert!(path.exists());

    controller.seek_to_index(0).unwrap();
    assert_ne!(controller.get_status().current_index, index_at_save);

    let loaded = controller.load_snapshot(&path).unwrap();
    assert!(loaded);

    let status = controller.get_status();
    assert_eq!(status.current_index, index_at_save);
    assert_eq!(status.event_sequence, sequence_at_save);
    assert_eq!(
        bus.current_sequence(),
        sequence_at_save,
        "restoring a 1.1.0 snapshot must carry the bus's sequence counter forward with it"
    );
}

#[test]
fn loading_a_missing_snapshot_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (controller, _bus) = controller_with(5, dir.path().to_path_buf());
    let missing = dir.path().join("does_not_exist.json");
    let err = controller.load_snapshot(&missing).unwrap_err();
    assert_eq!(err.code(), "SNAPSHOT_NOT_FOUND");
}

#[test]
fn loading_a_1_0_0_snapshot_leaves_the_bus_sequence_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let (controller, bus) = controller_with(10, dir.path().to_path_buf());

    for _ in 0..4 {
        controller.step().unwrap();
    }
    let index_at_save = controller.get_status().current_index;
    let path = controller.save_snapshot(Some("legacy checkpoint".into())).unwrap();

    // Rewrite the saved document as a 1.0.0 snapshot with a sequence that
    // would be obviously wrong if restored, so a buggy unconditional
    // restore is caught by the assertion below.
    let raw = std::fs::read_to_string(&path).unwrap();
    let mut doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
    doc["version"] = serde_json::json!("1.0.0");
    doc["event_sequence"] = serde_json::json!(999);
    std::fs::write(&path, serde_json::to_string_pretty(&doc).unwrap()).unwrap();

    for _ in 0..2 {
        controller.step().unwrap();
    }
    let sequence_before_load = bus.current_sequence();

    controller.seek_to_index(0).unwrap();
    let loaded = controller.load_snapshot(&path).unwrap();
    assert!(loaded);

    let status = controller.get_status();
    assert_eq!(status.current_index, index_at_save);
    assert_eq!(
        bus.current_sequence(),
        sequence_before_load,
        "loading a 1.0.0 snapshot must leave the bus's sequence counter untouched"
    );
}

#[test]
fn manager_rejects_a_snapshot_with_an_incompatible_version() {
    let dir = tempfile::tempdir().unwrap();
    let manager = SnapshotManager::new();
    let mut snapshot = manager.create_snapshot(
        backtest_core::snapshot::AccountState::new(100_000.0, 0.0),
        Vec::new(),
        Vec::new(),
        42,
        Vec::new(),
        Utc::now(),
        7,
        Some("bt-1".into()),
        None,
    );
    snapshot.version = "0.9.0".into();
    let path = dir.path().join("old.json");
    manager.save(&snapshot, &path).unwrap();

    let err = manager.load(&path).unwrap_err();
    assert_eq!(err.code(), "SNAPSHOT_VERSION_MISMATCH");
}
