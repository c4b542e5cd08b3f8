//! Snapshot Manager.
//!
//! Builds snapshots from live state, persists them as a self-describing
//! textual document, reads them back with version enforcement, and
//! validates structural invariants before any consumer touches them.

use crate::error::{CoreError, CoreResult};
use crate::snapshot::{AccountState, PositionState, Snapshot, StrategyState};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

/// Current snapshot format version. Bumped to 1.1.0 when the bus-counter
/// restore behaviour was added (see the crate's design notes on the
/// bus-reset-on-load open question): a snapshot written under this version
/// is understood to restore the bus's sequence counter on load rather than
/// discard it.
pub const CURRENT_VERSION: &str = "1.1.0";

/// Versions this build can load. 1.0.0 is accepted for backward
/// compatibility but loading one leaves the bus counter untouched by the
/// manager — the controller is responsible for deciding how to handle it.
pub const COMPATIBLE_VERSIONS: &[&str] = &["1.0.0", "1.1.0"];

pub struct SnapshotManager;

impl SnapshotManager {
    pub fn new() -> Self {
        Self
    }

    /// Stamps `version = CURRENT_VERSION`, assigns a unique `snapshot_id`,
    /// and records `create_time` as wall time — one of the two legitimate
    /// wall-clock reads in the core.
    #[allow(clippy::too_many_arguments)]
    pub fn create_snapshot(
        &self,
        account: AccountState,
        positions: Vec<PositionState>,
        strategies: Vec<StrategyState>,
        event_sequence: u64,
        pending_events: Vec<Value>,
        data_timestamp: DateTime<Utc>,
        data_index: u64,
        backtest_id: Option<String>,
        description: Option<String>,
    ) -> Snapshot {
        Snapshot {
            version: CURRENT_VERSION.to_string(),
            snapshot_id: Uuid::new_v4().to_string(),
            create_time: Utc::now(),
            account,
            positions,
            strategies,
            event_sequence,
            pending_events,
            data_timestamp,
            data_index,
            backtest_id,
            description,
        }
    }

    /// Writes the snapshot's textual form to `path`, creating parent
    /// directories as needed.
    pub fn save(&self, snapshot: &Snapshot, path: impl AsRef<Path>) -> CoreResult<bool> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| CoreError::SnapshotCorrupted {
                reason: format!("failed to create snapshot directory: {e}"),
            })?;
        }
        let text = serde_json::to_string_pretty(snapshot).map_err(|e| CoreError::SnapshotCorrupted {
            reason: format!("failed to serialize snapshot: {e}"),
        })?;
        fs::write(path, text).map_err(|e| CoreError::SnapshotCorrupted {
            reason: format!("failed to write snapshot file: {e}"),
        })?;
        info!(path = %path.display(), snapshot_id = %snapshot.snapshot_id, "snapshot saved");
        Ok(true)
    }

    /// Returns `Ok(None)` if the file does not exist; otherwise parses and
    /// checks [`SnapshotManager::is_compatible`].
    pub fn load(&self, path: impl AsRef<Path>) -> CoreResult<Option<Snapshot>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(path).map_err(|e| CoreError::SnapshotCorrupted {
            reason: format!("failed to read snapshot file: {e}"),
        })?;
        let snapshot: Snapshot = serde_json::from_str(&text).map_err(|e| CoreError::SnapshotCorrupted {
            reason: format!("failed to parse snapshot JSON: {e}"),
        })?;

        if !self.is_compatible(&snapshot) {
            warn!(version = %snapshot.version, "rejected snapshot with incompatible version");
            return Err(CoreError::SnapshotVersionMismatch {
                offending: snapshot.version.clone(),
                current: CURRENT_VERSION.to_string(),
                compatible: COMPATIBLE_VERSIONS.iter().map(|s| s.to_string()).collect(),
            });
        }

        Ok(Some(snapshot))
    }

    /// Validates structural invariants. Actual re-injection into live
    /// components is performed by the Replay Controller.
    pub fn restore(&self, snapshot: &Snapshot) -> CoreResult<bool> {
        if !self.is_compatible(snapshot) {
            return Err(CoreError::SnapshotVersionMismatch {
                offending: snapshot.version.clone(),
                current: CURRENT_VERSION.to_string(),
                compatible: COMPATIBLE_VERSIONS.iter().map(|s| s.to_string()).collect(),
            });
        }
        if snapshot.snapshot_id.is_empty() {
            return Err(CoreError::SnapshotRestoreFailed {
                reason: "snapshot_id must not be empty".into(),
            });
        }
        Ok(true)
    }

    pub fn is_compatible(&self, snapshot: &Snapshot) -> bool {
        COMPATIBLE_VERSIONS.contains(&snapshot.version.as_str())
    }
}

impl Default for SnapshotManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Direction;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn sample_snapshot(manager: &SnapshotManager) -> Snapshot {
        manager.create_snapshot(
            AccountState {
                cash: 95_000.0,
                frozen_margin: 5_000.0,
                available_balance: 90_000.0,
                total_equity: 105_000.0,
                unrealized_pnl: 10_000.0,
            },
            vec![
                PositionState {
                    symbol: "BTC/USDT".into(),
                    exchange: "binance".into(),
                    direction: Direction::Long,
                    volume: 1.0,
                    cost_price: 50_000.0,
                    unrealized_pnl: 0.0,
                    margin: 0.0,
                    open_time: None,
                },
                PositionState {
                    symbol: "ETH/USDT".into(),
                    exchange: "binance".into(),
                    direction: Direction::Short,
                    volume: 10.0,
                    cost_price: 3_000.0,
                    unrealized_pnl: 0.0,
                    margin: 0.0,
                    open_time: None,
                },
            ],
            vec![StrategyState {
                strategy_id: "s1".into(),
                class_name: "MomentumStrategy".into(),
                parameters: HashMap::from([(
                    "fast".into(),
                    crate::snapshot::ParamValue::Scalar(Value::from(10)),
                )]),
                variables: HashMap::from([(
                    "position".into(),
                    crate::snapshot::ParamValue::Scalar(Value::from(1)),
                )]),
                is_active: true,
            }],
            1000,
            vec![],
            Utc::now(),
            5000,
            Some("bt-1".into()),
            None,
        )
    }

    #[test]
    fn round_trip_preserves_every_field() {
        let manager = SnapshotManager::new();
        let snap = sample_snapshot(&manager);
        let dir = tempdir().unwrap();
        let path = dir.path().join("snap.json");

        manager.save(&snap, &path).unwrap();
        let loaded = manager.load(&path).unwrap().unwrap();

        assert_eq!(snap, loaded);
        assert!(manager.is_compatible(&loaded));
    }

    #[test]
    fn load_missing_path_returns_none() {
        let manager = SnapshotManager::new();
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.json");
        assert!(manager.load(&path).unwrap().is_none());
    }

    #[test]
    fn version_outside_compatible_set_is_rejected_without_mutation() {
        let manager = SnapshotManager::new();
        let mut snap = sample_snapshot(&manager);
        snap.version = "0.0.1".to_string();
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, serde_json::to_string(&snap).unwrap()).unwrap();

        let err = manager.load(&path).unwrap_err();
        match err {
            CoreError::SnapshotVersionMismatch { offending, current, .. } => {
                assert_eq!(offending, "0.0.1");
                assert_eq!(current, CURRENT_VERSION);
            }
            other => panic!("expected SnapshotVersionMismatch, got {other:?}"),
        }
    }

    #[test]
    fn restore_rejects_incompatible_version() {
        let manager = SnapshotManager::new();
        let mut snap = sample_snapshot(&manager);
        snap.version = "9.9.9".into();
        assert!(manager.restore(&snap).is_err());
    }
}
