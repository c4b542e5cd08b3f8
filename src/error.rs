//! Error taxonomy for the backtest core.
//!
//! Every error the core raises carries a machine-readable `code()` and a
//! structured `details()` map so the command boundary can turn it into a
//! wire-level `error` response without re-deriving the taxonomy.

use serde_json::{json, Value};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("engine not initialized")]
    EngineNotInitialized,

    #[error("engine initialization failed: {reason}")]
    EngineInitFailed { reason: String },

    #[error("event handler failed during publish of sequence {sequence}: {reason}")]
    EventPublishFailed { sequence: u64, reason: String },

    #[error("snapshot corrupted: {reason}")]
    SnapshotCorrupted { reason: String },

    #[error("snapshot version {offending} is not compatible with {current} (compatible: {compatible:?})")]
    SnapshotVersionMismatch {
        offending: String,
        current: String,
        compatible: Vec<String>,
    },

    #[error("snapshot restore failed: {reason}")]
    SnapshotRestoreFailed { reason: String },

    #[error("snapshot not found at {path}")]
    SnapshotNotFound { path: String },

    #[error("strategy not found: {strategy_id}")]
    StrategyNotFound { strategy_id: String },

    #[error("strategy load failed: {reason}")]
    StrategyLoadFailed { reason: String },

    #[error("invalid strategy parameter {name}: {reason}")]
    StrategyParamInvalid { name: String, reason: String },

    #[error("hot reload failed: {reason}")]
    HotReloadFailed { reason: String },
}

impl CoreError {
    /// Machine-readable taxonomy code, stable across versions.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::EngineNotInitialized => "ENGINE_NOT_INITIALIZED",
            CoreError::EngineInitFailed { .. } => "ENGINE_INIT_FAILED",
            CoreError::EventPublishFailed { .. } => "EVENT_PUBLISH_FAILED",
            CoreError::SnapshotCorrupted { .. } => "SNAPSHOT_CORRUPTED",
            CoreError::SnapshotVersionMismatch { .. } => "SNAPSHOT_VERSION_MISMATCH",
            CoreError::SnapshotRestoreFailed { .. } => "SNAPSHOT_RESTORE_FAILED",
            CoreError::SnapshotNotFound { .. } => "SNAPSHOT_NOT_FOUND",
            CoreError::StrategyNotFound { .. } => "STRATEGY_NOT_FOUND",
            CoreError::StrategyLoadFailed { .. } => "STRATEGY_LOAD_FAILED",
            CoreError::StrategyParamInvalid { .. } => "STRATEGY_PARAM_INVALID",
            CoreError::HotReloadFailed { .. } => "HOT_RELOAD_FAILED",
        }
    }

    /// Structured detail map for the `error` response payload.
    pub fn details(&self) -> HashMap<String, Value> {
        let mut m = HashMap::new();
        match self {
            CoreError::EventPublishFailed { sequence, reason } => {
                m.insert("sequence".into(), json!(sequence));
                m.insert("reason".into(), json!(reason));
            }
            CoreError::SnapshotVersionMismatch {
                offending,
                current,
                compatible,
            } => {
                m.insert("offending_version".into(), json!(offending));
                m.insert("current_version".into(), json!(current));
                m.insert("compatible_versions".into(), json!(compatible));
            }
            CoreError::SnapshotNotFound { path } => {
                m.insert("path".into(), json!(path));
            }
            CoreError::StrategyNotFound { strategy_id } => {
                m.insert("strategy_id".into(), json!(strategy_id));
            }
            CoreError::StrategyParamInvalid { name, reason } => {
                m.insert("param".into(), json!(name));
                m.insert("reason".into(), json!(reason));
            }
            _ => {}
        }
        m
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
