//! Snapshot value objects.
//!
//! Plain data carriers for account, position, and strategy state, plus the
//! composite [`Snapshot`] that the [`crate::snapshot_manager::SnapshotManager`]
//! serializes to and from the on-disk textual document described in the
//! session contract (§6): field names and ordering here are part of that
//! external contract, not an implementation detail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A strategy parameter or variable value: either a scalar or a list of
/// scalars, matching the original's loosely-typed parameter store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Scalar(Value),
    List(Vec<Value>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }
}

/// Financial state of the trading account at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    pub cash: f64,
    pub frozen_margin: f64,
    pub available_balance: f64,
    pub total_equity: f64,
    pub unrealized_pnl: f64,
}

impl AccountState {
    pub fn new(cash: f64, frozen_margin: f64) -> Self {
        Self {
            cash,
            frozen_margin,
            available_balance: cash - frozen_margin,
            total_equity: cash - frozen_margin,
            unrealized_pnl: 0.0,
        }
    }
}

impl Default for AccountState {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// State of a single open position. Positions have no identity beyond
/// `(symbol, exchange, direction)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionState {
    pub symbol: String,
    pub exchange: String,
    pub direction: Direction,
    pub volume: f64,
    pub cost_price: f64,
    pub unrealized_pnl: f64,
    pub margin: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_time: Option<DateTime<Utc>>,
}

/// Pure data carrier for a strategy instance's parameters and variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyState {
    pub strategy_id: String,
    pub class_name: String,
    pub parameters: HashMap<String, ParamValue>,
    pub variables: HashMap<String, ParamValue>,
    pub is_active: bool,
}

/// A point-in-time consistent capture of the full simulation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: String,
    pub snapshot_id: String,
    pub create_time: DateTime<Utc>,
    pub account: AccountState,
    pub positions: Vec<PositionState>,
    pub strategies: Vec<StrategyState>,
    pub event_sequence: u64,
    pub pending_events: Vec<Value>,
    pub data_timestamp: DateTime<Utc>,
    pub data_index: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backtest_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_state_available_balance_is_derived() {
        let acct = AccountState::new(95_000.0, 5_000.0);
        assert_eq!(acct.available_balance, 90_000.0);
    }

    #[test]
    fn direction_opposite_is_involutive() {
        assert_eq!(Direction::Long.opposite(), Direction::Short);
        assert_eq!(Direction::Short.opposite().opposite(), Direction::Short);
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let snap = Snapshot {
            version: "1.1.0".into(),
            snapshot_id: "s1".into(),
            create_time: Utc::now(),
            account: AccountState {
                cash: 95_000.0,
                frozen_margin: 5_000.0,
                available_balance: 90_000.0,
                total_equity: 105_000.0,
                unrealized_pnl: 10_000.0,
            },
            positions: vec![PositionState {
                symbol: "BTC/USDT".into(),
                exchange: "binance".into(),
                direction: Direction::Long,
                volume: 1.0,
                cost_price: 50_000.0,
                unrealized_pnl: 0.0,
                margin: 0.0,
                open_time: None,
            }],
            strategies: vec![],
            event_sequence: 1000,
            pending_events: vec![],
            data_timestamp: Utc::now(),
            data_index: 5000,
            backtest_id: Some("bt-1".into()),
            description: None,
        };
        let text = serde_json::to_string_pretty(&snap).unwrap();
        let back: Snapshot = serde_json::from_str(&text).unwrap();
        assert_eq!(snap, back);
    }
}
