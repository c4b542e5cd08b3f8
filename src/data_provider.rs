//! Data provider.
//!
//! A pure function from non-negative integer index to optional record. The
//! core depends only on this trait, never on a specific storage backend —
//! grounded on the teacher's `MarketDataFeed`/`VecFeed` pair, adapted from a
//! stream-with-cursor shape to the spec's index-addressable shape (the
//! Replay Controller, not the provider, owns the read cursor).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::MarketData;

/// One historical record: a timestamp plus the market-data fields used to
/// classify it as Tick or Bar (see [`crate::replay_controller`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub timestamp: DateTime<Utc>,
    pub data: MarketData,
}

/// Source of historical records for a replay.
pub trait DataProvider: Send + Sync {
    /// The record at `index`, or `None` past the end of the data set.
    fn get(&self, index: u64) -> Option<Record>;

    /// Total number of records, if known.
    fn len(&self) -> Option<u64> {
        None
    }

    /// Whether records are known sorted by `timestamp`. `seek_to_time` uses
    /// this to pick a binary-search fast path over a linear scan.
    fn is_sorted_by_time(&self) -> bool {
        false
    }
}

/// A provider backed by an in-memory, pre-sorted vector of records.
pub struct VecDataProvider {
    records: Vec<Record>,
}

impl VecDataProvider {
    /// `records` must already be sorted by `timestamp`; this is the
    /// contract `is_sorted_by_time` advertises.
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }
}

impl DataProvider for VecDataProvider {
    fn get(&self, index: u64) -> Option<Record> {
        self.records.get(index as usize).cloned()
    }

    fn len(&self) -> Option<u64> {
        Some(self.records.len() as u64)
    }

    fn is_sorted_by_time(&self) -> bool {
        true
    }
}
