//! Event model.
//!
//! Canonical event types published through the [`crate::event_bus::EventBus`].
//! Payloads are a tagged variant per event kind rather than a typeless map,
//! with a catch-all `extra` field on each variant for forward-compatible
//! fields a future producer might add without requiring a new variant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The closed set of event categories the core distributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Tick,
    Bar,
    Order,
    Trade,
    Position,
    Account,
    Strategy,
    Risk,
    System,
}

/// A single market-data record, shared by Tick and Bar payloads.
///
/// Presence of `last_price` or `bid_price_1` is what the replay controller
/// uses to classify a raw provider record as a Tick rather than a Bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MarketData {
    pub symbol: String,
    pub exchange: String,
    pub last_price: Option<f64>,
    pub bid_price_1: Option<f64>,
    pub ask_price_1: Option<f64>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
    /// Forward-compatible fields not yet promoted to a named field.
    #[serde(default)]
    pub extra: Map<String, Value>,
}

/// A generic structured payload for non-market-data event kinds (orders,
/// trades, positions, account, strategy, risk, system). Handlers pattern
/// match on the owning [`EventKind`] and then read named fields from `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GenericPayload {
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl GenericPayload {
    pub fn new(data: Map<String, Value>) -> Self {
        Self { data }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

/// Tagged event payload. The variant IS the event's kind; `Event::kind` is
/// derived from it so the two can never disagree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    Tick(MarketData),
    Bar(MarketData),
    Order(GenericPayload),
    Trade(GenericPayload),
    Position(GenericPayload),
    Account(GenericPayload),
    Strategy(GenericPayload),
    Risk(GenericPayload),
    System(GenericPayload),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Tick(_) => EventKind::Tick,
            EventPayload::Bar(_) => EventKind::Bar,
            EventPayload::Order(_) => EventKind::Order,
            EventPayload::Trade(_) => EventKind::Trade,
            EventPayload::Position(_) => EventKind::Position,
            EventPayload::Account(_) => EventKind::Account,
            EventPayload::Strategy(_) => EventKind::Strategy,
            EventPayload::Risk(_) => EventKind::Risk,
            EventPayload::System(_) => EventKind::System,
        }
    }

    /// Convenience constructor for the `worker_handler_failed` system event
    /// (see the design-note resolution for handler errors in the worker).
    pub fn worker_handler_failed(failed_sequence: u64, reason: impl Into<String>) -> Self {
        let mut data = Map::new();
        data.insert("event".into(), Value::String("worker_handler_failed".into()));
        data.insert("failed_sequence".into(), Value::from(failed_sequence));
        data.insert("reason".into(), Value::String(reason.into()));
        EventPayload::System(GenericPayload::new(data))
    }
}

/// An immutable, sequenced event. Sequence numbers are assigned exactly
/// once, by the [`crate::event_bus::EventBus`], and never change after
/// publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub sequence: u64,
    pub kind: EventKind,
    /// Simulation time, never wall time (see crate-level determinism note).
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
    pub source: String,
}

impl Event {
    /// Only callable by the bus: `sequence` must be the freshly-assigned
    /// counter value.
    pub(crate) fn new(
        sequence: u64,
        timestamp: DateTime<Utc>,
        payload: EventPayload,
        source: String,
    ) -> Self {
        let kind = payload.kind();
        Self {
            sequence,
            kind,
            timestamp,
            payload,
            source,
        }
    }
}
