//! Event Bus.
//!
//! Assigns a total order to published events, fans them out to synchronous
//! subscribers, and retains a bounded tail for replay. See P1-P2 in the
//! crate's test suite for the monotonicity and history-clear guarantees this
//! type exists to uphold.

use crate::error::{CoreError, CoreResult};
use crate::event::{Event, EventKind, EventPayload};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// A subscriber callback. Returning `Err` signals a handler failure; the
/// bus converts it into [`CoreError::EventPublishFailed`] and does not
/// invoke subsequent handlers for that publication (the event itself stays
/// committed to history — only delivery is short-circuited).
pub type Handler = Arc<dyn Fn(&Event) -> Result<(), String> + Send + Sync>;

pub const DEFAULT_MAX_HISTORY: usize = 10_000;

struct Inner {
    sequence_counter: u64,
    history: VecDeque<Event>,
    max_history: usize,
    subscribers: HashMap<EventKind, Vec<(Uuid, Handler)>>,
    subscription_kinds: HashMap<Uuid, EventKind>,
}

/// Thread-safe, totally-ordered event distributor with bounded replay
/// history. A single mutex guards sequence assignment and history; handlers
/// are invoked outside the lock so a re-entrant `publish` from within a
/// handler cannot deadlock.
pub struct EventBus {
    inner: Mutex<Inner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_max_history(DEFAULT_MAX_HISTORY)
    }

    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                sequence_counter: 0,
                history: VecDeque::new(),
                max_history,
                subscribers: HashMap::new(),
                subscription_kinds: HashMap::new(),
            }),
        }
    }

    /// Assigns the next sequence number, builds the event, appends it to
    /// history, then invokes every handler registered for its kind exactly
    /// once, in registration order. Returns the assigned sequence on
    /// success, or [`CoreError::EventPublishFailed`] if a handler failed —
    /// the sequence is still consumed and the event is still in history.
    pub fn publish(
        &self,
        payload: EventPayload,
        source: impl Into<String>,
        timestamp: Option<DateTime<Utc>>,
    ) -> CoreResult<u64> {
        let source = source.into();
        let kind = payload.kind();
        let handlers = {
            let mut inner = self.inner.lock();
            inner.sequence_counter += 1;
            let sequence = inner.sequence_counter;
            let event = Event::new(sequence, timestamp.unwrap_or_else(Utc::now), payload, source);
            inner.history.push_back(event.clone());
            while inner.history.len() > inner.max_history {
                inner.history.pop_front();
            }
            let handlers = inner
                .subscribers
                .get(&kind)
                .cloned()
                .unwrap_or_default();
            (event, handlers)
        };
        let (event, handlers) = handlers;

        for (_, handler) in handlers {
            if let Err(reason) = handler(&event) {
                warn!(sequence = event.sequence, %reason, "event handler failed");
                return Err(CoreError::EventPublishFailed {
                    sequence: event.sequence,
                    reason,
                });
            }
        }

        Ok(event.sequence)
    }

    /// Registers a handler for `kind`. Returns an opaque subscription id.
    pub fn subscribe(&self, kind: EventKind, handler: Handler) -> Uuid {
        let id = Uuid::new_v4();
        let mut inner = self.inner.lock();
        inner.subscribers.entry(kind).or_default().push((id, handler));
        inner.subscription_kinds.insert(id, kind);
        id
    }

    /// Removes a handler. Returns `true` if it was found.
    pub fn unsubscribe(&self, subscription_id: Uuid) -> bool {
        let mut inner = self.inner.lock();
        let Some(kind) = inner.subscription_kinds.remove(&subscription_id) else {
            return false;
        };
        if let Some(handlers) = inner.subscribers.get_mut(&kind) {
            handlers.retain(|(id, _)| *id != subscription_id);
        }
        true
    }

    /// The last assigned sequence number, or 0 if none have been published.
    pub fn current_sequence(&self) -> u64 {
        self.inner.lock().sequence_counter
    }

    /// Every retained event with `sequence >= given`, in sequence order.
    /// If `given` is below the oldest retained sequence, the result is a
    /// truncated prefix — history eviction is never silently extended.
    pub fn replay_from(&self, sequence: u64) -> Vec<Event> {
        self.inner
            .lock()
            .history
            .iter()
            .filter(|e| e.sequence >= sequence)
            .cloned()
            .collect()
    }

    /// Always empty in this synchronous delivery model; exists for
    /// symmetry with snapshot semantics (snapshots carry a `pending_events`
    /// field that a queued-delivery implementation would populate here).
    pub fn pending_events(&self) -> Vec<Event> {
        Vec::new()
    }

    pub fn history(&self) -> Vec<Event> {
        self.inner.lock().history.iter().cloned().collect()
    }

    /// Clears retained history. Does not reset the sequence counter.
    pub fn clear_history(&self) {
        self.inner.lock().history.clear();
    }

    /// Zeroes the sequence counter and drops history. Subscriptions are
    /// preserved. For test harnesses only — snapshot load instead calls
    /// [`EventBus::restore_sequence`] to keep the bus consistent with the
    /// loaded snapshot's `event_sequence` (see crate-level design notes on
    /// the bus-reset-on-load open question).
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.sequence_counter = 0;
        inner.history.clear();
    }

    /// Restores the sequence counter to a snapshot's `event_sequence` and
    /// drops history (the retained tail predates the jump and is no longer
    /// a valid replay window). Subsequent `publish` calls resume numbering
    /// from `sequence + 1`.
    pub fn restore_sequence(&self, sequence: u64) {
        let mut inner = self.inner.lock();
        inner.sequence_counter = sequence;
        inner.history.clear();
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.inner
            .lock()
            .subscribers
            .get(&kind)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::GenericPayload;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::thread;

    fn system_payload() -> EventPayload {
        EventPayload::System(GenericPayload::default())
    }

    #[test]
    fn sequence_starts_at_one_and_increments() {
        let bus = EventBus::new();
        assert_eq!(bus.current_sequence(), 0);
        let s1 = bus.publish(system_payload(), "test", None).unwrap();
        let s2 = bus.publish(system_payload(), "test", None).unwrap();
        assert_eq!(s1, 1);
        assert_eq!(s2, 2);
    }

    #[test]
    fn clear_history_does_not_reset_sequence() {
        let bus = EventBus::new();
        bus.publish(system_payload(), "test", None).unwrap();
        bus.publish(system_payload(), "test", None).unwrap();
        bus.clear_history();
        let s3 = bus.publish(system_payload(), "test", None).unwrap();
        assert_eq!(s3, 3);
        assert!(bus.history().len() == 1);
    }

    #[test]
    fn reset_zeroes_counter_and_history() {
        let bus = EventBus::new();
        bus.publish(system_payload(), "test", None).unwrap();
        bus.reset();
        assert_eq!(bus.current_sequence(), 0);
        assert!(bus.history().is_empty());
        let s = bus.publish(system_payload(), "test", None).unwrap();
        assert_eq!(s, 1);
    }

    #[test]
    fn restore_sequence_resumes_numbering_after_it() {
        let bus = EventBus::new();
        bus.restore_sequence(1000);
        assert_eq!(bus.current_sequence(), 1000);
        let s = bus.publish(system_payload(), "test", None).unwrap();
        assert_eq!(s, 1001);
    }

    #[test]
    fn bounded_history_drops_oldest_first() {
        let bus = EventBus::with_max_history(2);
        bus.publish(system_payload(), "test", None).unwrap();
        bus.publish(system_payload(), "test", None).unwrap();
        bus.publish(system_payload(), "test", None).unwrap();
        let hist = bus.history();
        assert_eq!(hist.len(), 2);
        assert_eq!(hist[0].sequence, 2);
        assert_eq!(hist[1].sequence, 3);
    }

    #[test]
    fn replay_from_below_oldest_retained_is_truncated() {
        let bus = EventBus::with_max_history(2);
        for _ in 0..5 {
            bus.publish(system_payload(), "test", None).unwrap();
        }
        let replayed = bus.replay_from(1);
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0].sequence, 4);
    }

    #[test]
    fn subscribe_and_unsubscribe() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));
        let count2 = count.clone();
        let id = bus.subscribe(
            EventKind::System,
            Arc::new(move |_event| {
                count2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        assert_eq!(bus.subscriber_count(EventKind::System), 1);
        bus.publish(system_payload(), "test", None).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(system_payload(), "test", None).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_failure_still_commits_event_and_sequence() {
        let bus = EventBus::new();
        bus.subscribe(
            EventKind::System,
            Arc::new(|_event| Err("boom".to_string())),
        );
        let result = bus.publish(system_payload(), "test", None);
        assert!(matches!(result, Err(CoreError::EventPublishFailed { sequence: 1, .. })));
        assert_eq!(bus.current_sequence(), 1);
        assert_eq!(bus.history().len(), 1);
    }

    #[test]
    fn concurrent_publish_from_n_threads_yields_exact_sequence_set() {
        let bus = Arc::new(EventBus::with_max_history(200));
        let threads = 4;
        let per_thread = 25;
        let mut handles = Vec::new();
        for _ in 0..threads {
            let bus = bus.clone();
            handles.push(thread::spawn(move || {
                let mut seqs = Vec::with_capacity(per_thread);
                for _ in 0..per_thread {
                    seqs.push(bus.publish(system_payload(), "test", None).unwrap());
                }
                seqs
            }));
        }
        let mut all: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        let expected: Vec<u64> = (1..=(threads * per_thread) as u64).collect();
        assert_eq!(all, expected);
        assert_eq!(bus.history().len(), threads * per_thread);
    }
}
