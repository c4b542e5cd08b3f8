//! Replay Controller.
//!
//! A VCR-style state machine driving a single worker task that pulls
//! records from a [`DataProvider`], publishes them to the [`EventBus`] at a
//! configurable pace, and exposes pause/resume/step/stop/seek/snapshot
//! operations. Pause is observed only between records (never mid-record),
//! which is the single invariant that makes replay determinism independent
//! of wall-clock pacing (see P3 and P8 in the test suite).

use crate::data_provider::DataProvider;
use crate::error::{CoreError, CoreResult};
use crate::event::{EventPayload, MarketData};
use crate::event_bus::EventBus;
use crate::snapshot::{AccountState, PositionState, StrategyState};
use crate::snapshot_manager::SnapshotManager;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

const SOURCE: &str = "replay_controller";
const STOP_GRACE_WINDOW: Duration = Duration::from_secs(2);
const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayState {
    Idle,
    Playing,
    Paused,
    Stepping,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplaySpeed {
    X1,
    X2,
    X4,
    X10,
    Unlimited,
}

impl ReplaySpeed {
    fn multiplier(&self) -> f64 {
        match self {
            ReplaySpeed::X1 => 1.0,
            ReplaySpeed::X2 => 2.0,
            ReplaySpeed::X4 => 4.0,
            ReplaySpeed::X10 => 10.0,
            ReplaySpeed::Unlimited => f64::INFINITY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReplayConfig {
    pub initial_speed: ReplaySpeed,
    /// Base time unit for single-step pacing; the worker sleeps
    /// `time_unit / speed` between records (zero for `Unlimited`).
    pub time_unit: Duration,
    pub auto_snapshot_interval: u64,
    pub snapshot_dir: PathBuf,
    pub initial_cash: f64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            initial_speed: ReplaySpeed::X1,
            time_unit: Duration::from_secs(1),
            auto_snapshot_interval: 1000,
            snapshot_dir: PathBuf::from("snapshots"),
            initial_cash: 100_000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayStatus {
    pub state: ReplayState,
    pub speed: ReplaySpeed,
    pub current_time: DateTime<Utc>,
    pub current_index: u64,
    pub event_sequence: u64,
    pub total_events: u64,
    pub progress_percent: f64,
}

pub type StatusCallback = Arc<dyn Fn(ReplayStatus) + Send + Sync>;

struct ControllerState {
    phase: ReplayState,
    speed: ReplaySpeed,
    config: ReplayConfig,
    bus: Option<Arc<EventBus>>,
    manager: Option<Arc<SnapshotManager>>,
    provider: Option<Arc<dyn DataProvider>>,
    start_time: DateTime<Utc>,
    total: u64,
    current_time: DateTime<Utc>,
    current_index: u64,
    backtest_id: Option<String>,
    account: AccountState,
    positions: Vec<PositionState>,
    strategies: Vec<StrategyState>,
    events_processed: u64,
    stop_flag: Arc<AtomicBool>,
    pause_flag: Arc<AtomicBool>,
    callbacks: HashMap<Uuid, StatusCallback>,
}

struct Shared {
    state: Mutex<ControllerState>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Classifies a raw provider record as Tick or Bar per §4.3: presence of
/// `last_price` or `bid_price_1` means Tick, otherwise Bar.
fn classify(data: MarketData) -> EventPayload {
    if data.last_price.is_some() || data.bid_price_1.is_some() {
        EventPayload::Tick(data)
    } else {
        EventPayload::Bar(data)
    }
}

enum Advance {
    EndOfData,
    Published(CoreResult<u64>),
}

fn advance_one(state: &mut ControllerState) -> Advance {
    if state.current_index >= state.total {
        return Advance::EndOfData;
    }
    let Some(provider) = state.provider.clone() else {
        return Advance::EndOfData;
    };
    let Some(record) = provider.get(state.current_index) else {
        return Advance::EndOfData;
    };
    let bus = state
        .bus
        .clone()
        .expect("bus is set once the controller is initialized");
    let payload = classify(record.data);
    let result = bus.publish(payload, SOURCE, Some(record.timestamp));
    state.current_index += 1;
    state.current_time = record.timestamp;
    state.events_processed += 1;
    Advance::Published(result)
}

/// VCR-style replay controller. Cheap to clone — clones share the same
/// underlying state and worker handle.
#[derive(Clone)]
pub struct ReplayController {
    shared: Arc<Shared>,
}

impl ReplayController {
    pub fn new(config: ReplayConfig) -> Self {
        let now = Utc::now();
        let speed = config.initial_speed;
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ControllerState {
                    phase: ReplayState::Idle,
                    speed,
                    config,
                    bus: None,
                    manager: None,
                    provider: None,
                    start_time: now,
                    total: 0,
                    current_time: now,
                    current_index: 0,
                    backtest_id: None,
                    account: AccountState::default(),
                    positions: Vec::new(),
                    strategies: Vec::new(),
                    events_processed: 0,
                    stop_flag: Arc::new(AtomicBool::new(false)),
                    pause_flag: Arc::new(AtomicBool::new(false)),
                    callbacks: HashMap::new(),
                }),
                worker: Mutex::new(None),
            }),
        }
    }

    /// One-shot per session. Ends in Paused; the worker is not started.
    pub fn initialize(
        &self,
        bus: Arc<EventBus>,
        manager: Arc<SnapshotManager>,
        provider: Arc<dyn DataProvider>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        total: u64,
    ) -> CoreResult<()> {
        let _ = end_time;
        let mut state = self.shared.state.lock();
        if !matches!(state.phase, ReplayState::Idle | ReplayState::Stopped) {
            return Err(CoreError::EngineInitFailed {
                reason: format!("cannot initialize from state {:?}", state.phase),
            });
        }
        let initial_cash = state.config.initial_cash;
        state.bus = Some(bus);
        state.manager = Some(manager);
        state.provider = Some(provider);
        state.start_time = start_time;
        state.total = total;
        state.current_time = start_time;
        state.current_index = 0;
        state.account = AccountState::new(initial_cash, 0.0);
        state.positions.clear();
        state.strategies.clear();
        state.events_processed = 0;
        state.backtest_id = Some(Uuid::new_v4().to_string());
        state.stop_flag.store(false, Ordering::SeqCst);
        state.pause_flag.store(false, Ordering::SeqCst);
        state.phase = ReplayState::Paused;
        drop(state);
        self.notify_callbacks();
        Ok(())
    }

    /// Idle is rejected. From Stopped, replay counters reset. From Paused
    /// or Playing, idempotent. Spawns the worker if it isn't already
    /// running.
    pub fn play(&self) -> CoreResult<bool> {
        let mut state = self.shared.state.lock();
        match state.phase {
            ReplayState::Idle => return Err(CoreError::EngineNotInitialized),
            ReplayState::Stopped => {
                state.current_index = 0;
                state.current_time = state.start_time;
                state.events_processed = 0;
                state.stop_flag.store(false, Ordering::SeqCst);
                state.pause_flag.store(false, Ordering::SeqCst);
            }
            ReplayState::Playing => {
                return Ok(true);
            }
            ReplayState::Paused | ReplayState::Stepping => {
                state.pause_flag.store(false, Ordering::SeqCst);
            }
        }
        state.phase = ReplayState::Playing;
        drop(state);

        let need_spawn = {
            let worker = self.shared.worker.lock();
            worker.as_ref().map(|h| h.is_finished()).unwrap_or(true)
        };
        if need_spawn {
            let controller = self.clone();
            let handle = tokio::spawn(run_worker(controller));
            *self.shared.worker.lock() = Some(handle);
        }
        self.notify_callbacks();
        Ok(true)
    }

    /// Returns false if not Playing or Stepping.
    pub fn pause(&self) -> bool {
        let mut state = self.shared.state.lock();
        if !matches!(state.phase, ReplayState::Playing | ReplayState::Stepping) {
            return false;
        }
        state.pause_flag.store(true, Ordering::SeqCst);
        state.phase = ReplayState::Paused;
        drop(state);
        self.notify_callbacks();
        true
    }

    /// Returns false if not Paused.
    pub fn resume(&self) -> bool {
        let mut state = self.shared.state.lock();
        if state.phase != ReplayState::Paused {
            return false;
        }
        state.pause_flag.store(false, Ordering::SeqCst);
        state.phase = ReplayState::Playing;
        drop(state);
        self.notify_callbacks();
        true
    }

    /// Processes exactly one record, publishes exactly one event, advances
    /// the index, sets current time to the record's timestamp, and leaves
    /// the state in Paused (or Stopped if `index == total`). See P4.
    pub fn step(&self) -> CoreResult<bool> {
        let mut state = self.shared.state.lock();
        if state.phase == ReplayState::Idle {
            return Err(CoreError::EngineNotInitialized);
        }
        state.phase = ReplayState::Stepping;
        let outcome = advance_one(&mut state);
        match outcome {
            Advance::EndOfData => {
                state.phase = ReplayState::Stopped;
                drop(state);
                self.notify_callbacks();
                Ok(false)
            }
            Advance::Published(result) => {
                state.phase = ReplayState::Paused;
                drop(state);
                self.notify_callbacks();
                result.map(|_| true)
            }
        }
    }

    /// Signals the worker to exit, releases the pause latch, and joins the
    /// worker within a ~2s grace window. If it doesn't exit in time the
    /// controller still transitions to Stopped and the worker is treated
    /// as detached.
    pub async fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            state.stop_flag.store(true, Ordering::SeqCst);
            state.pause_flag.store(false, Ordering::SeqCst);
            state.phase = ReplayState::Stopped;
        }
        self.notify_callbacks();
        let handle = self.shared.worker.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(STOP_GRACE_WINDOW, handle).await.is_err() {
                warn!("worker did not exit within grace window; treating as detached");
            }
        }
    }

    /// Effect observed on the next worker iteration.
    pub fn set_speed(&self, speed: ReplaySpeed) {
        self.shared.state.lock().speed = speed;
        self.notify_callbacks();
    }

    pub fn get_status(&self) -> ReplayStatus {
        let state = self.shared.state.lock();
        let progress = if state.total == 0 {
            100.0
        } else {
            (state.current_index as f64 / state.total as f64) * 100.0
        };
        ReplayStatus {
            state: state.phase,
            speed: state.speed,
            current_time: state.current_time,
            current_index: state.current_index,
            event_sequence: state.bus.as_ref().map(|b| b.current_sequence()).unwrap_or(0),
            total_events: state.events_processed,
            progress_percent: progress,
        }
    }

    /// Packages account/positions/strategies/time/index plus the bus's
    /// pending events and current sequence into a snapshot, saved under
    /// `<snapshot_dir>/<backtest_id>_<yyyymmdd_hhmmss>.json`.
    pub fn save_snapshot(&self, description: Option<String>) -> CoreResult<PathBuf> {
        let (manager, bus, backtest_id, account, positions, strategies, current_time, current_index, snapshot_dir) = {
            let state = self.shared.state.lock();
            let manager = state.manager.clone().ok_or(CoreError::EngineNotInitialized)?;
            let bus = state.bus.clone().ok_or(CoreError::EngineNotInitialized)?;
            (
                manager,
                bus,
                state.backtest_id.clone().unwrap_or_default(),
                state.account.clone(),
                state.positions.clone(),
                state.strategies.clone(),
                state.current_time,
                state.current_index,
                state.config.snapshot_dir.clone(),
            )
        };

        let pending: Vec<Value> = bus
            .pending_events()
            .into_iter()
            .map(|e| serde_json::to_value(e).unwrap_or(Value::Null))
            .collect();
        let event_sequence = bus.current_sequence();

        let snapshot = manager.create_snapshot(
            account,
            positions,
            strategies,
            event_sequence,
            pending,
            current_time,
            current_index,
            Some(backtest_id.clone()),
            description,
        );

        let filename = format!(
            "{}_{}.json",
            backtest_id,
            snapshot.create_time.format("%Y%m%d_%H%M%S")
        );
        let path = snapshot_dir.join(filename);
        manager.save(&snapshot, &path)?;
        Ok(path)
    }

    /// Pauses if playing; loads and validates via the manager; replaces
    /// account/positions/strategies/time/index with the snapshot's values;
    /// restores the bus's sequence counter (see the design note resolving
    /// the bus-reset-on-load open question); ends in Paused.
    pub fn load_snapshot(&self, path: impl AsRef<Path>) -> CoreResult<bool> {
        let path_str = path.as_ref().display().to_string();
        if self.shared.state.lock().phase == ReplayState::Playing {
            self.pause();
        }

        let manager = self
            .shared
            .state
            .lock()
            .manager
            .clone()
            .ok_or(CoreError::EngineNotInitialized)?;
        let snapshot = manager
            .load(&path)?
            .ok_or(CoreError::SnapshotNotFound { path: path_str })?;
        manager.restore(&snapshot)?;

        let bus = {
            let mut state = self.shared.state.lock();
            state.account = snapshot.account.clone();
            state.positions = snapshot.positions.clone();
            state.strategies = snapshot.strategies.clone();
            state.current_time = snapshot.data_timestamp;
            state.current_index = snapshot.data_index;
            state.phase = ReplayState::Paused;
            state.bus.clone()
        };
        if let Some(bus) = bus {
            if snapshot.version == crate::snapshot_manager::CURRENT_VERSION {
                bus.restore_sequence(snapshot.event_sequence);
            }
        }
        self.notify_callbacks();
        Ok(true)
    }

    /// Pauses if playing; out-of-range is rejected (`Ok(false)`). No
    /// events are published by seek.
    pub fn seek_to_index(&self, index: u64) -> CoreResult<bool> {
        let mut state = self.shared.state.lock();
        if state.phase == ReplayState::Idle {
            return Err(CoreError::EngineNotInitialized);
        }
        if index > state.total {
            return Ok(false);
        }
        if state.phase == ReplayState::Playing {
            state.pause_flag.store(true, Ordering::SeqCst);
            state.phase = ReplayState::Paused;
        }
        state.current_index = index;
        if let Some(provider) = state.provider.clone() {
            if let Some(record) = provider.get(index) {
                state.current_time = record.timestamp;
            }
        }
        drop(state);
        self.notify_callbacks();
        Ok(true)
    }

    /// Finds the index with the closest timestamp, then delegates to
    /// `seek_to_index`. Uses a binary-search fast path when the provider
    /// advertises `is_sorted_by_time`; linear scan otherwise.
    pub fn seek_to_time(&self, target: DateTime<Utc>) -> CoreResult<bool> {
        let (provider, total) = {
            let state = self.shared.state.lock();
            if state.phase == ReplayState::Idle {
                return Err(CoreError::EngineNotInitialized);
            }
            (state.provider.clone(), state.total)
        };
        let Some(provider) = provider else {
            return Ok(false);
        };
        if total == 0 {
            return self.seek_to_index(0);
        }
        let index = if provider.is_sorted_by_time() {
            binary_search_closest(provider.as_ref(), total, target)
        } else {
            linear_search_closest(provider.as_ref(), total, target)
        };
        self.seek_to_index(index)
    }

    pub fn set_account_state(&self, account: AccountState) {
        self.shared.state.lock().account = account;
    }

    pub fn set_positions(&self, positions: Vec<PositionState>) {
        self.shared.state.lock().positions = positions;
    }

    pub fn set_strategies(&self, strategies: Vec<StrategyState>) {
        self.shared.state.lock().strategies = strategies;
    }

    pub fn account_state(&self) -> AccountState {
        self.shared.state.lock().account.clone()
    }

    pub fn positions(&self) -> Vec<PositionState> {
        self.shared.state.lock().positions.clone()
    }

    pub fn strategies(&self) -> Vec<StrategyState> {
        self.shared.state.lock().strategies.clone()
    }

    pub fn backtest_id(&self) -> Option<String> {
        self.shared.state.lock().backtest_id.clone()
    }

    pub fn register_status_callback(&self, callback: StatusCallback) -> Uuid {
        let id = Uuid::new_v4();
        self.shared.state.lock().callbacks.insert(id, callback);
        id
    }

    pub fn unregister_status_callback(&self, id: Uuid) -> bool {
        self.shared.state.lock().callbacks.remove(&id).is_some()
    }

    fn notify_callbacks(&self) {
        let status = self.get_status();
        let callbacks: Vec<StatusCallback> = self.shared.state.lock().callbacks.values().cloned().collect();
        for callback in callbacks {
            let status = status.clone();
            // Status callbacks swallow all errors/panics (§7 propagation policy).
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(status)));
        }
    }
}

fn binary_search_closest(provider: &dyn DataProvider, total: u64, target: DateTime<Utc>) -> u64 {
    let mut lo = 0u64;
    let mut hi = total.saturating_sub(1);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match provider.get(mid) {
            Some(r) if r.timestamp < target => lo = mid + 1,
            _ => hi = mid,
        }
    }
    if lo > 0 {
        if let (Some(prev), Some(cur)) = (provider.get(lo - 1), provider.get(lo)) {
            let d_prev = (target - prev.timestamp).num_milliseconds().abs();
            let d_cur = (cur.timestamp - target).num_milliseconds().abs();
            if d_prev <= d_cur {
                return lo - 1;
            }
        }
    }
    lo
}

fn linear_search_closest(provider: &dyn DataProvider, total: u64, target: DateTime<Utc>) -> u64 {
    let mut best_index = 0u64;
    let mut best_diff = i64::MAX;
    for i in 0..total {
        if let Some(record) = provider.get(i) {
            let diff = (record.timestamp - target).num_milliseconds().abs();
            if diff < best_diff {
                best_diff = diff;
                best_index = i;
            }
        }
    }
    best_index
}

async fn run_worker(controller: ReplayController) {
    loop {
        let (stop_flag, pause_flag) = {
            let state = controller.shared.state.lock();
            (state.stop_flag.clone(), state.pause_flag.clone())
        };
        if stop_flag.load(Ordering::SeqCst) {
            break;
        }
        if pause_flag.load(Ordering::SeqCst) {
            tokio::time::sleep(PAUSE_POLL_INTERVAL).await;
            continue;
        }

        let (outcome, speed, time_unit, current_time) = {
            let mut state = controller.shared.state.lock();
            let outcome = advance_one(&mut state);
            (outcome, state.speed, state.config.time_unit, state.current_time)
        };

        match outcome {
            Advance::EndOfData => {
                {
                    let mut state = controller.shared.state.lock();
                    state.phase = ReplayState::Stopped;
                }
                controller.notify_callbacks();
                break;
            }
            Advance::Published(Ok(_)) => {}
            Advance::Published(Err(e)) => {
                let failed_sequence = match &e {
                    CoreError::EventPublishFailed { sequence, .. } => *sequence,
                    _ => 0,
                };
                warn!(error = %e, "handler failed during auto-paced step; continuing to next record");
                let bus = controller.shared.state.lock().bus.clone();
                if let Some(bus) = bus {
                    let _ = bus.publish(
                        EventPayload::worker_handler_failed(failed_sequence, e.to_string()),
                        SOURCE,
                        Some(current_time),
                    );
                }
            }
        }

        if !matches!(speed, ReplaySpeed::Unlimited) {
            let delay = Duration::from_secs_f64(time_unit.as_secs_f64() / speed.multiplier());
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_provider::{Record, VecDataProvider};
    use crate::snapshot_manager::SnapshotManager;

    fn bar_records(n: u64, start_secs: i64) -> Vec<Record> {
        (0..n)
            .map(|i| Record {
                timestamp: DateTime::from_timestamp(start_secs + i as i64 * 60, 0).unwrap(),
                data: MarketData {
                    symbol: "BTC/USDT".into(),
                    exchange: "binance".into(),
                    close: Some(100.0 + i as f64),
                    ..Default::default()
                },
            })
            .collect()
    }

    fn controller_with(n: u64) -> (ReplayController, Arc<EventBus>) {
        let controller = ReplayController::new(ReplayConfig {
            time_unit: Duration::from_millis(1),
            ..Default::default()
        });
        let bus = Arc::new(EventBus::new());
        let manager = Arc::new(SnapshotManager::new());
        let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let provider: Arc<dyn DataProvider> = Arc::new(VecDataProvider::new(bar_records(n, 1_700_000_000)));
        controller
            .initialize(bus.clone(), manager, provider, start, start, n)
            .unwrap();
        (controller, bus)
    }

    #[test]
    fn step_by_step_determinism_scenario() {
        let (controller, bus) = controller_with(30);
        for _ in 0..30 {
            assert!(controller.step().unwrap());
        }
        assert_eq!(bus.current_sequence(), 30);
        let status = controller.get_status();
        assert_eq!(status.state, ReplayState::Stopped);
        assert_eq!(status.progress_percent, 100.0);
    }

    #[test]
    fn single_step_precision() {
        let (controller, bus) = controller_with(100);
        for _ in 0..17 {
            controller.step().unwrap();
        }
        assert_eq!(controller.get_status().current_index, 17);
        let seq_before = bus.current_sequence();

        let advanced = controller.step().unwrap();

        assert!(advanced);
        assert_eq!(controller.get_status().current_index, 18);
        assert_eq!(bus.current_sequence(), seq_before + 1);
        assert_eq!(controller.get_status().state, ReplayState::Paused);
    }

    #[test]
    fn step_past_total_transitions_to_stopped() {
        let (controller, _bus) = controller_with(1);
        assert!(controller.step().unwrap());
        assert!(!controller.step().unwrap());
        assert_eq!(controller.get_status().state, ReplayState::Stopped);
    }

    #[test]
    fn seek_to_index_out_of_range_is_rejected() {
        let (controller, _bus) = controller_with(10);
        assert!(!controller.seek_to_index(11).unwrap());
        assert!(controller.seek_to_index(5).unwrap());
        assert_eq!(controller.get_status().current_index, 5);
    }

    #[test]
    fn seek_to_index_publishes_no_events() {
        let (controller, bus) = controller_with(10);
        controller.seek_to_index(5).unwrap();
        assert_eq!(bus.current_sequence(), 0);
    }

    #[test]
    fn seek_to_time_binary_search_matches_linear_scan() {
        let (controller, _bus) = controller_with(100);
        let target = DateTime::from_timestamp(1_700_000_000 + 42 * 60 + 10, 0).unwrap();
        controller.seek_to_time(target).unwrap();
        assert_eq!(controller.get_status().current_index, 42);
    }

    #[test]
    fn snapshot_round_trip_through_controller() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, bus) = controller_with(10);
        for _ in 0..5 {
            controller.step().unwrap();
        }
        controller.shared.state.lock().config.snapshot_dir = dir.path().to_path_buf();
        let path = controller.save_snapshot(Some("test".into())).unwrap();
        assert!(path.exists());

        controller.seek_to_index(0).unwrap();
        assert_eq!(controller.get_status().current_index, 0);

        controller.load_snapshot(&path).unwrap();
        assert_eq!(controller.get_status().current_index, 5);
        assert_eq!(bus.current_sequence(), 5);

        // Next publish resumes numbering from the restored counter.
        controller.step().unwrap();
        assert_eq!(bus.current_sequence(), 6);
    }

    #[test]
    fn load_missing_snapshot_surfaces_not_found() {
        let (controller, _bus) = controller_with(1);
        let err = controller.load_snapshot("/nonexistent/path.json").unwrap_err();
        assert!(matches!(err, CoreError::SnapshotNotFound { .. }));
    }

    #[tokio::test]
    async fn play_pause_resume_then_stop_reaches_stopped() {
        let (controller, bus) = controller_with(5);
        controller.play().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        controller.pause();
        let index_after_pause = controller.get_status().current_index;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(controller.get_status().current_index, index_after_pause);

        assert!(controller.resume());
        tokio::time::sleep(Duration::from_millis(50)).await;
        controller.stop().await;

        assert_eq!(bus.current_sequence(), 5);
        assert_eq!(controller.get_status().state, ReplayState::Stopped);
    }

    #[test]
    fn initialize_from_playing_is_rejected() {
        let (controller, _bus) = controller_with(5);
        controller.shared.state.lock().phase = ReplayState::Playing;
        let bus2 = Arc::new(EventBus::new());
        let manager2 = Arc::new(SnapshotManager::new());
        let provider2: Arc<dyn DataProvider> = Arc::new(VecDataProvider::new(bar_records(1, 0)));
        let start = DateTime::from_timestamp(0, 0).unwrap();
        let err = controller
            .initialize(bus2, manager2, provider2, start, start, 1)
            .unwrap_err();
        assert!(matches!(err, CoreError::EngineInitFailed { .. }));
    }
}
