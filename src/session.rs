//! Session layer (§6 Session contract).
//!
//! Connection lifecycle, heartbeat, reconnect grace period, and
//! state-sync-on-reconnect, built on axum WebSockets exactly as the
//! teacher's `websocket_handler`/`handle_socket` pair: a `tokio::select!`
//! loop fanning broadcast events out to the client while reading inbound
//! command messages off the same socket.
//!
//! This module is the "external collaborator boundary" from spec §1 — its
//! correctness contract is narrow (deliver commands, fan out events) and
//! its shape is conventional, unlike the core state machines it fronts.

use crate::command::{CommandDispatcher, CommandType, WireMessage};
use crate::event::{Event, EventKind};
use crate::event_bus::EventBus;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub reconnect_grace_period: Duration,
    pub max_message_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            reconnect_grace_period: Duration::from_secs(300),
            max_message_size: 1 << 20,
        }
    }
}

/// Supplies the payload for the `state_sync` message sent on reconnect.
pub trait StateProvider: Send + Sync {
    fn state(&self) -> Value;
}

struct ClientRecord {
    last_seen: Instant,
    disconnected_at: Option<Instant>,
}

/// Tracks connected and recently-disconnected clients. Disconnected client
/// metadata is retained for `reconnect_grace_period` and then discarded so
/// a reconnect within the window resumes the same `client_id`.
pub struct SessionRegistry {
    clients: Mutex<HashMap<String, ClientRecord>>,
    grace_period: Duration,
}

impl SessionRegistry {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            grace_period,
        }
    }

    /// Returns `(client_id, is_reconnect)`. `requested_id` is honoured only
    /// if it is still within the grace window; otherwise a fresh id is
    /// minted and this is treated as a new connection.
    pub fn connect(&self, requested_id: Option<String>) -> (String, bool) {
        let mut clients = self.clients.lock();
        self.prune(&mut clients);
        if let Some(id) = requested_id {
            if let Some(record) = clients.get_mut(&id) {
                record.last_seen = Instant::now();
                record.disconnected_at = None;
                return (id, true);
            }
        }
        let id = Uuid::new_v4().to_string();
        clients.insert(
            id.clone(),
            ClientRecord {
                last_seen: Instant::now(),
                disconnected_at: None,
            },
        );
        (id, false)
    }

    pub fn touch(&self, id: &str) {
        if let Some(record) = self.clients.lock().get_mut(id) {
            record.last_seen = Instant::now();
        }
    }

    /// Seconds since the client's last inbound traffic. Missing entries
    /// report zero so a caller never mistakes "unknown" for "timed out".
    pub fn idle_for(&self, id: &str) -> Duration {
        self.clients
            .lock()
            .get(id)
            .map(|r| r.last_seen.elapsed())
            .unwrap_or_default()
    }

    pub fn disconnect(&self, id: &str) {
        if let Some(record) = self.clients.lock().get_mut(id) {
            record.disconnected_at = Some(Instant::now());
        }
    }

    fn prune(&self, clients: &mut HashMap<String, ClientRecord>) {
        let grace = self.grace_period;
        clients.retain(|_, record| record.disconnected_at.map(|t| t.elapsed() < grace).unwrap_or(true));
    }
}

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<CommandDispatcher>,
    pub registry: Arc<SessionRegistry>,
    pub event_tx: broadcast::Sender<Event>,
    pub state_provider: Option<Arc<dyn StateProvider>>,
    pub config: SessionConfig,
}

impl AppState {
    pub fn new(
        dispatcher: Arc<CommandDispatcher>,
        bus: &EventBus,
        state_provider: Option<Arc<dyn StateProvider>>,
        config: SessionConfig,
    ) -> Self {
        Self {
            dispatcher,
            registry: Arc::new(SessionRegistry::new(config.reconnect_grace_period)),
            event_tx: bridge_bus_to_broadcast(bus, 1024),
            state_provider,
            config,
        }
    }
}

/// Subscribes to every event kind and republishes onto a broadcast
/// channel — the session layer's single subscriber onto the bus (§2 data
/// flow), fanning out to every connected client.
fn bridge_bus_to_broadcast(bus: &EventBus, capacity: usize) -> broadcast::Sender<Event> {
    let (tx, _rx) = broadcast::channel(capacity);
    const KINDS: [EventKind; 9] = [
        EventKind::Tick,
        EventKind::Bar,
        EventKind::Order,
        EventKind::Trade,
        EventKind::Position,
        EventKind::Account,
        EventKind::Strategy,
        EventKind::Risk,
        EventKind::System,
    ];
    for kind in KINDS {
        let tx = tx.clone();
        bus.subscribe(
            kind,
            Arc::new(move |event: &Event| {
                // No subscribers is not a failure; the channel just drops the send.
                let _ = tx.send(event.clone());
                Ok(())
            }),
        );
    }
    tx
}

/// Maps a bus event onto a wire push type. Tick/Bar/Position/Account/Trade
/// have dedicated data-push types in §6; everything else (Order, Strategy,
/// Risk, and the `worker_handler_failed` System event) rides the generic
/// `alert` type.
fn event_to_wire_message(event: &Event) -> WireMessage {
    let kind = match event.kind {
        EventKind::Tick => CommandType::TickUpdate,
        EventKind::Bar => CommandType::BarUpdate,
        EventKind::Position => CommandType::PositionUpdate,
        EventKind::Account => CommandType::AccountUpdate,
        EventKind::Trade => CommandType::TradeUpdate,
        EventKind::Order | EventKind::Strategy | EventKind::Risk | EventKind::System => CommandType::Alert,
    };
    let payload = serde_json::to_value(event).unwrap_or(Value::Null);
    WireMessage::new(event.sequence.to_string(), kind, payload)
}

#[derive(Debug, Deserialize)]
pub struct ReconnectQuery {
    pub client_id: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ReconnectQuery>,
    State(state): State<AppState>,
) -> Response {
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state, query.client_id))
}

async fn send(socket: &mut WebSocket, message: &WireMessage) -> bool {
    let text = serde_json::to_string(message).unwrap_or_else(|_| "{}".to_string());
    socket.send(Message::Text(text)).await.is_ok()
}

async fn handle_socket(mut socket: WebSocket, state: AppState, reconnect_id: Option<String>) {
    let (client_id, is_reconnect) = state.registry.connect(reconnect_id);

    let connect_payload = json!({"client_id": client_id, "server_time": chrono::Utc::now()});
    let connect_msg = WireMessage::new(Uuid::new_v4().to_string(), CommandType::Connect, connect_payload);
    if !send(&mut socket, &connect_msg).await {
        state.registry.disconnect(&client_id);
        return;
    }

    if is_reconnect {
        if let Some(provider) = &state.state_provider {
            let sync_msg = WireMessage::new(Uuid::new_v4().to_string(), CommandType::StateSync, provider.state());
            if !send(&mut socket, &sync_msg).await {
                state.registry.disconnect(&client_id);
                return;
            }
        }
    }

    let mut events_rx = state.event_tx.subscribe();
    let mut heartbeat = tokio::time::interval(state.config.heartbeat_interval);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if state.registry.idle_for(&client_id) > state.config.heartbeat_timeout {
                    break;
                }
                let hb = WireMessage::new(Uuid::new_v4().to_string(), CommandType::Heartbeat, json!({}));
                if !send(&mut socket, &hb).await {
                    break;
                }
            }
            event = events_rx.recv() => {
                match event {
                    Ok(event) => {
                        let msg = event_to_wire_message(&event);
                        if !send(&mut socket, &msg).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, client_id = %client_id, "client lagged behind event broadcast");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        state.registry.touch(&client_id);
                        match serde_json::from_str::<WireMessage>(&text) {
                            Ok(wire) => {
                                let response = state.dispatcher.dispatch(&wire).await;
                                if !send(&mut socket, &response).await {
                                    break;
                                }
                            }
                            Err(e) => warn!(error = %e, client_id = %client_id, "malformed inbound message"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, client_id = %client_id, "websocket error");
                        break;
                    }
                }
            }
        }
    }

    state.registry.disconnect(&client_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_within_grace_period_resumes_same_client_id() {
        let registry = SessionRegistry::new(Duration::from_secs(300));
        let (id, is_reconnect) = registry.connect(None);
        assert!(!is_reconnect);
        registry.disconnect(&id);

        let (resumed_id, is_reconnect) = registry.connect(Some(id.clone()));
        assert!(is_reconnect);
        assert_eq!(resumed_id, id);
    }

    #[test]
    fn reconnect_after_grace_period_mints_fresh_id() {
        let registry = SessionRegistry::new(Duration::from_millis(1));
        let (id, _) = registry.connect(None);
        registry.disconnect(&id);
        std::thread::sleep(Duration::from_millis(20));

        let (new_id, is_reconnect) = registry.connect(Some(id.clone()));
        assert!(!is_reconnect);
        assert_ne!(new_id, id);
    }

    #[test]
    fn idle_for_reports_zero_for_unknown_client() {
        let registry = SessionRegistry::new(Duration::from_secs(300));
        assert_eq!(registry.idle_for("nonexistent"), Duration::ZERO);
    }

    #[test]
    fn touch_resets_idle_duration() {
        let registry = SessionRegistry::new(Duration::from_secs(300));
        let (id, _) = registry.connect(None);
        std::thread::sleep(Duration::from_millis(20));
        registry.touch(&id);
        assert!(registry.idle_for(&id) < Duration::from_millis(20));
    }

    #[test]
    fn event_to_wire_message_maps_data_push_kinds() {
        use crate::event::{EventPayload, GenericPayload, MarketData};

        let tick = Event {
            sequence: 1,
            kind: EventKind::Tick,
            timestamp: chrono::Utc::now(),
            payload: EventPayload::Tick(MarketData {
                symbol: "BTC/USDT".into(),
                ..Default::default()
            }),
            source: "test".into(),
        };
        assert_eq!(event_to_wire_message(&tick).kind, CommandType::TickUpdate);

        let system = Event {
            sequence: 2,
            kind: EventKind::System,
            timestamp: chrono::Utc::now(),
            payload: EventPayload::System(GenericPayload::default()),
            source: "test".into(),
        };
        assert_eq!(event_to_wire_message(&system).kind, CommandType::Alert);
    }
}
