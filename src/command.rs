//! Command dispatch boundary (§4.4, §6).
//!
//! Every inbound wire message maps to exactly one controller operation.
//! Manual Order and Close All carry non-trivial domain semantics and are
//! implemented here in full; everything else is a thin, validated
//! pass-through. The matching engine itself stays an opaque collaborator
//! behind [`OrderSink`].

use crate::error::{CoreError, CoreResult};
use crate::replay_controller::ReplayController;
use crate::snapshot::{Direction, ParamValue};
use crate::strategy_loader::{self, HotReloadPolicy, StrategyRegistry};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

const DEFAULT_BACKTEST_EXCHANGE: &str = "BACKTEST";

/// The closed set of wire message types (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    Connect,
    Disconnect,
    Heartbeat,
    HeartbeatAck,
    Error,
    Response,
    StartBacktest,
    Pause,
    Resume,
    Step,
    Stop,
    TickUpdate,
    BarUpdate,
    PositionUpdate,
    AccountUpdate,
    TradeUpdate,
    LoadStrategy,
    ReloadStrategy,
    UpdateParams,
    ManualOrder,
    CancelOrder,
    CloseAll,
    SaveSnapshot,
    LoadSnapshot,
    Alert,
    AlertAck,
    StateSync,
    RequestState,
}

/// The wire message envelope: `id`, `type`, `timestamp` (epoch ms), `payload`.
/// Responses reuse the inbound `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: CommandType,
    pub timestamp: i64,
    #[serde(default)]
    pub payload: Value,
}

impl WireMessage {
    pub fn new(id: impl Into<String>, kind: CommandType, payload: Value) -> Self {
        Self {
            id: id.into(),
            kind,
            timestamp: Utc::now().timestamp_millis(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Offset {
    Open,
    Close,
}

/// An order constructed by the command boundary, tagged `is_manual = true`
/// per §4.4, and forwarded to the matching engine collaborator if present.
#[derive(Debug, Clone, Serialize)]
pub struct ManualOrder {
    pub order_id: String,
    pub symbol: String,
    pub exchange: String,
    pub direction: Direction,
    pub offset: Offset,
    pub price: f64,
    pub volume: f64,
    pub is_manual: bool,
}

/// The matching engine collaborator boundary. Out of scope for this core;
/// callers supply an implementation (or none, in which case orders are
/// still constructed and reported but never actually submitted anywhere).
pub trait OrderSink: Send + Sync {
    fn submit(&self, order: &ManualOrder) -> CoreResult<()>;
}

/// Boundary-level errors: malformed or missing command fields. Distinct
/// from [`CoreError`], which covers engine-internal failures only.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("missing required field: {0}")]
    MissingField(String),
    #[error("invalid field {field}: {reason}")]
    InvalidField { field: String, reason: String },
    #[error("unsupported command: {0}")]
    Unsupported(String),
    #[error(transparent)]
    Core(#[from] CoreError),
}

fn parse_direction(value: Option<&Value>) -> Result<Direction, CommandError> {
    let raw = value
        .and_then(Value::as_str)
        .ok_or_else(|| CommandError::MissingField("direction".into()))?;
    match raw.to_uppercase().as_str() {
        "LONG" => Ok(Direction::Long),
        "SHORT" => Ok(Direction::Short),
        other => Err(CommandError::InvalidField {
            field: "direction".into(),
            reason: format!("unknown direction {other}"),
        }),
    }
}

fn parse_offset(value: Option<&Value>) -> Result<Offset, CommandError> {
    let raw = value
        .and_then(Value::as_str)
        .ok_or_else(|| CommandError::MissingField("offset".into()))?;
    match raw.to_uppercase().as_str() {
        "OPEN" => Ok(Offset::Open),
        "CLOSE" => Ok(Offset::Close),
        other => Err(CommandError::InvalidField {
            field: "offset".into(),
            reason: format!("unknown offset {other}"),
        }),
    }
}

/// Routes [`WireMessage`]s into [`ReplayController`] operations, handling
/// Manual Order and Close All domain logic directly.
pub struct CommandDispatcher {
    controller: ReplayController,
    order_sink: Option<Arc<dyn OrderSink>>,
    strategy_registry: Option<Arc<dyn StrategyRegistry>>,
}

impl CommandDispatcher {
    pub fn new(
        controller: ReplayController,
        order_sink: Option<Arc<dyn OrderSink>>,
        strategy_registry: Option<Arc<dyn StrategyRegistry>>,
    ) -> Self {
        Self {
            controller,
            order_sink,
            strategy_registry,
        }
    }

    /// Dispatches one inbound message and returns its response envelope.
    /// Never panics: all failure modes become an `error`-typed response.
    pub async fn dispatch(&self, message: &WireMessage) -> WireMessage {
        if message.kind == CommandType::Heartbeat {
            return WireMessage::new(message.id.clone(), CommandType::HeartbeatAck, json!({}));
        }
        let result = self.handle(message).await;
        Self::build_response(message, result)
    }

    async fn handle(&self, message: &WireMessage) -> Result<Value, CommandError> {
        let now_ms = Utc::now().timestamp_millis();
        match message.kind {
            CommandType::StartBacktest => {
                // The controller is initialized once by the process bootstrap
                // (data provider wiring is out of the wire protocol); this
                // command only validates the client's request and flips the
                // already-initialized controller into Playing.
                for field in ["strategy_id", "start_date", "end_date"] {
                    if message.payload.get(field).is_none() {
                        return Err(CommandError::MissingField(field.into()));
                    }
                }
                Ok(json!({"running": self.controller.play()?}))
            }
            CommandType::Resume => Ok(json!({"running": self.controller.resume()})),
            CommandType::Pause => Ok(json!({"paused": self.controller.pause()})),
            CommandType::Step => Ok(json!({"advanced": self.controller.step()?})),
            CommandType::Stop => {
                self.controller.stop().await;
                Ok(json!({"stopped": true}))
            }
            CommandType::ManualOrder => self.handle_manual_order(&message.payload, now_ms),
            CommandType::CloseAll => Ok(self.handle_close_all(now_ms)),
            CommandType::SaveSnapshot => {
                let description = message
                    .payload
                    .get("description")
                    .and_then(Value::as_str)
                    .map(String::from);
                let path = self.controller.save_snapshot(description)?;
                Ok(json!({"path": path.display().to_string()}))
            }
            CommandType::LoadSnapshot => {
                let path = message
                    .payload
                    .get("path")
                    .and_then(Value::as_str)
                    .ok_or_else(|| CommandError::MissingField("path".into()))?;
                Ok(json!({"loaded": self.controller.load_snapshot(path)?}))
            }
            CommandType::RequestState => Ok(self.state_value()),
            CommandType::AlertAck => Ok(json!({"acknowledged": true})),
            CommandType::CancelOrder => Ok(json!({
                "cancelled": false,
                "reason": "matching engine is an out-of-scope collaborator",
            })),
            CommandType::LoadStrategy => self.handle_load_strategy(&message.payload),
            CommandType::UpdateParams => self.handle_update_params(&message.payload),
            CommandType::ReloadStrategy => self.handle_reload_strategy(&message.payload),
            other => Err(CommandError::Unsupported(format!(
                "{other:?} is not a client-dispatchable command"
            ))),
        }
    }

    fn state_value(&self) -> Value {
        json!({
            "status": self.controller.get_status(),
            "account": self.controller.account_state(),
            "positions": self.controller.positions(),
            "strategies": self.controller.strategies(),
        })
    }

    /// Required: `symbol, direction, offset, volume > 0`. Optional: `price`
    /// (default 0, market), `exchange` (default [`DEFAULT_BACKTEST_EXCHANGE`]).
    fn handle_manual_order(&self, payload: &Value, now_ms: i64) -> Result<Value, CommandError> {
        let symbol = payload
            .get("symbol")
            .and_then(Value::as_str)
            .ok_or_else(|| CommandError::MissingField("symbol".into()))?;
        let direction = parse_direction(payload.get("direction"))?;
        let offset = parse_offset(payload.get("offset"))?;
        let price = payload.get("price").and_then(Value::as_f64).unwrap_or(0.0);
        if price < 0.0 {
            return Err(CommandError::InvalidField {
                field: "price".into(),
                reason: "must be >= 0".into(),
            });
        }
        let volume = payload
            .get("volume")
            .and_then(Value::as_f64)
            .ok_or_else(|| CommandError::MissingField("volume".into()))?;
        if volume <= 0.0 {
            return Err(CommandError::InvalidField {
                field: "volume".into(),
                reason: "must be > 0".into(),
            });
        }
        let exchange = payload
            .get("exchange")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_BACKTEST_EXCHANGE)
            .to_string();

        let order = ManualOrder {
            order_id: format!("manual_{now_ms}"),
            symbol: symbol.to_string(),
            exchange,
            direction,
            offset,
            price,
            volume,
            is_manual: true,
        };
        if let Some(sink) = &self.order_sink {
            sink.submit(&order)?;
        }
        Ok(serde_json::to_value(&order).expect("ManualOrder always serializes"))
    }

    /// One market close order per position with `volume > 0`; partial
    /// success is reported rather than failing the whole command (§4.4, P7).
    fn handle_close_all(&self, now_ms: i64) -> Value {
        let positions = self.controller.positions();
        let mut closed = Vec::new();
        let mut errors = Vec::new();
        for position in positions.iter().filter(|p| p.volume > 0.0) {
            let order = ManualOrder {
                order_id: format!("close_all_{now_ms}_{}", position.symbol),
                symbol: position.symbol.clone(),
                exchange: position.exchange.clone(),
                direction: position.direction.opposite(),
                offset: Offset::Close,
                price: 0.0,
                volume: position.volume,
                is_manual: true,
            };
            match &self.order_sink {
                Some(sink) => match sink.submit(&order) {
                    Ok(()) => closed.push(order),
                    Err(e) => errors.push(json!({"symbol": position.symbol, "error": e.to_string()})),
                },
                None => closed.push(order),
            }
        }
        json!({
            "closed_count": closed.len(),
            "closed": closed,
            "errors": errors,
        })
    }

    fn registry(&self) -> Result<&Arc<dyn StrategyRegistry>, CommandError> {
        self.strategy_registry
            .as_ref()
            .ok_or_else(|| CommandError::Unsupported("no strategy registry configured".into()))
    }

    /// Required: `strategy_id`. Looks up the strategy's parameter schema
    /// from the registry collaborator, surfacing `StrategyNotFound` when
    /// unknown (§7). The strategy runtime itself stays out of scope.
    fn handle_load_strategy(&self, payload: &Value) -> Result<Value, CommandError> {
        let strategy_id = payload
            .get("strategy_id")
            .and_then(Value::as_str)
            .ok_or_else(|| CommandError::MissingField("strategy_id".into()))?;
        let schema = strategy_loader::require_schema(self.registry()?.as_ref(), strategy_id)?;
        Ok(json!({"strategy_id": strategy_id, "parameters": schema}))
    }

    /// Required: `strategy_id, params`. Validates each param against the
    /// registry's schema before merging it into the matching strategy's
    /// parameter map.
    fn handle_update_params(&self, payload: &Value) -> Result<Value, CommandError> {
        let strategy_id = payload
            .get("strategy_id")
            .and_then(Value::as_str)
            .ok_or_else(|| CommandError::MissingField("strategy_id".into()))?;
        let raw_params = payload
            .get("params")
            .and_then(Value::as_object)
            .ok_or_else(|| CommandError::MissingField("params".into()))?;
        let updates: HashMap<String, Value> = raw_params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let schema = strategy_loader::require_schema(self.registry()?.as_ref(), strategy_id)?;
        let validated = strategy_loader::validate_params(&schema, &updates)?;

        let mut strategies = self.controller.strategies();
        let Some(strategy) = strategies.iter_mut().find(|s| s.strategy_id == strategy_id) else {
            return Err(CoreError::StrategyNotFound {
                strategy_id: strategy_id.to_string(),
            }
            .into());
        };
        for (name, value) in &validated {
            strategy.parameters.insert(name.clone(), ParamValue::Scalar(value.clone()));
        }
        let updated_count = validated.len();
        self.controller.set_strategies(strategies);
        Ok(json!({"strategy_id": strategy_id, "updated": updated_count}))
    }

    /// Required: `strategy_id, policy ∈ {reset, preserve, selective}`;
    /// `preserve` (list of variable names) is consulted only for
    /// `selective`.
    fn handle_reload_strategy(&self, payload: &Value) -> Result<Value, CommandError> {
        let strategy_id = payload
            .get("strategy_id")
            .and_then(Value::as_str)
            .ok_or_else(|| CommandError::MissingField("strategy_id".into()))?;
        let policy = match payload.get("policy").and_then(Value::as_str) {
            Some("reset") => HotReloadPolicy::Reset,
            Some("preserve") => HotReloadPolicy::Preserve,
            Some("selective") => HotReloadPolicy::Selective,
            _ => return Err(CommandError::MissingField("policy".into())),
        };
        let selective_keep: Vec<String> = payload
            .get("preserve")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();

        let strategies = self.controller.strategies();
        let Some(strategy) = strategies.iter().find(|s| s.strategy_id == strategy_id) else {
            return Err(CoreError::StrategyNotFound {
                strategy_id: strategy_id.to_string(),
            }
            .into());
        };
        let current_variables: Vec<String> = strategy.variables.keys().cloned().collect();
        let outcome = strategy_loader::apply_hot_reload(policy, &current_variables, &selective_keep)
            .map_err(CommandError::Core)?;
        Ok(json!({
            "strategy_id": strategy_id,
            "preserved_variables": outcome.preserved_variables,
            "reset_variables": outcome.reset_variables,
        }))
    }

    fn build_response(request: &WireMessage, result: Result<Value, CommandError>) -> WireMessage {
        match result {
            Ok(payload) => WireMessage::new(request.id.clone(), CommandType::Response, payload),
            Err(err) => {
                let (code, details): (String, HashMap<String, Value>) = match &err {
                    CommandError::Core(core_err) => (core_err.code().to_string(), core_err.details()),
                    CommandError::MissingField(field) => (
                        "MISSING_FIELD".to_string(),
                        HashMap::from([("field".to_string(), json!(field))]),
                    ),
                    CommandError::InvalidField { field, reason } => (
                        "INVALID_FIELD".to_string(),
                        HashMap::from([
                            ("field".to_string(), json!(field)),
                            ("reason".to_string(), json!(reason)),
                        ]),
                    ),
                    CommandError::Unsupported(_) => ("UNSUPPORTED_COMMAND".to_string(), HashMap::new()),
                };
                let mut payload = Map::new();
                payload.insert("error".into(), Value::String(err.to_string()));
                payload.insert("error_code".into(), Value::String(code));
                for (k, v) in details {
                    payload.insert(k, v);
                }
                WireMessage::new(request.id.clone(), CommandType::Error, Value::Object(payload))
            }
        }
    }
}
