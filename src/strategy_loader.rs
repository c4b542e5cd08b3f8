//! Strategy loader boundary (§7; supplemented feature, grounded on
//! `core/strategies/manager.py`).
//!
//! The strategy runtime itself is out of scope for this core — loading,
//! compiling, and executing a strategy module belongs to a collaborator.
//! What the core owns is the narrow validation surface the command
//! boundary needs before it can report `StrategyNotFound`,
//! `StrategyLoadFailed`, `StrategyParamInvalid`, or `HotReloadFailed`
//! instead of silently accepting malformed requests.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// UI-facing parameter type, mirrored from the original's `ParameterType`
/// enum (int/float/string/bool/enum) so a parameter schema can be
/// validated without the strategy runtime itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    Int,
    Float,
    String,
    Bool,
    Enum,
}

/// Declares the shape of one strategy parameter: type, optional numeric
/// bounds, and optional enum options. Required parameters with no
/// matching key in an update request fail validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSchema {
    pub name: String,
    pub param_type: ParamType,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub options: Option<Vec<Value>>,
}

/// How variable state is handled across a hot reload, mirrored from the
/// original's `HotReloadPolicy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotReloadPolicy {
    /// Reset every variable to its initial value.
    Reset,
    /// Preserve every variable as-is.
    Preserve,
    /// Preserve only the variables named in the reload request.
    Selective,
}

#[derive(Debug, Clone)]
pub struct ReloadOutcome {
    pub policy: HotReloadPolicy,
    pub preserved_variables: Vec<String>,
    pub reset_variables: Vec<String>,
}

/// Validates a parameter update against a declared schema. Returns the
/// coerced values on success.
///
/// - Every required (schema-declared) parameter must be present.
/// - Numeric parameters outside `[min_value, max_value]` are rejected.
/// - Enum parameters must match one of `options`.
pub fn validate_params(
    schema: &[ParamSchema],
    updates: &HashMap<String, Value>,
) -> CoreResult<HashMap<String, Value>> {
    let mut validated = HashMap::with_capacity(updates.len());
    for param in schema {
        let Some(value) = updates.get(&param.name) else {
            continue;
        };
        match param.param_type {
            ParamType::Int | ParamType::Float => {
                let Some(n) = value.as_f64() else {
                    return Err(CoreError::StrategyParamInvalid {
                        name: param.name.clone(),
                        reason: "expected a number".into(),
                    });
                };
                if let Some(min) = param.min_value {
                    if n < min {
                        return Err(CoreError::StrategyParamInvalid {
                            name: param.name.clone(),
                            reason: format!("{n} is below minimum {min}"),
                        });
                    }
                }
                if let Some(max) = param.max_value {
                    if n > max {
                        return Err(CoreError::StrategyParamInvalid {
                            name: param.name.clone(),
                            reason: format!("{n} is above maximum {max}"),
                        });
                    }
                }
            }
            ParamType::Bool => {
                if !value.is_boolean() {
                    return Err(CoreError::StrategyParamInvalid {
                        name: param.name.clone(),
                        reason: "expected a boolean".into(),
                    });
                }
            }
            ParamType::String => {
                if !value.is_string() {
                    return Err(CoreError::StrategyParamInvalid {
                        name: param.name.clone(),
                        reason: "expected a string".into(),
                    });
                }
            }
            ParamType::Enum => {
                let options = param.options.as_deref().unwrap_or_default();
                if !options.contains(value) {
                    return Err(CoreError::StrategyParamInvalid {
                        name: param.name.clone(),
                        reason: format!("{value} is not one of the declared options"),
                    });
                }
            }
        }
        validated.insert(param.name.clone(), value.clone());
    }
    Ok(validated)
}

/// Applies a hot-reload policy to the current variable set, returning
/// which variables were preserved vs. reset. `selective_keep` is only
/// consulted under [`HotReloadPolicy::Selective`].
pub fn apply_hot_reload(
    policy: HotReloadPolicy,
    current_variables: &[String],
    selective_keep: &[String],
) -> CoreResult<ReloadOutcome> {
    let (preserved, reset): (Vec<String>, Vec<String>) = match policy {
        HotReloadPolicy::Reset => (Vec::new(), current_variables.to_vec()),
        HotReloadPolicy::Preserve => (current_variables.to_vec(), Vec::new()),
        HotReloadPolicy::Selective => {
            let preserved: Vec<String> = current_variables
                .iter()
                .filter(|v| selective_keep.contains(v))
                .cloned()
                .collect();
            let reset: Vec<String> = current_variables
                .iter()
                .filter(|v| !selective_keep.contains(v))
                .cloned()
                .collect();
            (preserved, reset)
        }
    };
    Ok(ReloadOutcome {
        policy,
        preserved_variables: preserved,
        reset_variables: reset,
    })
}

/// A resolved, loaded strategy collaborators can look up by id. The
/// runtime behind this is entirely out of scope; this exists only so the
/// boundary can report `StrategyNotFound` uniformly.
pub trait StrategyRegistry: Send + Sync {
    fn lookup(&self, strategy_id: &str) -> Option<Vec<ParamSchema>>;
}

/// Looks up a strategy's parameter schema, surfacing `StrategyNotFound`
/// when the id is unknown to the registry.
pub fn require_schema(
    registry: &dyn StrategyRegistry,
    strategy_id: &str,
) -> CoreResult<Vec<ParamSchema>> {
    registry
        .lookup(strategy_id)
        .ok_or_else(|| CoreError::StrategyNotFound {
            strategy_id: strategy_id.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fast_slow_schema() -> Vec<ParamSchema> {
        vec![
            ParamSchema {
                name: "fast".into(),
                param_type: ParamType::Int,
                min_value: Some(1.0),
                max_value: Some(50.0),
                options: None,
            },
            ParamSchema {
                name: "mode".into(),
                param_type: ParamType::Enum,
                min_value: None,
                max_value: None,
                options: Some(vec![json!("aggressive"), json!("conservative")]),
            },
        ]
    }

    #[test]
    fn numeric_param_within_bounds_is_accepted() {
        let updates = HashMap::from([("fast".to_string(), json!(10))]);
        let validated = validate_params(&fast_slow_schema(), &updates).unwrap();
        assert_eq!(validated["fast"], json!(10));
    }

    #[test]
    fn numeric_param_out_of_bounds_is_rejected() {
        let updates = HashMap::from([("fast".to_string(), json!(100))]);
        let err = validate_params(&fast_slow_schema(), &updates).unwrap_err();
        assert!(matches!(err, CoreError::StrategyParamInvalid { .. }));
    }

    #[test]
    fn enum_param_outside_options_is_rejected() {
        let updates = HashMap::from([("mode".to_string(), json!("chaotic"))]);
        let err = validate_params(&fast_slow_schema(), &updates).unwrap_err();
        assert!(matches!(err, CoreError::StrategyParamInvalid { .. }));
    }

    #[test]
    fn reset_policy_resets_every_variable() {
        let outcome = apply_hot_reload(
            HotReloadPolicy::Reset,
            &["a".to_string(), "b".to_string()],
            &[],
        )
        .unwrap();
        assert!(outcome.preserved_variables.is_empty());
        assert_eq!(outcome.reset_variables.len(), 2);
    }

    #[test]
    fn selective_policy_preserves_only_named_variables() {
        let outcome = apply_hot_reload(
            HotReloadPolicy::Selective,
            &["a".to_string(), "b".to_string(), "c".to_string()],
            &["b".to_string()],
        )
        .unwrap();
        assert_eq!(outcome.preserved_variables, vec!["b".to_string()]);
        assert_eq!(outcome.reset_variables, vec!["a".to_string(), "c".to_string()]);
    }

    struct StubRegistry;
    impl StrategyRegistry for StubRegistry {
        fn lookup(&self, strategy_id: &str) -> Option<Vec<ParamSchema>> {
            if strategy_id == "known" {
                Some(fast_slow_schema())
            } else {
                None
            }
        }
    }

    #[test]
    fn unknown_strategy_id_surfaces_not_found() {
        let err = require_schema(&StubRegistry, "missing").unwrap_err();
        assert!(matches!(err, CoreError::StrategyNotFound { .. }));
    }
}
