//! Engine-internal actions with no external effects.
//!
//! - `log` -- writes the resolved `message` into the execution log
//! - `set_variable` -- writes `name`/`value` (or a `variables` map) into the run
//! - `delay` -- sleeps for `duration_ms`

use std::time::Duration;

use flowline_types::automation::{NodeType, Variables};
use flowline_types::execution::LogLevel;
use serde_json::{json, Value};

use super::action::{ActionError, ActionHandler, ActionOutput, ActionRegistry, ActionRequest};

/// Longest sleep a `delay` node may request (one hour).
pub const MAX_DELAY_MS: u64 = 3_600_000;

pub(crate) fn register_builtins(registry: &mut ActionRegistry) {
    registry
        .register(NodeType::Log, LogAction)
        .register(NodeType::SetVariable, SetVariableAction)
        .register(NodeType::Delay, DelayAction);
}

// ---------------------------------------------------------------------------
// log
// ---------------------------------------------------------------------------

pub struct LogAction;

impl ActionHandler for LogAction {
    async fn execute(&self, request: ActionRequest) -> Result<ActionOutput, ActionError> {
        let message = match request.config.get("message") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => return Err(ActionError::InvalidConfig("log requires 'message'".to_string())),
        };
        let level = match request.config.get("level").and_then(Value::as_str) {
            Some(l) => l
                .parse::<LogLevel>()
                .map_err(ActionError::InvalidConfig)?,
            None => LogLevel::Info,
        };

        Ok(ActionOutput {
            output: json!({ "message": message }),
            logs: vec![(level, message)],
            ..Default::default()
        })
    }
}

// ---------------------------------------------------------------------------
// set_variable
// ---------------------------------------------------------------------------

pub struct SetVariableAction;

impl ActionHandler for SetVariableAction {
    async fn execute(&self, request: ActionRequest) -> Result<ActionOutput, ActionError> {
        let mut set = Variables::new();

        if let Some(map) = request.config.get("variables") {
            let Value::Object(map) = map else {
                return Err(ActionError::InvalidConfig(
                    "'variables' must be an object".to_string(),
                ));
            };
            set.extend(map.clone());
        }

        match request.config.get("name") {
            Some(Value::String(name)) if !name.is_empty() => {
                let value = request.config.get("value").cloned().unwrap_or(Value::Null);
                set.insert(name.clone(), value);
            }
            Some(_) => {
                return Err(ActionError::InvalidConfig(
                    "'name' must be a non-empty string".to_string(),
                ));
            }
            None => {}
        }

        if set.is_empty() {
            return Err(ActionError::InvalidConfig(
                "set_variable requires 'name' or 'variables'".to_string(),
            ));
        }

        Ok(ActionOutput {
            output: Value::Object(set.clone()),
            set_variables: set,
            logs: Vec::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// delay
// ---------------------------------------------------------------------------

pub struct DelayAction;

impl ActionHandler for DelayAction {
    async fn execute(&self, request: ActionRequest) -> Result<ActionOutput, ActionError> {
        let ms = request
            .config
            .get("duration_ms")
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                ActionError::InvalidConfig("delay requires a non-negative 'duration_ms'".to_string())
            })?;
        if ms > MAX_DELAY_MS {
            return Err(ActionError::InvalidConfig(format!(
                "duration_ms {ms} exceeds maximum of {MAX_DELAY_MS}"
            )));
        }

        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(ActionOutput::value(json!({ "slept_ms": ms })))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use flowline_types::automation::Node;
    use serde_json::Map;
    use uuid::Uuid;

    fn request(node_type: NodeType, config: Value) -> ActionRequest {
        let Value::Object(config) = config else {
            panic!("config must be an object");
        };
        ActionRequest {
            execution_id: Uuid::now_v7(),
            node: Node {
                id: "n".to_string(),
                node_type,
                name: String::new(),
                config: Map::new(),
                error_handling: None,
                max_retries: None,
            },
            config,
            variables: Variables::new(),
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn test_log_emits_message() {
        let out = LogAction
            .execute(request(NodeType::Log, json!({"message": "Order #42", "level": "warn"})))
            .await
            .unwrap();
        assert_eq!(out.logs, vec![(LogLevel::Warn, "Order #42".to_string())]);
        assert_eq!(out.output["message"], "Order #42");
    }

    #[tokio::test]
    async fn test_log_renders_non_string_message() {
        let out = LogAction
            .execute(request(NodeType::Log, json!({"message": 42})))
            .await
            .unwrap();
        assert_eq!(out.logs[0], (LogLevel::Info, "42".to_string()));
    }

    #[tokio::test]
    async fn test_log_without_message_is_invalid() {
        let err = LogAction.execute(request(NodeType::Log, json!({}))).await.unwrap_err();
        assert!(matches!(err, ActionError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_set_variable_single_and_map() {
        let out = SetVariableAction
            .execute(request(
                NodeType::SetVariable,
                json!({"name": "total", "value": 99, "variables": {"currency": "EUR"}}),
            ))
            .await
            .unwrap();
        assert_eq!(out.set_variables["total"], 99);
        assert_eq!(out.set_variables["currency"], "EUR");
    }

    #[tokio::test]
    async fn test_set_variable_requires_something() {
        let err = SetVariableAction
            .execute(request(NodeType::SetVariable, json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_delay_zero() {
        let out = DelayAction
            .execute(request(NodeType::Delay, json!({"duration_ms": 0})))
            .await
            .unwrap();
        assert_eq!(out.output["slept_ms"], 0);
    }

    #[tokio::test]
    async fn test_delay_rejects_bad_duration() {
        let err = DelayAction
            .execute(request(NodeType::Delay, json!({"duration_ms": "soon"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidConfig(_)));

        let err = DelayAction
            .execute(request(NodeType::Delay, json!({"duration_ms": MAX_DELAY_MS + 1})))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidConfig(_)));
    }
}
