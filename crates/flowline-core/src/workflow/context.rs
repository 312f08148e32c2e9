//! Per-run execution context.
//!
//! `RunContext` is the mutable state that flows through one execution: the
//! variable overlay (automation defaults with the execution input laid on
//! top) and node outputs. It owns its own copy of the defaults, so nothing a
//! node does can reach back into the stored automation.

use flowline_types::automation::{Node, Variables};
use serde_json::{json, Value};
use uuid::Uuid;

/// Maximum size of a single node output (1 MB).
pub const MAX_NODE_OUTPUT_SIZE: usize = 1_048_576;

/// Config key naming a variable that receives the node's output.
pub const OUTPUT_VARIABLE_KEY: &str = "output_variable";

#[derive(Debug, Clone)]
pub struct RunContext {
    execution_id: Uuid,
    variables: Variables,
    outputs: Variables,
}

impl RunContext {
    /// Overlay `input` on `defaults`; input wins on key collisions.
    pub fn new(execution_id: Uuid, defaults: &Variables, input: &Variables) -> Self {
        let mut variables = defaults.clone();
        for (k, v) in input {
            variables.insert(k.clone(), v.clone());
        }
        Self {
            execution_id,
            variables,
            outputs: Variables::new(),
        }
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn outputs(&self) -> &Variables {
        &self.outputs
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    /// Merge variable updates returned by an action.
    pub fn apply(&mut self, updates: Variables) {
        self.variables.extend(updates);
    }

    /// Store a node's output under its id, and under `output_variable` when
    /// the node config names one.
    ///
    /// Outputs over `MAX_NODE_OUTPUT_SIZE` are replaced with a marker object.
    pub fn record_output(&mut self, node: &Node, output: Value) {
        let size = serde_json::to_string(&output).map(|s| s.len()).unwrap_or(0);
        let output = if size > MAX_NODE_OUTPUT_SIZE {
            tracing::warn!(
                execution_id = %self.execution_id,
                node_id = node.id.as_str(),
                size,
                max = MAX_NODE_OUTPUT_SIZE,
                "node output exceeds size limit, truncating"
            );
            json!({
                "_truncated": true,
                "_original_size": size,
            })
        } else {
            output
        };

        if let Some(Value::String(var)) = node.config.get(OUTPUT_VARIABLE_KEY) {
            if !var.is_empty() {
                self.variables.insert(var.clone(), output.clone());
            }
        }
        self.outputs.insert(node.id.clone(), output);
    }

    /// JSON object handed to edge guard expressions:
    /// `{ "variables": {...}, "nodes": { "<id>": { "output": ... } } }`.
    pub fn to_expression_context(&self) -> Value {
        let nodes: serde_json::Map<String, Value> = self
            .outputs
            .iter()
            .map(|(id, out)| (id.clone(), json!({ "output": out })))
            .collect();
        json!({
            "variables": self.variables,
            "nodes": nodes,
        })
    }

    /// Consume the context, returning `(variables, outputs)`.
    pub fn into_parts(self) -> (Variables, Variables) {
        (self.variables, self.outputs)
    }
}
