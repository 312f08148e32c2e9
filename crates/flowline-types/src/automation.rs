//! Automation domain types.
//!
//! An `Automation` is a stored workflow definition: a graph of `Node`s joined
//! by `Edge`s plus default variables, error-handling policy and retry
//! configuration. The same `WorkflowDefinition` shape is used for the
//! persisted JSON blob and for YAML/JSON definition files.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Variable map used for automation defaults, execution input and snapshots.
pub type Variables = Map<String, Value>;

// ---------------------------------------------------------------------------
// Automation
// ---------------------------------------------------------------------------

/// A stored workflow definition that can be executed.
///
/// Only explicit update operations mutate an automation. In-flight executions
/// work on their own copy-on-write variable overlay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Automation {
    /// UUIDv7 assigned on creation.
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Nodes, edges and default variables.
    pub workflow: WorkflowDefinition,
    /// Policy applied to nodes that don't set their own `error_handling`.
    #[serde(default)]
    pub error_handling: ErrorHandling,
    #[serde(default)]
    pub retry_config: RetryConfig,
    /// Wall-clock budget for a whole execution. Falls back to the engine default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    pub status: AutomationStatus,
    /// Starts at 1 and is bumped on every definition update.
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Automation {
    /// Effective error-handling mode for a node.
    pub fn error_handling_for(&self, node: &Node) -> ErrorHandling {
        node.error_handling.unwrap_or(self.error_handling)
    }

    /// Effective retry budget for a node.
    pub fn max_retries_for(&self, node: &Node) -> u32 {
        node.max_retries.unwrap_or(self.retry_config.max_retries)
    }
}

/// Lifecycle status of an automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AutomationStatus {
    #[default]
    Draft,
    Active,
    Paused,
    Archived,
}

impl AutomationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutomationStatus::Draft => "draft",
            AutomationStatus::Active => "active",
            AutomationStatus::Paused => "paused",
            AutomationStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for AutomationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AutomationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(AutomationStatus::Draft),
            "active" => Ok(AutomationStatus::Active),
            "paused" => Ok(AutomationStatus::Paused),
            "archived" => Ok(AutomationStatus::Archived),
            other => Err(format!("invalid automation status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow graph
// ---------------------------------------------------------------------------

/// The persisted graph structure of an automation.
///
/// ```yaml
/// nodes:
///   - id: greet
///     type: log
///     name: Greet
///     config:
///       message: "Order #{{order_id}}"
/// edges:
///   - id: e1
///     source: greet
///     target: ship
/// variables:
///   order_id: 42
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Default variables, overlaid by execution input at run time.
    #[serde(default)]
    pub variables: Variables,
}

/// One step in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Author-chosen id, unique within the automation.
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub name: String,
    /// Action configuration. String fields may contain `{{name}}` placeholders.
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_handling: Option<ErrorHandling>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

/// Directed dependency between two nodes of the same automation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    /// Optional JEXL guard. The edge is followed only when it evaluates truthy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// The action kind a node performs.
///
/// `log`, `set_variable` and `delay` are handled by the engine itself; every
/// other kind is dispatched to a handler injected into the action registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Log,
    SetVariable,
    Delay,
    HttpRequest,
    Navigate,
    Click,
    TypeText,
    Extract,
    Screenshot,
    RunScript,
    SendEmail,
}

impl NodeType {
    pub const ALL: [NodeType; 11] = [
        NodeType::Log,
        NodeType::SetVariable,
        NodeType::Delay,
        NodeType::HttpRequest,
        NodeType::Navigate,
        NodeType::Click,
        NodeType::TypeText,
        NodeType::Extract,
        NodeType::Screenshot,
        NodeType::RunScript,
        NodeType::SendEmail,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Log => "log",
            NodeType::SetVariable => "set_variable",
            NodeType::Delay => "delay",
            NodeType::HttpRequest => "http_request",
            NodeType::Navigate => "navigate",
            NodeType::Click => "click",
            NodeType::TypeText => "type_text",
            NodeType::Extract => "extract",
            NodeType::Screenshot => "screenshot",
            NodeType::RunScript => "run_script",
            NodeType::SendEmail => "send_email",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("invalid node type: '{s}'"))
    }
}

// ---------------------------------------------------------------------------
// Error handling and retry configuration
// ---------------------------------------------------------------------------

/// What to do when a node's action fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorHandling {
    /// Abort the run and mark the execution failed.
    #[default]
    Stop,
    /// Log the failure and keep walking to successors.
    Continue,
    /// Re-invoke the action while the retry budget lasts, then stop.
    Retry,
}

impl fmt::Display for ErrorHandling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorHandling::Stop => "stop",
            ErrorHandling::Continue => "continue",
            ErrorHandling::Retry => "retry",
        };
        f.write_str(s)
    }
}

/// Delay growth between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed,
    Linear,
    #[default]
    Exponential,
}

/// Automation-wide retry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub backoff: BackoffStrategy,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff: BackoffStrategy::default(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
