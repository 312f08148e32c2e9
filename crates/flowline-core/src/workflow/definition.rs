//! Automation definition files.
//!
//! Converts between YAML/JSON files and `AutomationDefinition`, the
//! author-facing shape of an automation, and validates structural
//! constraints before anything is stored.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use flowline_types::automation::{ErrorHandling, RetryConfig, WorkflowDefinition};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::dag::{compile_graph, GraphError};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DefinitionError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("unsupported definition format: '{0}' (expected .yaml, .yml or .json)")]
    UnsupportedFormat(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Definition
// ---------------------------------------------------------------------------

/// Everything an author writes to describe an automation.
///
/// ```yaml
/// name: order-followup
/// error_handling: retry
/// retry_config:
///   max_retries: 2
///   backoff: exponential
/// nodes:
///   - id: greet
///     type: log
///     config:
///       message: "Order #{{order_id}}"
/// edges: []
/// variables:
///   order_id: 42
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub error_handling: ErrorHandling,
    #[serde(default)]
    pub retry_config: RetryConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(flatten)]
    pub workflow: WorkflowDefinition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionFormat {
    Yaml,
    Json,
}

impl DefinitionFormat {
    /// Pick the format from a file extension.
    pub fn from_path(path: &Path) -> Result<Self, DefinitionError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "yaml" | "yml" => Ok(DefinitionFormat::Yaml),
            "json" => Ok(DefinitionFormat::Json),
            _ => Err(DefinitionError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse and validate a definition.
pub fn parse_definition(
    content: &str,
    format: DefinitionFormat,
) -> Result<AutomationDefinition, DefinitionError> {
    let def: AutomationDefinition = match format {
        DefinitionFormat::Yaml => serde_yaml_ng::from_str(content)
            .map_err(|e| DefinitionError::Parse(e.to_string()))?,
        DefinitionFormat::Json => {
            serde_json::from_str(content).map_err(|e| DefinitionError::Parse(e.to_string()))?
        }
    };
    validate_definition(&def)?;
    Ok(def)
}

pub fn serialize_definition(
    def: &AutomationDefinition,
    format: DefinitionFormat,
) -> Result<String, DefinitionError> {
    match format {
        DefinitionFormat::Yaml => {
            serde_yaml_ng::to_string(def).map_err(|e| DefinitionError::Parse(e.to_string()))
        }
        DefinitionFormat::Json => {
            serde_json::to_string_pretty(def).map_err(|e| DefinitionError::Parse(e.to_string()))
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints.
///
/// Checks:
/// - Name is non-empty
/// - At least one node exists, every node id is non-empty and unique
/// - Edges reference existing nodes and the graph is acyclic
/// - Timeout > 0 if set
///
/// Node types are checked during deserialization.
pub fn validate_definition(def: &AutomationDefinition) -> Result<(), DefinitionError> {
    if def.name.trim().is_empty() {
        return Err(DefinitionError::Validation(
            "automation name must not be empty".to_string(),
        ));
    }
    validate_workflow(&def.workflow)?;
    if def.timeout_secs == Some(0) {
        return Err(DefinitionError::Validation(
            "timeout_secs must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

/// Graph-level checks shared with automation updates.
pub fn validate_workflow(workflow: &WorkflowDefinition) -> Result<(), DefinitionError> {
    if workflow.nodes.is_empty() {
        return Err(DefinitionError::Validation(
            "automation must have at least one node".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for node in &workflow.nodes {
        if node.id.trim().is_empty() {
            return Err(DefinitionError::Validation("node id must not be empty".to_string()));
        }
        if !seen.insert(node.id.as_str()) {
            return Err(GraphError::DuplicateNode(node.id.clone()).into());
        }
    }

    compile_graph(&workflow.nodes, &workflow.edges)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a definition file, choosing the format by extension.
pub fn load_definition_file(path: &Path) -> Result<AutomationDefinition, DefinitionError> {
    let format = DefinitionFormat::from_path(path)?;
    let content = std::fs::read_to_string(path)?;
    parse_definition(&content, format)
}

/// Write a definition file, creating parent directories as needed.
pub fn save_definition_file(path: &Path, def: &AutomationDefinition) -> Result<(), DefinitionError> {
    let format = DefinitionFormat::from_path(path)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serialize_definition(def, format)?)?;
    Ok(())
}

/// Every parseable definition file directly inside `dir`, sorted by path.
/// Unparseable files are skipped with a warning.
pub fn discover_definitions(
    dir: &Path,
) -> Result<Vec<(PathBuf, AutomationDefinition)>, DefinitionError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && DefinitionFormat::from_path(p).is_ok())
        .collect();
    paths.sort();

    let mut found = Vec::with_capacity(paths.len());
    for path in paths {
        match load_definition_file(&path) {
            Ok(def) => found.push((path, def)),
            Err(e) => tracing::warn!(?path, error = %e, "skipping invalid definition file"),
        }
    }
    Ok(found)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
