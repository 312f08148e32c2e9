//! Action dispatch: the seam between the engine and the things nodes do.
//!
//! An `ActionHandler` performs one node type's effect. Handlers are injected
//! into an `ActionRegistry` value that each executor owns, so several engines
//! with different capability sets can run side by side.
//!
//! Follows the blanket-impl pattern for dynamic dispatch:
//! 1. `ActionHandler` uses native async fn in traits
//! 2. Object-safe `ActionHandlerDyn` with boxed futures, blanket-implemented
//! 3. `ActionRegistry` stores `Arc<dyn ActionHandlerDyn>` per `NodeType`

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use flowline_types::automation::{Node, NodeType, Variables};
use flowline_types::execution::LogLevel;
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

/// Everything a handler gets for one invocation.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub execution_id: Uuid,
    pub node: Node,
    /// Node configuration with placeholders already resolved.
    pub config: Map<String, Value>,
    /// Read-only view of the run's variables at dispatch time.
    pub variables: Variables,
    /// 1-based attempt number for this node.
    pub attempt: u32,
}

/// A successful invocation's result.
#[derive(Debug, Clone, Default)]
pub struct ActionOutput {
    /// Stored under the node id in the execution output.
    pub output: Value,
    /// Variables written back into the run context.
    pub set_variables: Variables,
    /// Lines appended to the execution log, attributed to the node.
    pub logs: Vec<(LogLevel, String)>,
}

impl ActionOutput {
    pub fn value(output: Value) -> Self {
        Self {
            output,
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, thiserror::Error)]
pub enum ActionError {
    /// The action ran and failed.
    #[error("{message}")]
    Failed { message: String, retryable: bool },

    /// The node configuration is unusable. Never retryable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No handler is registered for the node type.
    #[error("unsupported action: no handler registered for node type '{0}'")]
    Unsupported(NodeType),
}

impl ActionError {
    /// A transient failure worth retrying (timeouts, rate limits, flaky I/O).
    pub fn retryable(message: impl Into<String>) -> Self {
        ActionError::Failed {
            message: message.into(),
            retryable: true,
        }
    }

    /// A failure that will not go away by trying again.
    pub fn fatal(message: impl Into<String>) -> Self {
        ActionError::Failed {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ActionError::Failed { retryable: true, .. })
    }
}

// ---------------------------------------------------------------------------
// Handler traits
// ---------------------------------------------------------------------------

/// Performs one node type's effect.
pub trait ActionHandler: Send + Sync + 'static {
    fn execute(
        &self,
        request: ActionRequest,
    ) -> impl Future<Output = Result<ActionOutput, ActionError>> + Send;
}

/// Object-safe version of [`ActionHandler`] with boxed futures.
pub trait ActionHandlerDyn: Send + Sync {
    fn execute_boxed<'a>(
        &'a self,
        request: ActionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ActionOutput, ActionError>> + Send + 'a>>;
}

impl<T: ActionHandler> ActionHandlerDyn for T {
    fn execute_boxed<'a>(
        &'a self,
        request: ActionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ActionOutput, ActionError>> + Send + 'a>> {
        Box::pin(self.execute(request))
    }
}

/// Adapter turning an async closure into an [`ActionHandler`].
pub struct FnAction<F>(F);

/// Wrap a closure `Fn(ActionRequest) -> Future` as a handler.
pub fn action_fn<F, Fut>(f: F) -> FnAction<F>
where
    F: Fn(ActionRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ActionOutput, ActionError>> + Send + 'static,
{
    FnAction(f)
}

impl<F, Fut> ActionHandler for FnAction<F>
where
    F: Fn(ActionRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ActionOutput, ActionError>> + Send + 'static,
{
    fn execute(
        &self,
        request: ActionRequest,
    ) -> impl Future<Output = Result<ActionOutput, ActionError>> + Send {
        (self.0)(request)
    }
}

// ---------------------------------------------------------------------------
// ActionRegistry
// ---------------------------------------------------------------------------

/// Mapping from node type to handler. Cheap to clone.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: HashMap<NodeType, Arc<dyn ActionHandlerDyn>>,
}

impl ActionRegistry {
    /// An empty registry. Every dispatch fails with `Unsupported`.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the engine-internal `log`, `set_variable` and `delay`
    /// actions registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        super::builtin::register_builtins(&mut registry);
        registry
    }

    /// Register (or replace) the handler for `node_type`.
    pub fn register<H: ActionHandler>(&mut self, node_type: NodeType, handler: H) -> &mut Self {
        self.handlers.insert(node_type, Arc::new(handler));
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<H: ActionHandler>(mut self, node_type: NodeType, handler: H) -> Self {
        self.register(node_type, handler);
        self
    }

    pub fn supports(&self, node_type: NodeType) -> bool {
        self.handlers.contains_key(&node_type)
    }

    /// Registered node types in a stable order.
    pub fn node_types(&self) -> Vec<NodeType> {
        NodeType::ALL
            .iter()
            .copied()
            .filter(|t| self.handlers.contains_key(t))
            .collect()
    }

    /// Invoke the handler registered for the request's node type.
    pub async fn dispatch(&self, request: ActionRequest) -> Result<ActionOutput, ActionError> {
        let node_type = request.node.node_type;
        let handler = self
            .handlers
            .get(&node_type)
            .cloned()
            .ok_or(ActionError::Unsupported(node_type))?;
        handler.execute_boxed(request).await
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("node_types", &self.node_types())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
