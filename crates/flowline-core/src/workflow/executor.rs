//! Workflow executor: depth-first graph walk with per-node error policy.
//!
//! # Execution flow
//!
//! 1. Register a cancellation token and move the execution Pending -> Running.
//! 2. Compile the automation's graph.
//! 3. Walk depth-first from each start node. A visited set makes every node
//!    run at most once, so a shared successor fires right after the first
//!    predecessor that reaches it.
//! 4. Per node: resolve placeholders, dispatch through the `ActionRegistry`,
//!    and on failure apply the `retry::decide` table.
//! 5. The whole walk runs under the automation's wall-clock timeout.
//! 6. Finalize with the terminal status, output, variables and retry count.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use flowline_types::automation::{Automation, AutomationStatus, Node, Variables};
use flowline_types::config::ExecutorConfig;
use flowline_types::error::RepositoryError;
use flowline_types::execution::{Execution, ExecutionStatus, LogEntry, LogLevel, TriggerType};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::action::{ActionError, ActionRegistry, ActionRequest};
use super::context::RunContext;
use super::dag::{compile_graph, CompiledGraph, GraphError};
use super::execution::{ExecutionError, ExecutionManager, Failure, RunSnapshot};
use super::expression::GuardEvaluator;
use super::retry::{decide, ErrorClass, FailureDisposition, RetryBudget, RetryPolicy};
use super::variables::resolve_config;
use crate::repository::Store;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A node's action failed and its error policy did not absorb the failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("node '{node_id}' failed: {source}")]
pub struct NodeExecutionError {
    pub node_id: String,
    pub source: ActionError,
}

impl NodeExecutionError {
    pub fn retryable(&self) -> bool {
        self.source.is_retryable()
    }
}

/// The wall-clock budget of a run was exceeded.
#[derive(Debug, Clone, thiserror::Error)]
#[error("execution exceeded its timeout of {0:?}")]
pub struct ExecutionTimeoutError(pub Duration);

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("automation not found: {0}")]
    AutomationNotFound(Uuid),

    #[error("automation {id} is {status}, only active automations can run")]
    AutomationNotActive { id: Uuid, status: AutomationStatus },

    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("execution task failed: {0}")]
    Task(String),
}

/// A run started on its own task.
#[derive(Debug)]
pub struct RunHandle {
    pub execution_id: Uuid,
    pub join: JoinHandle<Result<Execution, ExecutorError>>,
}

impl RunHandle {
    /// Wait for the run to finish.
    pub async fn wait(self) -> Result<Execution, ExecutorError> {
        match self.join.await {
            Ok(result) => result,
            Err(e) => Err(ExecutorError::Task(e.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Walk state
// ---------------------------------------------------------------------------

/// How a walk ended (before the timeout wrapper).
enum WalkEnd {
    Completed,
    Cancelled,
    Failed(NodeExecutionError),
}

/// How one node ended.
enum NodeEnd {
    Completed,
    /// Failed under `continue`; successors still run.
    Absorbed,
    Cancelled,
    Failed(NodeExecutionError),
}

struct RunState {
    ctx: RunContext,
    retry_count: u32,
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Drives executions of automations through their graphs.
///
/// Cheap to clone: every spawned run owns its own handle.
#[derive(Clone)]
pub struct Executor<S: Store> {
    manager: ExecutionManager<S>,
    registry: ActionRegistry,
    config: ExecutorConfig,
}

impl<S: Store> Executor<S> {
    pub fn new(manager: ExecutionManager<S>, registry: ActionRegistry, config: ExecutorConfig) -> Self {
        Self {
            manager,
            registry,
            config,
        }
    }

    pub fn manager(&self) -> &ExecutionManager<S> {
        &self.manager
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Create an execution of an active automation and run it on its own
    /// task.
    ///
    /// Fails fast, without creating anything, if the automation is missing
    /// or not active.
    pub async fn start(
        &self,
        automation_id: Uuid,
        trigger_type: TriggerType,
        input: Variables,
        actor: Option<&str>,
    ) -> Result<RunHandle, ExecutorError> {
        let automation = self
            .manager
            .store()
            .get_automation(&automation_id)
            .await?
            .ok_or(ExecutorError::AutomationNotFound(automation_id))?;
        if automation.status != AutomationStatus::Active {
            return Err(ExecutorError::AutomationNotActive {
                id: automation_id,
                status: automation.status,
            });
        }

        let execution = self
            .manager
            .create(automation_id, trigger_type, input, actor)
            .await?;
        let execution_id = execution.id;

        let executor = self.clone();
        let join = tokio::spawn(async move {
            let result = executor.run(&automation, execution_id).await;
            if let Err(e) = &result {
                tracing::error!(execution_id = %execution_id, error = %e, "execution task failed");
            }
            result
        });

        Ok(RunHandle { execution_id, join })
    }

    /// Run a pending execution of `automation` to completion.
    ///
    /// Returns the finalized execution. If the execution was cancelled
    /// before it could start, it is returned unchanged.
    pub async fn run(&self, automation: &Automation, execution_id: Uuid) -> Result<Execution, ExecutorError> {
        let token = self.manager.register_token(execution_id);

        let execution = match self
            .manager
            .transition(&execution_id, ExecutionStatus::Running, None)
            .await
        {
            Ok(execution) => execution,
            Err(ExecutionError::InvalidTransition { from, .. }) => {
                self.manager.release_token(&execution_id);
                tracing::info!(
                    execution_id = %execution_id,
                    status = from.as_str(),
                    "execution no longer pending, not starting"
                );
                return Ok(self.manager.get(&execution_id).await?);
            }
            Err(e) => {
                self.manager.release_token(&execution_id);
                return Err(e.into());
            }
        };

        let graph = match compile_graph(&automation.workflow.nodes, &automation.workflow.edges) {
            Ok(graph) => graph,
            Err(e) => {
                self.manager
                    .finish(
                        &execution_id,
                        ExecutionStatus::Failed,
                        Some(Failure::new(e.to_string())),
                        RunSnapshot::default(),
                    )
                    .await?;
                return Err(e.into());
            }
        };

        let timeout = Duration::from_secs(
            automation
                .timeout_secs
                .unwrap_or(self.config.default_timeout_secs),
        );
        let mut state = RunState {
            ctx: RunContext::new(execution_id, &automation.workflow.variables, &execution.input),
            retry_count: 0,
        };

        tracing::info!(
            execution_id = %execution_id,
            automation_id = %automation.id,
            automation = automation.name.as_str(),
            nodes = graph.len(),
            "starting workflow execution"
        );

        let walked = tokio::time::timeout(timeout, self.walk(automation, &graph, &mut state, &token)).await;

        let (status, failure) = match walked {
            Ok(WalkEnd::Completed) => (ExecutionStatus::Success, None),
            Ok(WalkEnd::Cancelled) => (ExecutionStatus::Cancelled, Some(Failure::new("cancelled"))),
            Ok(WalkEnd::Failed(err)) => {
                let node_id = err.node_id.clone();
                (ExecutionStatus::Failed, Some(Failure::at_node(err.to_string(), node_id)))
            }
            Err(_) => {
                let err = ExecutionTimeoutError(timeout);
                tracing::warn!(execution_id = %execution_id, error = %err, "execution timed out");
                (ExecutionStatus::Timeout, Some(Failure::new(err.to_string())))
            }
        };

        let RunState { ctx, retry_count } = state;
        let (variables, output) = ctx.into_parts();
        let snapshot = RunSnapshot {
            output,
            variables,
            retry_count,
        };

        match self.manager.finish(&execution_id, status, failure, snapshot).await {
            Ok(_) => {}
            Err(ExecutionError::InvalidTransition { from, .. }) => {
                // Finalized by someone else (e.g. a cancel with no live token).
                tracing::warn!(
                    execution_id = %execution_id,
                    status = from.as_str(),
                    "execution already finalized"
                );
                self.manager.release_token(&execution_id);
            }
            Err(e) => {
                self.manager.release_token(&execution_id);
                return Err(e.into());
            }
        }

        Ok(self.manager.get(&execution_id).await?)
    }

    async fn walk(
        &self,
        automation: &Automation,
        graph: &CompiledGraph,
        state: &mut RunState,
        token: &CancellationToken,
    ) -> WalkEnd {
        let nodes: HashMap<&str, &Node> = automation
            .workflow
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), n))
            .collect();

        let mut visited: HashSet<String> = HashSet::new();
        let mut stack: Vec<String> = graph
            .start_nodes()
            .into_iter()
            .rev()
            .map(str::to_string)
            .collect();

        while let Some(node_id) = stack.pop() {
            if token.is_cancelled() {
                return WalkEnd::Cancelled;
            }
            if !visited.insert(node_id.clone()) {
                continue;
            }
            let Some(node) = nodes.get(node_id.as_str()) else {
                continue;
            };

            match self.run_node(automation, node, state, token).await {
                NodeEnd::Completed | NodeEnd::Absorbed => {}
                NodeEnd::Cancelled => return WalkEnd::Cancelled,
                NodeEnd::Failed(err) => return WalkEnd::Failed(err),
            }

            let (next, warnings) = select_successors(graph, &node_id, &state.ctx);
            for warning in warnings {
                self.log(&state.ctx, LogLevel::Warn, warning, Some(&node_id)).await;
            }
            for target in next.into_iter().rev() {
                if !visited.contains(&target) {
                    stack.push(target);
                }
            }
        }

        WalkEnd::Completed
    }

    async fn run_node(
        &self,
        automation: &Automation,
        node: &Node,
        state: &mut RunState,
        token: &CancellationToken,
    ) -> NodeEnd {
        let mode = automation.error_handling_for(node);
        let max_retries = automation.max_retries_for(node);
        let policy = RetryPolicy::from_config(&automation.retry_config, self.config.max_retry_delay_ms);
        let node_id = node.id.as_str();
        let mut used = 0u32;

        loop {
            let attempt = used + 1;
            self.log(
                &state.ctx,
                LogLevel::Info,
                format!("node starting (attempt {attempt})"),
                Some(node_id),
            )
            .await;

            let request = ActionRequest {
                execution_id: state.ctx.execution_id(),
                node: node.clone(),
                config: resolve_config(&node.config, state.ctx.variables()),
                variables: state.ctx.variables().clone(),
                attempt,
            };

            let error = match self.registry.dispatch(request).await {
                Ok(out) => {
                    for (level, message) in out.logs {
                        self.log(&state.ctx, level, message, Some(node_id)).await;
                    }
                    state.ctx.apply(out.set_variables);
                    state.ctx.record_output(node, out.output);
                    self.log(&state.ctx, LogLevel::Info, "node completed".to_string(), Some(node_id))
                        .await;
                    return NodeEnd::Completed;
                }
                Err(e) => e,
            };

            let class = ErrorClass::from_retryable(error.is_retryable());
            match decide(mode, RetryBudget::new(max_retries, used), class, &policy) {
                FailureDisposition::Retry { retry, delay } => {
                    self.log(
                        &state.ctx,
                        LogLevel::Warn,
                        format!(
                            "node failed (attempt {attempt}): {error}; retrying in {}ms",
                            delay.as_millis()
                        ),
                        Some(node_id),
                    )
                    .await;
                    used = retry;
                    state.retry_count += 1;

                    tokio::select! {
                        _ = token.cancelled() => return NodeEnd::Cancelled,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                FailureDisposition::Continue => {
                    self.log(
                        &state.ctx,
                        LogLevel::Warn,
                        format!("node failed, continuing: {error}"),
                        Some(node_id),
                    )
                    .await;
                    state
                        .ctx
                        .record_output(node, json!({ "error": error.to_string() }));
                    return NodeEnd::Absorbed;
                }
                FailureDisposition::Stop => {
                    self.log(
                        &state.ctx,
                        LogLevel::Error,
                        format!("node failed: {error}"),
                        Some(node_id),
                    )
                    .await;
                    return NodeEnd::Failed(NodeExecutionError {
                        node_id: node.id.clone(),
                        source: error,
                    });
                }
            }
        }
    }

    /// Append to the execution log and mirror the line to tracing.
    ///
    /// A rejected append (the run was finalized underneath us) is not fatal
    /// for the walk.
    async fn log(&self, ctx: &RunContext, level: LogLevel, message: String, node_id: Option<&str>) {
        let execution_id = ctx.execution_id();
        match level {
            LogLevel::Error => tracing::error!(execution_id = %execution_id, node_id = node_id.unwrap_or(""), "{message}"),
            LogLevel::Warn => tracing::warn!(execution_id = %execution_id, node_id = node_id.unwrap_or(""), "{message}"),
            LogLevel::Info => tracing::info!(execution_id = %execution_id, node_id = node_id.unwrap_or(""), "{message}"),
            LogLevel::Debug => tracing::debug!(execution_id = %execution_id, node_id = node_id.unwrap_or(""), "{message}"),
        }

        let entry = LogEntry::new(level, message, node_id);
        if let Err(e) = self.manager.append_log(&execution_id, &entry).await {
            tracing::debug!(execution_id = %execution_id, error = %e, "execution log append rejected");
        }
    }
}

/// Successors of `node_id` whose guard passes, in edge order, plus warnings
/// for guards that failed to evaluate.
fn select_successors(graph: &CompiledGraph, node_id: &str, ctx: &RunContext) -> (Vec<String>, Vec<String>) {
    let successors = graph.successors(node_id);
    if successors.is_empty() {
        return (Vec::new(), Vec::new());
    }

    let evaluator = GuardEvaluator::new();
    let mut next = Vec::with_capacity(successors.len());
    let mut warnings = Vec::new();

    for successor in successors {
        let Some(condition) = successor.condition.as_deref() else {
            next.push(successor.target.clone());
            continue;
        };
        match evaluator.evaluate_guard(condition, ctx) {
            Ok(true) => next.push(successor.target.clone()),
            Ok(false) => {
                tracing::debug!(
                    edge_id = successor.edge_id.as_str(),
                    condition,
                    "edge guard false, skipping"
                );
            }
            Err(e) => warnings.push(format!(
                "edge '{}' guard failed, skipping: {e}",
                successor.edge_id
            )),
        }
    }

    (next, warnings)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
