use crate::analyzer::{ExecutionPlan, GraphAnalyzer};
use crate::executor::{NodeExecutor, RunContext, RunSession};
use crate::store::{ExecutionStore, NodeDetail, StoreError};
use crate::telemetry;
use graphcore::{
    value_text, EdgeStatus, ExecutionId, ExecutionLog, ExecutionStatus, GraphEdge, NodeContext,
    NodeError, NodeId, NodeKind, NodeOutput, NodeStatus, RunError, RunRequest, ValidationError,
    WorkflowGraph,
};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

const PREVIEW_CHARS: usize = 200;

/// A request that passed validation, ready to run.
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub plan: ExecutionPlan,
    pub query: String,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Use this id instead of generating one
    pub execution_id: Option<ExecutionId>,

    /// Caller-owned token; cancelling it cancels the run
    pub cancellation: Option<CancellationToken>,
}

/// Result of one run. Failures are values, never panics.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Success {
        execution_id: ExecutionId,
        answer: String,
        raw: Value,
    },
    Failure {
        /// `None` when the request never got past validation
        execution_id: Option<ExecutionId>,
        error: RunError,
    },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success { .. })
    }

    pub fn execution_id(&self) -> Option<&str> {
        match self {
            RunOutcome::Success { execution_id, .. } => Some(execution_id),
            RunOutcome::Failure { execution_id, .. } => execution_id.as_deref(),
        }
    }

    pub fn error(&self) -> Option<&RunError> {
        match self {
            RunOutcome::Failure { error, .. } => Some(error),
            RunOutcome::Success { .. } => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            RunOutcome::Success {
                execution_id,
                answer,
                raw,
            } => json!({ "executionId": execution_id, "answer": answer, "raw": raw }),
            RunOutcome::Failure {
                execution_id,
                error,
            } => json!({ "executionId": execution_id, "error": error.to_string() }),
        }
    }
}

/// Drives one graph run at a time through validation, node execution and finalization.
pub struct WorkflowOrchestrator {
    executor: Arc<dyn NodeExecutor>,
    active: Mutex<Option<CancellationToken>>,
}

impl WorkflowOrchestrator {
    pub fn new(executor: Arc<dyn NodeExecutor>) -> Self {
        Self {
            executor,
            active: Mutex::new(None),
        }
    }

    pub fn executor(&self) -> &Arc<dyn NodeExecutor> {
        &self.executor
    }

    /// Structural checks, per-node config checks and query resolution.
    /// Touches no state.
    pub fn validate(&self, request: &RunRequest) -> Result<PreparedRun, ValidationError> {
        let plan = GraphAnalyzer::validate(&request.graph)?;

        for node in &request.graph.nodes {
            self.executor
                .validate_node(node)
                .map_err(|e| ValidationError::InvalidConfig {
                    node_id: node.id.clone(),
                    message: e.to_string(),
                })?;
        }

        let query = request.resolve_query().ok_or(ValidationError::MissingQuery)?;
        Ok(PreparedRun { plan, query })
    }

    pub async fn run(&self, store: &mut ExecutionStore, request: RunRequest) -> RunOutcome {
        self.run_with_options(store, request, RunOptions::default())
            .await
    }

    pub async fn run_with_options(
        &self,
        store: &mut ExecutionStore,
        request: RunRequest,
        options: RunOptions,
    ) -> RunOutcome {
        let prepared = match self.validate(&request) {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::warn!(workflow_id = %request.graph.id, "Rejected graph: {}", e);
                return RunOutcome::Failure {
                    execution_id: None,
                    error: e.into(),
                };
            }
        };

        let token = options.cancellation.unwrap_or_default();
        self.set_active(Some(token.clone()));

        let execution_id = store.start_execution(options.execution_id, &request.graph);
        tracing::info!(
            execution_id = %execution_id,
            executor = self.executor.name(),
            nodes = prepared.plan.len(),
            "Starting workflow run"
        );

        telemetry::run_started();
        let started = Instant::now();
        let outcome = self
            .drive(store, &request.graph, &prepared, &execution_id, &token)
            .await;
        telemetry::run_finished(&request.graph.id, &outcome, started.elapsed());

        self.set_active(None);
        outcome
    }

    /// Cancel the active run, if any. Returns whether there was one.
    pub fn cancel(&self) -> bool {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        match active.as_ref() {
            Some(token) => {
                tracing::info!("Cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn set_active(&self, token: Option<CancellationToken>) {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = token;
    }

    async fn drive(
        &self,
        store: &mut ExecutionStore,
        graph: &WorkflowGraph,
        prepared: &PreparedRun,
        execution_id: &str,
        token: &CancellationToken,
    ) -> RunOutcome {
        let run = RunContext {
            execution_id: execution_id.to_string(),
            graph: graph.clone(),
            query: prepared.query.clone(),
            cancellation: token.clone(),
        };

        let session: Box<dyn RunSession> = tokio::select! {
            biased;
            _ = token.cancelled() => return cancelled(store, execution_id),
            started = self.executor.start_run(&run) => match started {
                Ok(session) => session,
                Err(e) => return failed(store, execution_id, e),
            },
        };

        let plan = &prepared.plan;
        let mut outputs: HashMap<NodeId, NodeOutput> = HashMap::new();
        let mut skipped: HashSet<NodeId> = HashSet::new();

        for node_id in &plan.order {
            if token.is_cancelled() {
                return cancelled(store, execution_id);
            }
            let Some(node) = graph.find_node(node_id) else {
                continue;
            };
            let incoming = plan.incoming(graph, node_id);

            if !incoming.is_empty()
                && incoming
                    .iter()
                    .all(|edge| is_dead(edge, graph, &skipped, &outputs))
            {
                tracing::debug!(execution_id = %execution_id, node_id = %node_id, "Skipping node");
                note(store.update_node_status(node_id, NodeStatus::Skipped, NodeDetail::default()));
                note(store.add_log(
                    ExecutionLog::info(format!("Skipping node: {}", node.display_name()))
                        .for_node(node_id.clone()),
                ));
                telemetry::node_finished(&graph.id, node.kind, NodeStatus::Skipped, None);
                skipped.insert(node_id.clone());
                continue;
            }

            set_edges(store, &incoming, EdgeStatus::Active);
            note(store.update_node_status(node_id, NodeStatus::Running, NodeDetail::default()));
            note(store.add_log(
                ExecutionLog::info(format!("Starting node: {}", node.display_name()))
                    .for_node(node_id.clone())
                    .with_metadata("kind", node.kind.as_str()),
            ));
            tracing::info!(
                execution_id = %execution_id,
                node_id = %node_id,
                kind = %node.kind,
                "Executing node"
            );

            let ctx = NodeContext {
                execution_id: execution_id.to_string(),
                node: node.clone(),
                inputs: gather_inputs(&incoming, &outputs),
                query: prepared.query.clone(),
                cancellation: token.clone(),
            };

            let started = Instant::now();
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => Err(NodeError::Cancelled),
                result = session.execute(ctx) => result,
            };
            let elapsed = started.elapsed();
            let elapsed_ms = elapsed.as_millis() as u64;

            match result {
                Ok(mut output) => {
                    telemetry::node_finished(&graph.id, node.kind, NodeStatus::Success, Some(elapsed));
                    output.metadata.execution_time_ms = elapsed_ms;
                    set_edges(store, &incoming, EdgeStatus::Completed);
                    note(store.update_node_status(
                        node_id,
                        NodeStatus::Success,
                        NodeDetail::output(output.clone().into_value()),
                    ));
                    note(store.add_log(
                        ExecutionLog::info("Node completed successfully")
                            .for_node(node_id.clone())
                            .with_metadata("durationMs", elapsed_ms)
                            .with_metadata("output", preview(&output)),
                    ));
                    outputs.insert(node_id.clone(), output);
                }
                Err(_) if token.is_cancelled() => return cancelled(store, execution_id),
                Err(e) => {
                    telemetry::node_finished(&graph.id, node.kind, NodeStatus::Error, Some(elapsed));
                    let message = e.to_string();
                    set_edges(store, &incoming, EdgeStatus::Completed);
                    note(store.update_node_status(
                        node_id,
                        NodeStatus::Error,
                        NodeDetail::error(message.clone()),
                    ));
                    note(store.add_log(
                        ExecutionLog::error(format!("Node execution failed: {}", message))
                            .for_node(node_id.clone())
                            .with_metadata("durationMs", elapsed_ms),
                    ));

                    if node.kind.is_critical() {
                        tracing::error!(
                            execution_id = %execution_id,
                            node_id = %node_id,
                            "Critical node failed: {}",
                            message
                        );
                        return failed(
                            store,
                            execution_id,
                            RunError::Node {
                                node_id: node_id.clone(),
                                source: e,
                            },
                        );
                    }
                    tracing::warn!(
                        execution_id = %execution_id,
                        node_id = %node_id,
                        "Node failed, continuing: {}",
                        message
                    );
                }
            }
        }

        let raw = tokio::select! {
            biased;
            _ = token.cancelled() => return cancelled(store, execution_id),
            finished = session.finish() => match finished {
                Ok(raw) => raw,
                Err(e) => return failed(store, execution_id, e),
            },
        };

        let raw = raw.unwrap_or_else(|| {
            Value::Object(
                outputs
                    .iter()
                    .map(|(id, output)| (id.clone(), output.clone().into_value()))
                    .collect::<Map<String, Value>>(),
            )
        });
        let answer = final_answer(graph, plan, &outputs)
            .or_else(|| answer_from_raw(&raw))
            .unwrap_or_default();

        let result = json!({ "answer": answer, "raw": raw });
        note(store.complete_execution(ExecutionStatus::Completed, Some(result), None));

        RunOutcome::Success {
            execution_id: execution_id.to_string(),
            answer,
            raw,
        }
    }
}

/// An edge carries nothing when its source was skipped, or when its source is a
/// conditional that did not emit on the edge's port.
fn is_dead(
    edge: &GraphEdge,
    graph: &WorkflowGraph,
    skipped: &HashSet<NodeId>,
    outputs: &HashMap<NodeId, NodeOutput>,
) -> bool {
    if skipped.contains(&edge.source) {
        return true;
    }
    let is_conditional = graph
        .find_node(&edge.source)
        .map_or(false, |n| n.kind == NodeKind::Conditional);
    match outputs.get(&edge.source) {
        Some(output) if is_conditional => output.get(edge.source_key()).is_none(),
        _ => false,
    }
}

fn gather_inputs(incoming: &[&GraphEdge], outputs: &HashMap<NodeId, NodeOutput>) -> Map<String, Value> {
    let mut inputs = Map::new();
    for edge in incoming {
        if let Some(value) = outputs.get(&edge.source).and_then(|o| o.get(edge.source_key())) {
            inputs.insert(edge.input_key().to_string(), value.clone());
        }
    }
    inputs
}

/// Terminal output node's answer, else the last successful node's.
fn final_answer(
    graph: &WorkflowGraph,
    plan: &ExecutionPlan,
    outputs: &HashMap<NodeId, NodeOutput>,
) -> Option<String> {
    let terminal_output = plan.order.iter().rev().find(|id| {
        outputs.contains_key(*id)
            && graph.find_node(id).map_or(false, |n| n.kind == NodeKind::Output)
            && plan.outgoing(graph, id).is_empty()
    });
    let source = terminal_output.or_else(|| plan.order.iter().rev().find(|id| outputs.contains_key(*id)))?;
    let output = outputs.get(source)?;
    output
        .get("answer")
        .or_else(|| output.get(graphcore::DEFAULT_PORT))
        .map(value_text)
}

fn answer_from_raw(raw: &Value) -> Option<String> {
    raw.get("answer")
        .or_else(|| raw.get("result"))
        .map(value_text)
}

fn preview(output: &NodeOutput) -> String {
    let text = output
        .get("answer")
        .or_else(|| output.get(graphcore::DEFAULT_PORT))
        .map(value_text)
        .unwrap_or_else(|| Value::Object(output.outputs.clone()).to_string());
    if text.chars().count() > PREVIEW_CHARS {
        let cut: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", cut)
    } else {
        text
    }
}

fn set_edges(store: &mut ExecutionStore, edges: &[&GraphEdge], status: EdgeStatus) {
    for edge in edges {
        note(store.update_edge_status(&edge.id, status));
    }
}

fn cancelled(store: &mut ExecutionStore, execution_id: &str) -> RunOutcome {
    tracing::info!(execution_id = %execution_id, "Workflow run cancelled");
    note(store.cancel_execution());
    RunOutcome::Failure {
        execution_id: Some(execution_id.to_string()),
        error: RunError::Cancelled,
    }
}

fn failed(store: &mut ExecutionStore, execution_id: &str, error: RunError) -> RunOutcome {
    tracing::error!(execution_id = %execution_id, "Workflow run failed: {}", error);
    note(store.complete_execution(ExecutionStatus::Failed, None, Some(error.to_string())));
    RunOutcome::Failure {
        execution_id: Some(execution_id.to_string()),
        error,
    }
}

/// The orchestrator initialized the store from the validated graph, so a
/// rejected update means a bug, not bad input.
fn note<T>(result: Result<T, StoreError>) {
    if let Err(e) = result {
        tracing::warn!("State store rejected update: {}", e);
    }
}
