use chrono::Utc;
use graphcore::{
    EdgeExecutionState, EdgeStatus, EventBus, ExecutionEvent, ExecutionId, ExecutionLog,
    ExecutionStatus, ExecutionStatusReport, LogLevel, LogPage, LogQuery, NodeExecutionState,
    NodeId, NodeStatus, Progress, WorkflowExecution, WorkflowGraph,
};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

pub const DEFAULT_HISTORY_LIMIT: usize = 20;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("No active execution")]
    NoActiveExecution,

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Unknown edge: {0}")]
    UnknownEdge(String),

    #[error("Execution {0} is already finished")]
    Finalized(ExecutionId),
}

#[derive(Debug, Default)]
struct StoreState {
    current: Option<WorkflowExecution>,
    /// Most recent first
    history: VecDeque<WorkflowExecution>,
}

/// Optional payload of a node status change.
#[derive(Debug, Clone, Default)]
pub struct NodeDetail {
    pub output: Option<Value>,
    pub error: Option<String>,
}

impl NodeDetail {
    pub fn output(value: Value) -> Self {
        Self {
            output: Some(value),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            output: None,
            error: Some(message.into()),
        }
    }
}

/// Single writer over execution state. Only the orchestrator holds one;
/// everything else observes through a [`StoreReader`].
pub struct ExecutionStore {
    shared: Arc<RwLock<StoreState>>,
    bus: EventBus,
    history_limit: usize,
}

impl ExecutionStore {
    pub fn new(bus: EventBus, history_limit: usize) -> Self {
        Self {
            shared: Arc::new(RwLock::new(StoreState::default())),
            bus,
            history_limit,
        }
    }

    pub fn reader(&self) -> StoreReader {
        StoreReader {
            shared: self.shared.clone(),
            bus: self.bus.clone(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.shared.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a new current execution: run and nodes pending, edges idle, one start log.
    pub fn start_execution(
        &mut self,
        execution_id: Option<ExecutionId>,
        graph: &WorkflowGraph,
    ) -> ExecutionId {
        let id = execution_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now();

        let nodes: HashMap<NodeId, NodeExecutionState> = graph
            .nodes
            .iter()
            .map(|n| (n.id.clone(), NodeExecutionState::new(n.id.clone(), NodeStatus::Pending)))
            .collect();
        let edges = graph
            .edges
            .iter()
            .map(|e| {
                (
                    e.id.clone(),
                    EdgeExecutionState {
                        edge_id: e.id.clone(),
                        status: EdgeStatus::Idle,
                    },
                )
            })
            .collect();
        let start_log = ExecutionLog::info("Workflow execution started")
            .with_metadata("workflowId", graph.id.clone())
            .with_metadata("nodeCount", graph.nodes.len());
        let progress = Progress::compute(&nodes);

        let execution = WorkflowExecution {
            id: id.clone(),
            workflow_id: graph.id.clone(),
            status: ExecutionStatus::Pending,
            start_time: now,
            end_time: None,
            duration_ms: None,
            nodes,
            edges,
            logs: vec![start_log.clone()],
            result: None,
            error: None,
            progress,
        };

        {
            let mut state = self.write();
            if let Some(previous) = state.current.take() {
                if !previous.status.is_terminal() {
                    tracing::warn!(execution_id = %previous.id, "replacing unfinished execution");
                }
            }
            state.current = Some(execution);
        }

        tracing::info!(execution_id = %id, workflow_id = %graph.id, "Execution started");
        self.bus.emit(ExecutionEvent::ExecutionStarted {
            execution_id: id.clone(),
            workflow_id: graph.id.clone(),
            total_nodes: graph.nodes.len(),
            timestamp: now,
        });
        self.emit_log(&id, start_log);
        id
    }

    /// Apply a node status change and recompute progress.
    pub fn update_node_status(
        &mut self,
        node_id: &str,
        status: NodeStatus,
        detail: NodeDetail,
    ) -> Result<Progress, StoreError> {
        let now = Utc::now();
        let (execution_id, progress) = {
            let mut state = self.write();
            let execution = active_mut(&mut state)?;
            let node = execution
                .nodes
                .get_mut(node_id)
                .ok_or_else(|| StoreError::UnknownNode(node_id.to_string()))?;

            node.status = status;
            match status {
                NodeStatus::Running => {
                    if execution.status == ExecutionStatus::Pending {
                        execution.status = ExecutionStatus::Running;
                    }
                    node.start_time = Some(now);
                    node.end_time = None;
                    node.duration_ms = None;
                }
                s if s.is_finished() => {
                    node.end_time = Some(now);
                    node.duration_ms = node.start_time.map(|start| elapsed_ms(start, now));
                }
                _ => {}
            }
            if detail.output.is_some() {
                node.output = detail.output;
            }
            if detail.error.is_some() {
                node.error = detail.error;
            }

            execution.progress = Progress::compute(&execution.nodes);
            (execution.id.clone(), execution.progress.clone())
        };

        self.bus.emit(ExecutionEvent::NodeStatusChanged {
            execution_id,
            node_id: node_id.to_string(),
            status,
            progress: progress.clone(),
            timestamp: now,
        });
        Ok(progress)
    }

    pub fn update_edge_status(&mut self, edge_id: &str, status: EdgeStatus) -> Result<(), StoreError> {
        let execution_id = {
            let mut state = self.write();
            let execution = active_mut(&mut state)?;
            let edge = execution
                .edges
                .get_mut(edge_id)
                .ok_or_else(|| StoreError::UnknownEdge(edge_id.to_string()))?;
            edge.status = status;
            execution.id.clone()
        };

        self.bus.emit(ExecutionEvent::EdgeStatusChanged {
            execution_id,
            edge_id: edge_id.to_string(),
            status,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Append a log to the current execution. Logs are kept in insertion order.
    pub fn add_log(&mut self, log: ExecutionLog) -> Result<(), StoreError> {
        let execution_id = {
            let mut state = self.write();
            let execution = active_mut(&mut state)?;
            execution.logs.push(log.clone());
            execution.id.clone()
        };
        self.emit_log(&execution_id, log);
        Ok(())
    }

    /// Finalize the current execution and push it into the bounded history.
    pub fn complete_execution(
        &mut self,
        status: ExecutionStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<WorkflowExecution, StoreError> {
        let now = Utc::now();
        let level = match status {
            ExecutionStatus::Failed => LogLevel::Error,
            ExecutionStatus::Cancelled => LogLevel::Warning,
            _ => LogLevel::Info,
        };

        let (finished, final_log) = {
            let mut state = self.write();
            let execution = active_mut(&mut state)?;

            let duration_ms = elapsed_ms(execution.start_time, now);
            let mut final_log =
                ExecutionLog::new(level, format!("Workflow execution {}", status.as_str()))
                    .with_metadata("durationMs", duration_ms);
            if let Some(message) = &error {
                final_log = final_log.with_metadata("error", message.clone());
            }

            execution.status = status;
            execution.end_time = Some(now);
            execution.duration_ms = Some(duration_ms);
            execution.result = result;
            execution.error = error;
            execution.progress.current_node = None;
            execution.logs.push(final_log.clone());

            let finished = execution.clone();
            state.history.push_front(finished.clone());
            state.history.truncate(self.history_limit);
            (finished, final_log)
        };

        tracing::info!(
            execution_id = %finished.id,
            status = status.as_str(),
            duration_ms = finished.duration_ms.unwrap_or_default(),
            "Execution finished"
        );
        self.emit_log(&finished.id, final_log);
        self.bus.emit(ExecutionEvent::ExecutionFinished {
            execution_id: finished.id.clone(),
            status,
            duration_ms: finished.duration_ms.unwrap_or_default(),
            timestamp: now,
        });
        Ok(finished)
    }

    /// Mark the current execution cancelled. Node states are left as they are.
    pub fn cancel_execution(&mut self) -> Result<WorkflowExecution, StoreError> {
        self.complete_execution(
            ExecutionStatus::Cancelled,
            None,
            Some("Execution cancelled".to_string()),
        )
    }

    /// Drop the current execution. History is kept.
    pub fn reset(&mut self) {
        let mut state = self.write();
        state.current = None;
    }

    fn emit_log(&self, execution_id: &str, log: ExecutionLog) {
        tracing::debug!(
            execution_id = %execution_id,
            level = %log.level,
            node_id = ?log.node_id,
            "{}",
            log.message
        );
        self.bus.emit(ExecutionEvent::LogAppended {
            execution_id: execution_id.to_string(),
            log,
        });
    }
}

impl Default for ExecutionStore {
    fn default() -> Self {
        Self::new(EventBus::default(), DEFAULT_HISTORY_LIMIT)
    }
}

fn active_mut(state: &mut StoreState) -> Result<&mut WorkflowExecution, StoreError> {
    let execution = state.current.as_mut().ok_or(StoreError::NoActiveExecution)?;
    if execution.status.is_terminal() {
        return Err(StoreError::Finalized(execution.id.clone()));
    }
    Ok(execution)
}

fn elapsed_ms(start: chrono::DateTime<Utc>, end: chrono::DateTime<Utc>) -> u64 {
    (end - start).num_milliseconds().max(0) as u64
}

/// Read-only, cloneable view of the store.
#[derive(Clone)]
pub struct StoreReader {
    shared: Arc<RwLock<StoreState>>,
    bus: EventBus,
}

impl StoreReader {
    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.shared.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.bus.subscribe()
    }

    pub fn snapshot(&self) -> Option<WorkflowExecution> {
        self.read().current.clone()
    }

    pub fn execution_id(&self) -> Option<ExecutionId> {
        self.read().current.as_ref().map(|e| e.id.clone())
    }

    pub fn status(&self) -> Option<ExecutionStatus> {
        self.read().current.as_ref().map(|e| e.status)
    }

    pub fn node_status(&self, node_id: &str) -> Option<NodeStatus> {
        self.read()
            .current
            .as_ref()
            .and_then(|e| e.nodes.get(node_id))
            .map(|n| n.status)
    }

    pub fn edge_status(&self, edge_id: &str) -> Option<EdgeStatus> {
        self.read()
            .current
            .as_ref()
            .and_then(|e| e.edges.get(edge_id))
            .map(|s| s.status)
    }

    /// The node currently running, if any.
    pub fn current_node(&self) -> Option<NodeId> {
        self.read()
            .current
            .as_ref()
            .and_then(|e| e.progress.current_node.clone())
    }

    pub fn progress(&self) -> Option<Progress> {
        self.read().current.as_ref().map(|e| e.progress.clone())
    }

    pub fn status_report(&self) -> Option<ExecutionStatusReport> {
        self.read().current.as_ref().map(WorkflowExecution::status_report)
    }

    pub fn logs(&self) -> Vec<ExecutionLog> {
        self.read()
            .current
            .as_ref()
            .map(|e| e.logs.clone())
            .unwrap_or_default()
    }

    pub fn logs_page(&self, query: &LogQuery) -> Option<LogPage> {
        self.read()
            .current
            .as_ref()
            .map(|e| LogPage::paginate(&e.logs, query))
    }

    /// Finished executions, most recent first.
    pub fn history(&self) -> Vec<WorkflowExecution> {
        self.read().history.iter().cloned().collect()
    }

    /// Look up an execution by id, current first, then history.
    pub fn find(&self, execution_id: &str) -> Option<WorkflowExecution> {
        let state = self.read();
        state
            .current
            .iter()
            .chain(state.history.iter())
            .find(|e| e.id == execution_id)
            .cloned()
    }
}
