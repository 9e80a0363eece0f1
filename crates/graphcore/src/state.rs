use crate::log::ExecutionLog;
use crate::{EdgeId, NodeId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

pub type ExecutionId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Idle,
    Pending,
    Running,
    Success,
    Error,
    Skipped,
}

impl NodeStatus {
    /// Success, error and skipped all count towards progress.
    pub fn is_finished(&self) -> bool {
        matches!(self, NodeStatus::Success | NodeStatus::Error | NodeStatus::Skipped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeStatus {
    Idle,
    Active,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExecutionState {
    pub node_id: NodeId,
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeExecutionState {
    pub fn new(node_id: impl Into<NodeId>, status: NodeStatus) -> Self {
        Self {
            node_id: node_id.into(),
            status,
            start_time: None,
            end_time: None,
            duration_ms: None,
            output: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeExecutionState {
    pub edge_id: EdgeId,
    pub status: EdgeStatus,
}

/// Aggregate progress, always derived from the node-state map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    pub percentage: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_node: Option<NodeId>,
}

impl Progress {
    pub fn compute(nodes: &HashMap<NodeId, NodeExecutionState>) -> Self {
        let total = nodes.len();
        let completed = nodes.values().filter(|s| s.status.is_finished()).count();
        let current_node = nodes
            .values()
            .find(|s| s.status == NodeStatus::Running)
            .map(|s| s.node_id.clone());
        Self {
            completed,
            total,
            percentage: percentage(completed, total),
            current_node,
        }
    }
}

/// `round(100 * completed / total)`, zero for an empty graph.
pub fn percentage(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (completed.min(total) as f64 / total as f64 * 100.0).round();
    pct as u8
}

/// One run of a graph. Owned by the execution store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    pub id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub nodes: HashMap<NodeId, NodeExecutionState>,
    pub edges: HashMap<EdgeId, EdgeExecutionState>,
    pub logs: Vec<ExecutionLog>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub progress: Progress,
}

impl WorkflowExecution {
    pub fn node(&self, node_id: &str) -> Option<&NodeExecutionState> {
        self.nodes.get(node_id)
    }

    pub fn running_nodes(&self) -> impl Iterator<Item = &NodeExecutionState> {
        self.nodes
            .values()
            .filter(|s| s.status == NodeStatus::Running)
    }

    pub fn status_report(&self) -> ExecutionStatusReport {
        ExecutionStatusReport {
            execution_id: self.id.clone(),
            workflow_id: self.workflow_id.clone(),
            status: self.status,
            progress: ProgressReport {
                completed_nodes: self.progress.completed,
                total_nodes: self.progress.total,
                percentage: self.progress.percentage,
                current_node: self.progress.current_node.clone(),
            },
            started_at: self.start_time,
            ended_at: self.end_time,
            error: self.error.clone(),
        }
    }
}

/// Shape returned by the execution status fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStatusReport {
    pub execution_id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub status: ExecutionStatus,
    pub progress: ProgressReport,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    pub completed_nodes: usize,
    pub total_nodes: usize,
    pub percentage: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_node: Option<NodeId>,
}
