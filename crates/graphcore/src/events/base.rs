use crate::log::ExecutionLog;
use crate::state::{EdgeStatus, ExecutionId, ExecutionStatus, NodeStatus, Progress};
use crate::{EdgeId, NodeId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// One store mutation, broadcast after it has been applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ExecutionEvent {
    #[serde(rename_all = "camelCase")]
    ExecutionStarted {
        execution_id: ExecutionId,
        workflow_id: WorkflowId,
        total_nodes: usize,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    NodeStatusChanged {
        execution_id: ExecutionId,
        node_id: NodeId,
        status: NodeStatus,
        progress: Progress,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    EdgeStatusChanged {
        execution_id: ExecutionId,
        edge_id: EdgeId,
        status: EdgeStatus,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    LogAppended {
        execution_id: ExecutionId,
        log: ExecutionLog,
    },
    #[serde(rename_all = "camelCase")]
    ExecutionFinished {
        execution_id: ExecutionId,
        status: ExecutionStatus,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    pub fn execution_id(&self) -> &str {
        match self {
            ExecutionEvent::ExecutionStarted { execution_id, .. }
            | ExecutionEvent::NodeStatusChanged { execution_id, .. }
            | ExecutionEvent::EdgeStatusChanged { execution_id, .. }
            | ExecutionEvent::LogAppended { execution_id, .. }
            | ExecutionEvent::ExecutionFinished { execution_id, .. } => execution_id,
        }
    }
}

/// Global event bus
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    /// Fire and forget; having no subscribers is not an error.
    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
