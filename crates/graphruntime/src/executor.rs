use crate::registry::NodeRegistry;
use async_trait::async_trait;
use graphcore::{
    ExecutionId, GraphNode, NodeContext, NodeError, NodeOutput, RunError, WorkflowGraph,
};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything an executor needs to know about the run it is about to serve.
#[derive(Clone)]
pub struct RunContext {
    pub execution_id: ExecutionId,
    pub graph: WorkflowGraph,
    pub query: String,
    pub cancellation: CancellationToken,
}

/// Performs the work of individual nodes. The orchestrator opens one
/// session per run and drives it node by node.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    fn name(&self) -> &str;

    /// Static check of one node before the run starts
    fn validate_node(&self, _node: &GraphNode) -> Result<(), NodeError> {
        Ok(())
    }

    async fn start_run(&self, run: &RunContext) -> Result<Box<dyn RunSession>, RunError>;
}

#[async_trait]
pub trait RunSession: Send + Sync {
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError>;

    /// Called once after the last node. Returns the raw backend result, if any.
    async fn finish(&self) -> Result<Option<Value>, RunError> {
        Ok(None)
    }
}

/// Executes every node through the handler registered for its kind.
#[derive(Clone)]
pub struct RegistryExecutor {
    registry: Arc<NodeRegistry>,
}

impl RegistryExecutor {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }
}

#[async_trait]
impl NodeExecutor for RegistryExecutor {
    fn name(&self) -> &str {
        "simulated"
    }

    fn validate_node(&self, node: &GraphNode) -> Result<(), NodeError> {
        let handler = self.registry.get(node.kind).ok_or_else(|| {
            NodeError::Configuration(format!("No handler registered for kind {}", node.kind))
        })?;
        handler.validate_config(&node.config)
    }

    async fn start_run(&self, run: &RunContext) -> Result<Box<dyn RunSession>, RunError> {
        tracing::debug!(execution_id = %run.execution_id, "Opening simulated session");
        Ok(Box::new(RegistrySession {
            registry: self.registry.clone(),
        }))
    }
}

struct RegistrySession {
    registry: Arc<NodeRegistry>,
}

#[async_trait]
impl RunSession for RegistrySession {
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let handler = self.registry.get(ctx.node.kind).ok_or_else(|| {
            NodeError::Configuration(format!("No handler registered for kind {}", ctx.node.kind))
        })?;
        handler.execute(ctx).await
    }
}
