use crate::common::simulate;
use async_trait::async_trait;
use graphcore::config::SimulationConfig;
use graphcore::{HandlerMetadata, NodeContext, NodeError, NodeHandler, NodeKind, NodeOutput, PortDefinition};
use std::time::Duration;

pub const INPUT_DELAY_MS: u64 = 100;

/// Emits the run query. A query configured on the node wins over the run's.
pub struct InputNode {
    delay: Duration,
}

impl InputNode {
    pub fn new(simulation: &SimulationConfig) -> Self {
        Self {
            delay: simulation.scale(INPUT_DELAY_MS),
        }
    }
}

#[async_trait]
impl NodeHandler for InputNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Input
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        simulate(&ctx, self.delay).await?;

        let query = ["query", "userQuery", "value"]
            .iter()
            .filter_map(|key| ctx.node.config_str(key))
            .map(str::trim)
            .find(|q| !q.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| ctx.query.clone());

        Ok(NodeOutput::new()
            .with_output("output", query.clone())
            .with_output("query", query))
    }

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata {
            description: "User query entry point".to_string(),
            category: "input".to_string(),
            inputs: vec![],
            outputs: vec![PortDefinition::new("output", "The query text", true)],
        }
    }
}
