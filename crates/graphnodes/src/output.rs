use crate::common::simulate;
use async_trait::async_trait;
use graphcore::config::SimulationConfig;
use graphcore::{
    value_text, HandlerMetadata, NodeContext, NodeError, NodeHandler, NodeKind, NodeOutput,
    PortDefinition,
};
use std::time::Duration;

pub const OUTPUT_DELAY_MS: u64 = 100;

/// Terminal node. Its `answer` becomes the run's answer.
pub struct OutputNode {
    delay: Duration,
}

impl OutputNode {
    pub fn new(simulation: &SimulationConfig) -> Self {
        Self {
            delay: simulation.scale(OUTPUT_DELAY_MS),
        }
    }
}

#[async_trait]
impl NodeHandler for OutputNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Output
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        simulate(&ctx, self.delay).await?;

        // An explicit answer port wins over the joined inputs
        let answer = match ctx.inputs.get("answer") {
            Some(value) => value_text(value),
            None => ctx.input_text(),
        };
        if answer.trim().is_empty() {
            return Err(NodeError::MissingInput("answer".to_string()));
        }

        Ok(NodeOutput::new()
            .with_output("output", answer.clone())
            .with_output("answer", answer))
    }

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata {
            description: "Final answer of the run".to_string(),
            category: "output".to_string(),
            inputs: vec![PortDefinition::new("answer", "Answer to publish", true)],
            outputs: vec![PortDefinition::new("answer", "The final answer", true)],
        }
    }
}
