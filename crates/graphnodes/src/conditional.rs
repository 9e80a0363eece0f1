use crate::common::simulate;
use async_trait::async_trait;
use graphcore::config::SimulationConfig;
use graphcore::{
    HandlerMetadata, NodeContext, NodeError, NodeHandler, NodeKind, NodeOutput, PortDefinition,
};
use serde_json::{Map, Value};
use std::time::Duration;

pub const CONDITIONAL_DELAY_MS: u64 = 200;

pub const TRUE_PORT: &str = "true";
pub const FALSE_PORT: &str = "false";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Contains,
    Equals,
}

impl Operator {
    fn from_config(config: &Map<String, Value>) -> Result<Self, NodeError> {
        match config.get("operator").and_then(Value::as_str) {
            None | Some("contains") => Ok(Operator::Contains),
            Some("equals") => Ok(Operator::Equals),
            Some(other) => Err(NodeError::Configuration(format!(
                "Unknown operator: {}",
                other
            ))),
        }
    }

    /// Case-insensitive comparison, whitespace-trimmed
    fn evaluate(&self, input: &str, value: &str) -> bool {
        let input = input.trim().to_lowercase();
        let value = value.trim().to_lowercase();
        match self {
            Operator::Contains => input.contains(&value),
            Operator::Equals => input == value,
        }
    }
}

/// Routes its input to the `true` or `false` port. Edges leaving the port
/// that did not fire are dead, and so is everything only they feed.
pub struct ConditionalNode {
    delay: Duration,
}

impl ConditionalNode {
    pub fn new(simulation: &SimulationConfig) -> Self {
        Self {
            delay: simulation.scale(CONDITIONAL_DELAY_MS),
        }
    }
}

#[async_trait]
impl NodeHandler for ConditionalNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Conditional
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        simulate(&ctx, self.delay).await?;

        let operator = Operator::from_config(&ctx.node.config)?;
        let value = ctx.node.config_str("value").unwrap_or_default();
        let input = ctx.input_text();
        let matched = operator.evaluate(&input, value);
        let port = if matched { TRUE_PORT } else { FALSE_PORT };

        tracing::debug!(node_id = %ctx.node_id(), port, "Condition evaluated");

        Ok(NodeOutput::new()
            .with_output("output", input.clone())
            .with_output("result", matched)
            .with_output(port, input))
    }

    fn validate_config(&self, config: &Map<String, Value>) -> Result<(), NodeError> {
        Operator::from_config(config).map(|_| ())
    }

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata {
            description: "Branch on whether the input contains or equals a value".to_string(),
            category: "control".to_string(),
            inputs: vec![PortDefinition::new("input", "Text to test", true)],
            outputs: vec![
                PortDefinition::new(TRUE_PORT, "Fires when the condition holds", false),
                PortDefinition::new(FALSE_PORT, "Fires otherwise", false),
            ],
        }
    }
}
