use crate::common::simulate;
use async_trait::async_trait;
use graphcore::config::SimulationConfig;
use graphcore::{
    HandlerMetadata, NodeContext, NodeError, NodeHandler, NodeKind, NodeOutput, PortDefinition,
};
use serde_json::{Map, Value};
use std::time::Duration;

pub const TRANSFORM_DELAY_MS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Passthrough,
    Uppercase,
    Lowercase,
    Trim,
    Template,
}

impl Operation {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "passthrough" => Some(Operation::Passthrough),
            "uppercase" => Some(Operation::Uppercase),
            "lowercase" => Some(Operation::Lowercase),
            "trim" => Some(Operation::Trim),
            "template" => Some(Operation::Template),
            _ => None,
        }
    }

    fn from_config(config: &Map<String, Value>) -> Result<Self, NodeError> {
        match config.get("operation").and_then(Value::as_str) {
            None => Ok(Operation::Passthrough),
            Some(name) => Self::parse(name)
                .ok_or_else(|| NodeError::Configuration(format!("Unknown operation: {}", name))),
        }
    }
}

/// Text transform over the gathered input.
///
/// Templates substitute `{{input}}` and `{{query}}`.
pub struct TransformNode {
    delay: Duration,
}

impl TransformNode {
    pub fn new(simulation: &SimulationConfig) -> Self {
        Self {
            delay: simulation.scale(TRANSFORM_DELAY_MS),
        }
    }
}

#[async_trait]
impl NodeHandler for TransformNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Transform
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        simulate(&ctx, self.delay).await?;

        let input = ctx.input_text();
        let output = match Operation::from_config(&ctx.node.config)? {
            Operation::Passthrough => input,
            Operation::Uppercase => input.to_uppercase(),
            Operation::Lowercase => input.to_lowercase(),
            Operation::Trim => input.trim().to_string(),
            Operation::Template => {
                let template = ctx
                    .require_config("template")?
                    .as_str()
                    .ok_or_else(|| NodeError::InvalidInputType {
                        field: "template".to_string(),
                        expected: "string".to_string(),
                        actual: "other".to_string(),
                    })?;
                template
                    .replace("{{input}}", &input)
                    .replace("{{query}}", &ctx.query)
            }
        };

        Ok(NodeOutput::new().with_output("output", output))
    }

    fn validate_config(&self, config: &Map<String, Value>) -> Result<(), NodeError> {
        let operation = Operation::from_config(config)?;
        if operation == Operation::Template && !config.contains_key("template") {
            return Err(NodeError::Configuration(
                "template operation needs a template".to_string(),
            ));
        }
        Ok(())
    }

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata {
            description: "Reshape text: passthrough, uppercase, lowercase, trim or template"
                .to_string(),
            category: "transform".to_string(),
            inputs: vec![PortDefinition::new("input", "Text to transform", false)],
            outputs: vec![PortDefinition::new("output", "Transformed text", true)],
        }
    }
}
