use crate::common::{config_f64, config_u64, expect_type, simulate};
use async_trait::async_trait;
use graphcore::config::SimulationConfig;
use graphcore::{
    HandlerMetadata, NodeContext, NodeError, NodeHandler, NodeKind, NodeOutput, PortDefinition,
};
use serde_json::{Map, Value};
use std::time::Duration;

pub const RETRIEVAL_DELAY_MS: u64 = 800;

/// Largest `topK` a graph may ask for
pub const MAX_TOP_K: u64 = 100;

const DEFAULT_TOP_K: u64 = 3;
const DEFAULT_THRESHOLD: f64 = 0.7;

/// Mock knowledge-base lookup returning `topK` canned passages.
pub struct RetrievalNode {
    delay: Duration,
}

impl RetrievalNode {
    pub fn new(simulation: &SimulationConfig) -> Self {
        Self {
            delay: simulation.scale(RETRIEVAL_DELAY_MS),
        }
    }
}

#[async_trait]
impl NodeHandler for RetrievalNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Retrieval
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        simulate(&ctx, self.delay).await?;

        let enabled = ctx
            .node
            .config
            .get("enabled")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        if !enabled {
            return Ok(NodeOutput::new()
                .with_output("output", "")
                .with_output("context", "")
                .with_output("chunks", 0)
                .with_meta("skipped", "disabled"));
        }

        let top_k = requested_top_k(&ctx.node.config)
            .unwrap_or(DEFAULT_TOP_K)
            .min(MAX_TOP_K);
        let threshold = config_f64(&ctx.node.config, "threshold").unwrap_or(DEFAULT_THRESHOLD);
        let query = ctx.input_text();

        let passages: Vec<String> = (1..=top_k)
            .map(|i| format!("[{}] Relevant passage {} for: {}", i, i, query))
            .collect();
        let context = passages.join("\n");

        Ok(NodeOutput::new()
            .with_output("output", context.clone())
            .with_output("context", context)
            .with_output("chunks", top_k)
            .with_meta("threshold", threshold))
    }

    fn validate_config(&self, config: &Map<String, Value>) -> Result<(), NodeError> {
        expect_type(config, "topK", "integer", Value::is_u64)?;
        expect_type(config, "top_k", "integer", Value::is_u64)?;
        expect_type(config, "enabled", "boolean", Value::is_boolean)?;
        if let Some(top_k) = requested_top_k(config) {
            if top_k > MAX_TOP_K {
                return Err(NodeError::Configuration(format!(
                    "topK must be at most {}, got {}",
                    MAX_TOP_K, top_k
                )));
            }
        }
        if let Some(threshold) = config_f64(config, "threshold") {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(NodeError::Configuration(format!(
                    "threshold must be between 0 and 1, got {}",
                    threshold
                )));
            }
        }
        Ok(())
    }

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata {
            description: "Retrieve context passages for the query".to_string(),
            category: "retrieval".to_string(),
            inputs: vec![PortDefinition::new("query", "Text to search for", false)],
            outputs: vec![
                PortDefinition::new("output", "Retrieved context", true),
                PortDefinition::new("chunks", "Number of passages", false),
            ],
        }
    }
}

fn requested_top_k(config: &Map<String, Value>) -> Option<u64> {
    config_u64(config, "topK").or_else(|| config_u64(config, "top_k"))
}
