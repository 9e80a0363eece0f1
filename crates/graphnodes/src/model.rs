use crate::common::{config_f64, config_u64, expect_type, simulate};
use async_trait::async_trait;
use graphcore::config::SimulationConfig;
use graphcore::{
    value_text, HandlerMetadata, NodeContext, NodeError, NodeHandler, NodeKind, NodeOutput,
    PortDefinition,
};
use serde_json::{Map, Value};
use std::time::Duration;

pub const MODEL_CALL_DELAY_MS: u64 = 1500;

pub const DEFAULT_PROVIDER: &str = "google";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_MAX_TOKENS: u64 = 4096;

/// Model settings read from a model-call node's config
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub provider: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f64,
    pub max_tokens: u64,
    pub web_search: bool,
    pub system_prompt: Option<String>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            provider: DEFAULT_PROVIDER.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            web_search: false,
            system_prompt: None,
        }
    }
}

impl ModelSettings {
    pub fn from_config(config: &Map<String, Value>) -> Self {
        let text = |key: &str| {
            config
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let defaults = Self::default();
        Self {
            provider: text("provider").unwrap_or(defaults.provider),
            model: text("model").unwrap_or(defaults.model),
            api_key: text("apiKey"),
            temperature: config_f64(config, "temperature").unwrap_or(defaults.temperature),
            max_tokens: config_u64(config, "maxTokens").unwrap_or(defaults.max_tokens),
            web_search: config
                .get("webSearch")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            system_prompt: text("systemPrompt"),
        }
    }
}

/// Mock language-model call. Answers with the query and how much context it saw.
pub struct ModelCallNode {
    delay: Duration,
}

impl ModelCallNode {
    pub fn new(simulation: &SimulationConfig) -> Self {
        Self {
            delay: simulation.scale(MODEL_CALL_DELAY_MS),
        }
    }
}

#[async_trait]
impl NodeHandler for ModelCallNode {
    fn kind(&self) -> NodeKind {
        NodeKind::ModelCall
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        simulate(&ctx, self.delay).await?;

        let settings = ModelSettings::from_config(&ctx.node.config);
        let context_length: usize = ctx
            .inputs
            .values()
            .map(|v| value_text(v).len())
            .sum();
        let answer = format!(
            "[{}/{}] Response to \"{}\" using {} characters of context",
            settings.provider, settings.model, ctx.query, context_length
        );

        Ok(NodeOutput::new()
            .with_output("output", answer.clone())
            .with_output("answer", answer)
            .with_meta("provider", settings.provider)
            .with_meta("model", settings.model)
            .with_meta("contextLength", context_length))
    }

    fn validate_config(&self, config: &Map<String, Value>) -> Result<(), NodeError> {
        expect_type(config, "temperature", "number", Value::is_number)?;
        expect_type(config, "maxTokens", "integer", Value::is_u64)?;
        expect_type(config, "webSearch", "boolean", Value::is_boolean)?;

        if let Some(temperature) = config_f64(config, "temperature") {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(NodeError::Configuration(format!(
                    "temperature must be between 0 and 2, got {}",
                    temperature
                )));
            }
        }
        if config_u64(config, "maxTokens") == Some(0) {
            return Err(NodeError::Configuration("maxTokens must be positive".to_string()));
        }
        Ok(())
    }

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata {
            description: "Generate an answer with a language model".to_string(),
            category: "model".to_string(),
            inputs: vec![PortDefinition::new("context", "Retrieved context", false)],
            outputs: vec![PortDefinition::new("answer", "Generated answer", true)],
        }
    }
}
