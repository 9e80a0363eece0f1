use crate::{ExecutionId, GraphNode, NodeError, NodeKind, DEFAULT_PORT};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Handler for one node kind. Implementations must give up promptly once
/// `ctx.cancellation` fires.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    fn kind(&self) -> NodeKind;

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError>;

    /// Optional: Validate configuration before a run starts
    fn validate_config(&self, _config: &Map<String, Value>) -> Result<(), NodeError> {
        Ok(())
    }

    /// Optional: Description, category and ports for listings
    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata::default()
    }
}

/// Metadata about a node kind's handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerMetadata {
    pub description: String,
    pub category: String,
    pub inputs: Vec<PortDefinition>,
    pub outputs: Vec<PortDefinition>,
}

impl Default for HandlerMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDefinition {
    pub name: String,
    pub description: String,
    pub required: bool,
}

impl PortDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required,
        }
    }
}

/// Execution context passed to each node
#[derive(Clone)]
pub struct NodeContext {
    pub execution_id: ExecutionId,

    /// The node being executed, including its static configuration
    pub node: GraphNode,

    /// Input values gathered from incoming edges
    pub inputs: Map<String, Value>,

    /// Query of the current run
    pub query: String,

    pub cancellation: CancellationToken,
}

impl NodeContext {
    pub fn new(execution_id: impl Into<ExecutionId>, node: GraphNode) -> Self {
        Self {
            execution_id: execution_id.into(),
            node,
            inputs: Map::new(),
            query: String::new(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node.id
    }

    /// Get required input or return error
    pub fn require_input(&self, name: &str) -> Result<&Value, NodeError> {
        self.inputs
            .get(name)
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    /// Get config value or return error
    pub fn require_config(&self, name: &str) -> Result<&Value, NodeError> {
        self.node
            .config
            .get(name)
            .ok_or_else(|| NodeError::Configuration(format!("Missing config: {}", name)))
    }

    pub fn get_config_or(&self, name: &str, default: Value) -> Value {
        self.node.config.get(name).cloned().unwrap_or(default)
    }

    /// The inputs rendered as one text blob, falling back to the run query.
    pub fn input_text(&self) -> String {
        let parts: Vec<String> = self
            .inputs
            .values()
            .map(value_text)
            .filter(|s| !s.is_empty())
            .collect();
        if parts.is_empty() {
            self.query.clone()
        } else {
            parts.join("\n")
        }
    }

    /// Sleep for `duration` unless cancelled first.
    pub async fn delay(&self, duration: Duration) -> Result<(), NodeError> {
        if duration.is_zero() {
            return if self.cancellation.is_cancelled() {
                Err(NodeError::Cancelled)
            } else {
                Ok(())
            };
        }
        tokio::select! {
            _ = self.cancellation.cancelled() => Err(NodeError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

/// Plain-text rendering of a JSON value: strings unquoted, objects by their `output`/`answer`.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("answer")
            .or_else(|| map.get(DEFAULT_PORT))
            .map(value_text)
            .unwrap_or_else(|| value.to_string()),
        other => other.to_string(),
    }
}

/// Output from node execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeOutput {
    /// Output port values
    pub outputs: Map<String, Value>,

    pub metadata: NodeMetadata,
}

impl NodeOutput {
    pub fn new() -> Self {
        Self {
            outputs: Map::new(),
            metadata: NodeMetadata::default(),
        }
    }

    pub fn with_output(mut self, port: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(port.into(), value.into());
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.custom.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, port: &str) -> Option<&Value> {
        self.outputs.get(port)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.outputs)
    }
}

impl Default for NodeOutput {
    fn default() -> Self {
        Self::new()
    }
}

/// Metadata about node execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetadata {
    pub execution_time_ms: u64,
    pub custom: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_text() {
        assert_eq!(value_text(&json!("hi")), "hi");
        assert_eq!(value_text(&json!({"answer": "a", "output": "o"})), "a");
        assert_eq!(value_text(&json!({"output": "o"})), "o");
        assert_eq!(value_text(&json!(3)), "3");
        assert_eq!(value_text(&Value::Null), "");
    }

    #[test]
    fn test_input_text_falls_back_to_query() {
        let ctx = NodeContext::new("x", GraphNode::new("n", NodeKind::Transform)).with_query("q");
        assert_eq!(ctx.input_text(), "q");
        let ctx = ctx.with_input("a", "from a");
        assert_eq!(ctx.input_text(), "from a");
    }

    #[tokio::test]
    async fn test_delay_observes_cancellation() {
        let ctx = NodeContext::new("x", GraphNode::new("n", NodeKind::ModelCall));
        ctx.cancellation.cancel();
        let result = ctx.delay(Duration::from_secs(30)).await;
        assert_eq!(result, Err(NodeError::Cancelled));
    }
}
