use crate::model::ModelSettings;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use graphcore::config::{RemoteConfig, SimulationConfig};
use graphcore::{
    value_text, GraphEdge, GraphNode, NodeContext, NodeError, NodeKind, NodeOutput, RunError,
    TransportError, WorkflowGraph,
};
use graphruntime::{NodeExecutor, NodeRegistry, RunContext, RunSession};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;

/// Per-node animation while the backend call is in flight
pub const REMOTE_ANIMATION_MS: u64 = 300;

/// Body of the single backend call issued per run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRequest {
    pub definition: RemoteDefinition,
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_search: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDefinition {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub provider: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub temperature: f64,
    pub max_tokens: u64,
    pub web_search: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl RemoteRequest {
    /// Model settings come from the first model-call node, defaults otherwise.
    pub fn from_run(graph: &WorkflowGraph, query: &str) -> Self {
        let model_node = graph.nodes.iter().find(|n| n.kind == NodeKind::ModelCall);
        let settings = model_node
            .map(|n| ModelSettings::from_config(&n.config))
            .unwrap_or_default();
        let prompt = model_node
            .and_then(|n| n.config_str("prompt"))
            .map(str::to_string);

        Self {
            definition: RemoteDefinition {
                nodes: graph.nodes.clone(),
                edges: graph.edges.clone(),
                provider: settings.provider,
                model: settings.model,
                api_key: settings.api_key,
                temperature: settings.temperature,
                max_tokens: settings.max_tokens,
                web_search: settings.web_search,
                system_prompt: settings.system_prompt,
            },
            query: query.to_string(),
            prompt,
            web_search: settings.web_search.then_some(true),
        }
    }
}

/// Backend response: `answer` (or `result`) plus optional execution stats.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RemoteResponse {
    #[serde(default)]
    pub answer: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default, rename = "_execution")]
    pub execution: Option<ExecutionSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    #[serde(default, alias = "duration_seconds")]
    pub duration_seconds: f64,
    #[serde(default, alias = "kb_used")]
    pub kb_used: bool,
    #[serde(default, alias = "context_length")]
    pub context_length: u64,
}

impl RemoteResponse {
    pub fn from_value(raw: &Value) -> Result<Self, TransportError> {
        Ok(serde_json::from_value(raw.clone())?)
    }

    pub fn answer_text(&self) -> String {
        self.answer
            .as_ref()
            .or(self.result.as_ref())
            .map(value_text)
            .unwrap_or_default()
    }
}

/// Something that can execute a whole graph in one request
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn execute(&self, request: &RemoteRequest) -> Result<Value, TransportError>;
}

/// POSTs the request as JSON to the configured endpoint.
pub struct HttpBackend {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpBackend {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn from_config(config: &RemoteConfig) -> Result<Option<Self>, TransportError> {
        config
            .endpoint
            .as_ref()
            .map(|endpoint| Self::new(endpoint.clone(), Duration::from_secs(config.timeout_secs)))
            .transpose()
    }
}

#[async_trait]
impl ExecutionBackend for HttpBackend {
    async fn execute(&self, request: &RemoteRequest) -> Result<Value, TransportError> {
        tracing::info!("POST {}", self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}

type SharedResponse = Shared<BoxFuture<'static, Result<Value, TransportError>>>;

/// Runs the whole graph through one backend call and animates the nodes
/// locally while it is in flight.
pub struct RemoteExecutor {
    backend: Arc<dyn ExecutionBackend>,
    local: Arc<NodeRegistry>,
    animation: Duration,
}

impl RemoteExecutor {
    /// `local` runs the kinds the backend knows nothing about (transform, conditional).
    pub fn new(
        backend: Arc<dyn ExecutionBackend>,
        local: Arc<NodeRegistry>,
        simulation: &SimulationConfig,
    ) -> Self {
        Self {
            backend,
            local,
            animation: simulation.scale(REMOTE_ANIMATION_MS),
        }
    }

    fn runs_locally(kind: NodeKind) -> bool {
        matches!(kind, NodeKind::Transform | NodeKind::Conditional)
    }
}

#[async_trait]
impl NodeExecutor for RemoteExecutor {
    fn name(&self) -> &str {
        "remote"
    }

    fn validate_node(&self, node: &GraphNode) -> Result<(), NodeError> {
        if !Self::runs_locally(node.kind) {
            return Ok(());
        }
        match self.local.get(node.kind) {
            Some(handler) => handler.validate_config(&node.config),
            None => Err(NodeError::Configuration(format!(
                "No handler registered for kind {}",
                node.kind
            ))),
        }
    }

    async fn start_run(&self, run: &RunContext) -> Result<Box<dyn RunSession>, RunError> {
        let request = RemoteRequest::from_run(&run.graph, &run.query);
        let backend = self.backend.clone();
        tracing::info!(execution_id = %run.execution_id, "Dispatching run to backend");

        let task = tokio::spawn(async move { backend.execute(&request).await });
        let abort = task.abort_handle();
        let response: SharedResponse = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(TransportError::Request(format!("backend task failed: {}", e))),
            }
        }
        .boxed()
        .shared();

        Ok(Box::new(RemoteSession {
            response,
            abort,
            local: self.local.clone(),
            animation: self.animation,
        }))
    }
}

struct RemoteSession {
    response: SharedResponse,
    abort: AbortHandle,
    local: Arc<NodeRegistry>,
    animation: Duration,
}

impl RemoteSession {
    async fn await_response(&self, ctx: &NodeContext) -> Result<RemoteResponse, NodeError> {
        let raw = tokio::select! {
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
            raw = self.response.clone() => raw.map_err(|e| NodeError::Remote(e.to_string()))?,
        };
        RemoteResponse::from_value(&raw).map_err(|e| NodeError::Remote(e.to_string()))
    }
}

#[async_trait]
impl RunSession for RemoteSession {
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        ctx.delay(self.animation).await?;

        match ctx.node.kind {
            NodeKind::Input => {
                let query = ctx.query.clone();
                Ok(NodeOutput::new()
                    .with_output("output", query.clone())
                    .with_output("query", query))
            }
            NodeKind::Transform | NodeKind::Conditional => {
                let handler = self.local.get(ctx.node.kind).ok_or_else(|| {
                    NodeError::Configuration(format!(
                        "No handler registered for kind {}",
                        ctx.node.kind
                    ))
                })?;
                handler.execute(ctx).await
            }
            NodeKind::Retrieval => {
                let response = self.await_response(&ctx).await?;
                let summary = response.execution.unwrap_or_default();
                Ok(NodeOutput::new()
                    .with_output("output", "")
                    .with_output("kbUsed", summary.kb_used)
                    .with_output("contextLength", summary.context_length))
            }
            NodeKind::ModelCall => {
                let response = self.await_response(&ctx).await?;
                let answer = response.answer_text();
                Ok(NodeOutput::new()
                    .with_output("output", answer.clone())
                    .with_output("answer", answer))
            }
            NodeKind::Output => {
                let response = self.await_response(&ctx).await?;
                let answer = response.answer_text();
                let mut output = NodeOutput::new()
                    .with_output("output", answer.clone())
                    .with_output("answer", answer);
                if let Some(summary) = response.execution {
                    output = output.with_meta("durationSeconds", summary.duration_seconds);
                }
                Ok(output)
            }
        }
    }

    async fn finish(&self) -> Result<Option<Value>, RunError> {
        let raw = self.response.clone().await?;
        Ok(Some(raw))
    }
}

impl Drop for RemoteSession {
    fn drop(&mut self) {
        // No-op once the call has completed
        self.abort.abort();
    }
}
