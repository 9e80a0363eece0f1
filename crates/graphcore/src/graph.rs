use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

pub type NodeId = String;
pub type EdgeId = String;
pub type WorkflowId = String;

/// Port name used when an edge does not carry an explicit source port.
pub const DEFAULT_PORT: &str = "output";

/// Tagged type of a graph node. Determines which handler runs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    #[serde(alias = "userQuery", alias = "user_query", alias = "UserQuery")]
    Input,
    #[serde(
        alias = "llm",
        alias = "LLM",
        alias = "llmEngine",
        alias = "llm_engine",
        alias = "modelCall"
    )]
    ModelCall,
    #[serde(alias = "knowledgeBase", alias = "knowledge_base", alias = "KnowledgeBase")]
    Retrieval,
    Transform,
    #[serde(alias = "condition", alias = "ifElse")]
    Conditional,
    #[serde(alias = "Output")]
    Output,
}

impl NodeKind {
    pub const ALL: [NodeKind; 6] = [
        NodeKind::Input,
        NodeKind::ModelCall,
        NodeKind::Retrieval,
        NodeKind::Transform,
        NodeKind::Conditional,
        NodeKind::Output,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Input => "input",
            NodeKind::ModelCall => "model-call",
            NodeKind::Retrieval => "retrieval",
            NodeKind::Transform => "transform",
            NodeKind::Conditional => "conditional",
            NodeKind::Output => "output",
        }
    }

    /// Failure of a critical node aborts the whole run.
    pub fn is_critical(&self) -> bool {
        matches!(self, NodeKind::ModelCall | NodeKind::Output)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node as drawn in the graph editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: NodeId,
    #[serde(alias = "type")]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, alias = "data")]
    pub config: Map<String, Value>,
}

impl GraphNode {
    pub fn new(id: impl Into<NodeId>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            label: None,
            config: Map::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Label for log messages, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }
}

/// Directed connection between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "sourceHandle")]
    pub source_port: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "targetHandle")]
    pub target_port: Option<String>,
}

impl GraphEdge {
    pub fn new(id: impl Into<EdgeId>, source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            source_port: None,
            target_port: None,
        }
    }

    pub fn with_ports(mut self, source_port: Option<&str>, target_port: Option<&str>) -> Self {
        self.source_port = source_port.map(str::to_string);
        self.target_port = target_port.map(str::to_string);
        self
    }

    /// Output key read from the source node.
    pub fn source_key(&self) -> &str {
        self.source_port.as_deref().unwrap_or(DEFAULT_PORT)
    }

    /// Input key written on the target node.
    pub fn input_key(&self) -> &str {
        self.target_port.as_deref().unwrap_or(&self.source)
    }
}

/// Complete graph handed over by the editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowGraph {
    #[serde(default = "new_workflow_id")]
    pub id: WorkflowId,
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
}

fn new_workflow_id() -> WorkflowId {
    Uuid::new_v4().to_string()
}

impl WorkflowGraph {
    pub fn new() -> Self {
        Self {
            id: new_workflow_id(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn with_id(id: impl Into<WorkflowId>) -> Self {
        Self {
            id: id.into(),
            ..Self::new()
        }
    }

    pub fn add_node(&mut self, node: GraphNode) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    /// Connect two nodes on their default ports. Edge id is derived from the endpoints.
    pub fn connect(&mut self, source: &str, target: &str) -> EdgeId {
        self.connect_ports(source, None, target, None)
    }

    pub fn connect_ports(
        &mut self,
        source: &str,
        source_port: Option<&str>,
        target: &str,
        target_port: Option<&str>,
    ) -> EdgeId {
        let id = match source_port {
            Some(port) => format!("e-{}-{}-{}", source, port, target),
            None => format!("e-{}-{}", source, target),
        };
        self.edges.push(
            GraphEdge::new(id.clone(), source, target).with_ports(source_port, target_port),
        );
        id
    }

    pub fn find_node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn incoming<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a GraphEdge> + 'a {
        self.edges.iter().filter(move |e| e.target == id)
    }

    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a GraphEdge> + 'a {
        self.edges.iter().filter(move |e| e.source == id)
    }
}

impl Default for WorkflowGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Input of one run: the graph plus the user's query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    #[serde(flatten)]
    pub graph: WorkflowGraph,
    #[serde(default)]
    pub query: String,
}

impl RunRequest {
    pub fn new(graph: WorkflowGraph, query: impl Into<String>) -> Self {
        Self {
            graph,
            query: query.into(),
        }
    }

    /// The request query if present, otherwise the first input node's configured query.
    pub fn resolve_query(&self) -> Option<String> {
        let supplied = self.query.trim();
        if !supplied.is_empty() {
            return Some(supplied.to_string());
        }
        self.graph
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::Input)
            .find_map(|n| {
                ["query", "userQuery", "value"]
                    .iter()
                    .filter_map(|key| n.config_str(key))
                    .map(str::trim)
                    .find(|q| !q.is_empty())
                    .map(str::to_string)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_aliases() {
        let node: GraphNode =
            serde_json::from_value(json!({"id": "n1", "type": "llmEngine", "data": {"model": "m"}}))
                .unwrap();
        assert_eq!(node.kind, NodeKind::ModelCall);
        assert_eq!(node.config_str("model"), Some("m"));

        let kind: NodeKind = serde_json::from_value(json!("knowledgeBase")).unwrap();
        assert_eq!(kind, NodeKind::Retrieval);
        assert_eq!(serde_json::to_value(NodeKind::ModelCall).unwrap(), json!("model-call"));
    }

    #[test]
    fn test_critical_kinds() {
        let critical: Vec<_> = NodeKind::ALL.iter().filter(|k| k.is_critical()).collect();
        assert_eq!(critical, vec![&NodeKind::ModelCall, &NodeKind::Output]);
    }

    #[test]
    fn test_resolve_query_from_input_node() {
        let mut graph = WorkflowGraph::new();
        graph.add_node(GraphNode::new("q", NodeKind::Input).with_config("userQuery", "  hello "));
        let request = RunRequest::new(graph, "   ");
        assert_eq!(request.resolve_query().as_deref(), Some("hello"));
    }

    #[test]
    fn test_resolve_query_prefers_request() {
        let mut graph = WorkflowGraph::new();
        graph.add_node(GraphNode::new("q", NodeKind::Input).with_config("query", "from node"));
        let request = RunRequest::new(graph, "from request");
        assert_eq!(request.resolve_query().as_deref(), Some("from request"));
    }

    #[test]
    fn test_edge_keys() {
        let edge = GraphEdge::new("e1", "a", "b");
        assert_eq!(edge.source_key(), DEFAULT_PORT);
        assert_eq!(edge.input_key(), "a");

        let edge = edge.with_ports(Some("true"), Some("text"));
        assert_eq!(edge.source_key(), "true");
        assert_eq!(edge.input_key(), "text");
    }
}
