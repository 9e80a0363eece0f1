use thiserror::Error;

/// Run-level failure. This is what a caller of the orchestrator sees.
#[derive(Error, Debug, Clone)]
pub enum RunError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Node {node_id} failed: {source}")]
    Node {
        node_id: String,
        #[source]
        source: NodeError,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Execution cancelled")]
    Cancelled,
}

impl RunError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunError::Cancelled)
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, RunError::Validation(_))
    }

    /// Id of the node that triggered the failure, if any.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            RunError::Node { node_id, .. } => Some(node_id),
            _ => None,
        }
    }
}

/// Malformed graph or missing run input. Raised before any state is touched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Graph has no nodes")]
    EmptyGraph,

    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Duplicate edge id: {0}")]
    DuplicateEdge(String),

    #[error("Edge {edge_id} references unknown node {node_id}")]
    UnknownNode { edge_id: String, node_id: String },

    #[error("Cyclic dependency detected between nodes: {}", format_cycles(.cycles))]
    CyclicDependency { cycles: Vec<Vec<String>> },

    #[error("Invalid configuration on node {node_id}: {message}")]
    InvalidConfig { node_id: String, message: String },

    #[error("No query supplied and no input node provides one")]
    MissingQuery,
}

fn format_cycles(cycles: &[Vec<String>]) -> String {
    cycles
        .iter()
        .map(|c| c.join(" -> "))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failure of a single node's work.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Remote execution failed: {0}")]
    Remote(String),

    #[error("Cancelled")]
    Cancelled,
}

/// Failure talking to the remote backend or the log stream.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode payload: {0}")]
    Decode(String),

    #[error("Connection closed")]
    Closed,

    #[error("Server reported error: {0}")]
    Server(String),

    #[error("Gave up after {attempts} reconnect attempts")]
    RetriesExhausted { attempts: u32 },
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        TransportError::Decode(e.to_string())
    }
}
