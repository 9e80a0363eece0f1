//! Core abstractions for the graph runner
//!
//! This crate provides the data model, error taxonomy and traits that every
//! other crate in the workspace depends on.

pub mod config;
mod error;
pub mod events;
mod graph;
pub mod log;
mod node;
pub mod state;

pub use config::RuntimeConfig;
pub use error::{NodeError, RunError, TransportError, ValidationError};
pub use events::{EventBus, ExecutionEvent};
pub use graph::{
    EdgeId, GraphEdge, GraphNode, NodeId, NodeKind, RunRequest, WorkflowGraph, WorkflowId,
    DEFAULT_PORT,
};
pub use log::{ExecutionLog, LogFilter, LogLevel, LogPage, LogQuery};
pub use node::{
    value_text, HandlerMetadata, NodeContext, NodeHandler, NodeMetadata, NodeOutput, PortDefinition,
};
pub use state::{
    EdgeExecutionState, EdgeStatus, ExecutionId, ExecutionStatus, ExecutionStatusReport,
    NodeExecutionState, NodeStatus, Progress, ProgressReport, WorkflowExecution,
};

/// Result type for run-level operations
pub type Result<T> = std::result::Result<T, RunError>;
