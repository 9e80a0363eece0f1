//! Workflow execution runtime
//!
//! This crate orders graphs, drives runs node by node, and owns the
//! execution state that observers read while a run is in flight.

mod analyzer;
mod executor;
mod orchestrator;
mod registry;
mod runtime;
mod store;
pub mod telemetry;

pub use analyzer::{ExecutionPlan, GraphAnalyzer};
pub use executor::{NodeExecutor, RegistryExecutor, RunContext, RunSession};
pub use orchestrator::{PreparedRun, RunOptions, RunOutcome, WorkflowOrchestrator};
pub use registry::NodeRegistry;
pub use runtime::GraphRuntime;
pub use store::{ExecutionStore, NodeDetail, StoreError, StoreReader, DEFAULT_HISTORY_LIMIT};
