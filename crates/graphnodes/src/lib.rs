//! Standard node library
//!
//! Simulated handlers for every node kind plus the remote executor that
//! hands a whole run to a backend.

mod common;
mod conditional;
mod input;
mod model;
mod output;
mod remote;
mod retrieval;
mod transform;

pub use conditional::{ConditionalNode, FALSE_PORT, TRUE_PORT};
pub use input::InputNode;
pub use model::{ModelCallNode, ModelSettings};
pub use output::OutputNode;
pub use remote::{
    ExecutionBackend, ExecutionSummary, HttpBackend, RemoteDefinition, RemoteExecutor,
    RemoteRequest, RemoteResponse,
};
pub use retrieval::{RetrievalNode, MAX_TOP_K};
pub use transform::{Operation, TransformNode};

use graphcore::config::{RuntimeConfig, SimulationConfig};
use graphcore::{NodeHandler, NodeKind, TransportError};
use graphruntime::{NodeExecutor, NodeRegistry, RegistryExecutor};
use std::sync::Arc;

/// The simulated handler for `kind`
pub fn handler_for(kind: NodeKind, simulation: &SimulationConfig) -> Arc<dyn NodeHandler> {
    match kind {
        NodeKind::Input => Arc::new(InputNode::new(simulation)),
        NodeKind::ModelCall => Arc::new(ModelCallNode::new(simulation)),
        NodeKind::Retrieval => Arc::new(RetrievalNode::new(simulation)),
        NodeKind::Transform => Arc::new(TransformNode::new(simulation)),
        NodeKind::Conditional => Arc::new(ConditionalNode::new(simulation)),
        NodeKind::Output => Arc::new(OutputNode::new(simulation)),
    }
}

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut NodeRegistry, simulation: &SimulationConfig) {
    for kind in NodeKind::ALL {
        registry.register(handler_for(kind, simulation));
    }
}

pub fn simulated_registry(simulation: &SimulationConfig) -> Arc<NodeRegistry> {
    let mut registry = NodeRegistry::new();
    register_all(&mut registry, simulation);
    Arc::new(registry)
}

/// Remote executor when an endpoint is configured, simulated otherwise.
pub fn executor_from_config(config: &RuntimeConfig) -> Result<Arc<dyn NodeExecutor>, TransportError> {
    let registry = simulated_registry(&config.simulation);
    match HttpBackend::from_config(&config.remote)? {
        Some(backend) => {
            tracing::info!(
                "Using remote executor at {}",
                config.remote.endpoint.as_deref().unwrap_or_default()
            );
            Ok(Arc::new(RemoteExecutor::new(
                Arc::new(backend),
                registry,
                &config.simulation,
            )))
        }
        None => Ok(Arc::new(RegistryExecutor::new(registry))),
    }
}
