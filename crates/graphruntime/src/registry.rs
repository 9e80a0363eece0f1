use graphcore::{HandlerMetadata, NodeHandler, NodeKind};
use std::collections::HashMap;
use std::sync::Arc;

/// Lookup table of node handlers, one per node kind
pub struct NodeRegistry {
    handlers: HashMap<NodeKind, Arc<dyn NodeHandler>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler. A later registration for the same kind replaces the earlier one.
    pub fn register(&mut self, handler: Arc<dyn NodeHandler>) {
        let kind = handler.kind();
        tracing::debug!("Registering node kind: {}", kind);
        self.handlers.insert(kind, handler);
    }

    pub fn get(&self, kind: NodeKind) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(&kind).cloned()
    }

    /// Registered kinds in declaration order of `NodeKind`
    pub fn list_kinds(&self) -> Vec<NodeKind> {
        NodeKind::ALL
            .iter()
            .copied()
            .filter(|k| self.handlers.contains_key(k))
            .collect()
    }

    /// Kinds without a handler
    pub fn missing_kinds(&self) -> Vec<NodeKind> {
        NodeKind::ALL
            .iter()
            .copied()
            .filter(|k| !self.handlers.contains_key(k))
            .collect()
    }

    pub fn get_metadata(&self, kind: NodeKind) -> Option<HandlerMetadata> {
        self.handlers.get(&kind).map(|h| h.metadata())
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
