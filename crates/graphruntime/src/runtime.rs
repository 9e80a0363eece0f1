use crate::executor::{NodeExecutor, RegistryExecutor};
use crate::orchestrator::{PreparedRun, RunOptions, RunOutcome, WorkflowOrchestrator};
use crate::registry::NodeRegistry;
use crate::store::ExecutionStore;
use graphcore::{EventBus, ExecutionEvent, RunRequest, RuntimeConfig, ValidationError};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Main entry point: one executor, one event bus, any number of runs.
pub struct GraphRuntime {
    config: RuntimeConfig,
    executor: Arc<dyn NodeExecutor>,
    event_bus: EventBus,
}

impl GraphRuntime {
    pub fn new(executor: Arc<dyn NodeExecutor>, config: RuntimeConfig) -> Self {
        let event_bus = EventBus::new(config.event_buffer_size);
        Self {
            config,
            executor,
            event_bus,
        }
    }

    /// Runtime executing nodes through the handlers of `registry`
    pub fn with_registry(registry: Arc<NodeRegistry>, config: RuntimeConfig) -> Self {
        Self::new(Arc::new(RegistryExecutor::new(registry)), config)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn executor(&self) -> &Arc<dyn NodeExecutor> {
        &self.executor
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// A store wired to this runtime's event bus
    pub fn new_store(&self) -> ExecutionStore {
        ExecutionStore::new(self.event_bus.clone(), self.config.history_limit)
    }

    /// A fresh orchestrator. Each one tracks a single active run.
    pub fn orchestrator(&self) -> WorkflowOrchestrator {
        WorkflowOrchestrator::new(self.executor.clone())
    }

    pub fn validate(&self, request: &RunRequest) -> Result<PreparedRun, ValidationError> {
        self.orchestrator().validate(request)
    }

    pub async fn execute(&self, store: &mut ExecutionStore, request: RunRequest) -> RunOutcome {
        self.execute_with_options(store, request, RunOptions::default())
            .await
    }

    pub async fn execute_with_options(
        &self,
        store: &mut ExecutionStore,
        request: RunRequest,
        options: RunOptions,
    ) -> RunOutcome {
        self.orchestrator()
            .run_with_options(store, request, options)
            .await
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }
}
