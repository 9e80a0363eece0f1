use graphcore::{ExecutionId, WorkflowExecution};
use graphruntime::StoreReader;
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// What the server keeps of a spawned run
#[derive(Clone)]
pub struct RunHandle {
    pub reader: StoreReader,
    pub cancellation: CancellationToken,
}

impl RunHandle {
    pub fn is_finished(&self) -> bool {
        self.reader.status().map_or(false, |s| s.is_terminal())
    }
}

#[derive(Default)]
struct Runs {
    handles: HashMap<ExecutionId, RunHandle>,
    order: VecDeque<ExecutionId>,
}

/// Runs by execution id. Finished runs beyond `limit` are forgotten,
/// oldest first; running ones are always kept.
pub struct RunTable {
    inner: RwLock<Runs>,
    limit: usize,
}

impl RunTable {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: RwLock::new(Runs::default()),
            limit,
        }
    }

    pub async fn insert(&self, execution_id: ExecutionId, handle: RunHandle) {
        let mut runs = self.inner.write().await;
        runs.order.push_back(execution_id.clone());
        runs.handles.insert(execution_id, handle);

        while runs.order.len() > self.limit {
            let finished = runs.order.iter().position(|id| {
                runs.handles.get(id).map_or(true, RunHandle::is_finished)
            });
            let Some(index) = finished else { break };
            if let Some(id) = runs.order.remove(index) {
                tracing::debug!(execution_id = %id, "Forgetting finished run");
                runs.handles.remove(&id);
            }
        }
    }

    pub async fn get(&self, execution_id: &str) -> Option<RunHandle> {
        self.inner.read().await.handles.get(execution_id).cloned()
    }

    /// Snapshot of a known, started execution
    pub async fn execution(&self, execution_id: &str) -> Option<WorkflowExecution> {
        self.get(execution_id)
            .await
            .and_then(|handle| handle.reader.find(execution_id))
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.handles.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
