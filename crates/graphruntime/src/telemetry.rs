//! Run and node metrics, recorded through the `metrics` facade.
//!
//! Recording is a no-op until the host installs a recorder; the server
//! installs a Prometheus one and serves it on `/metrics`.

use crate::orchestrator::RunOutcome;
use graphcore::{NodeKind, NodeStatus};
use std::time::Duration;

pub const EXECUTIONS_TOTAL: &str = "workflow_executions_total";
pub const EXECUTION_DURATION: &str = "workflow_execution_duration_seconds";
pub const NODE_EXECUTIONS_TOTAL: &str = "workflow_node_executions_total";
pub const NODE_DURATION: &str = "workflow_node_duration_seconds";
pub const ACTIVE_WORKFLOWS: &str = "active_workflows";

pub(crate) fn run_started() {
    metrics::gauge!(ACTIVE_WORKFLOWS).increment(1.0);
}

pub(crate) fn run_finished(workflow_id: &str, outcome: &RunOutcome, elapsed: Duration) {
    let status = match outcome.error() {
        None => "success",
        Some(e) if e.is_cancelled() => "cancelled",
        Some(_) => "error",
    };
    metrics::gauge!(ACTIVE_WORKFLOWS).decrement(1.0);
    metrics::counter!(
        EXECUTIONS_TOTAL,
        "workflow_id" => workflow_id.to_string(),
        "status" => status
    )
    .increment(1);
    metrics::histogram!(EXECUTION_DURATION, "workflow_id" => workflow_id.to_string())
        .record(elapsed.as_secs_f64());
}

/// Skipped nodes never ran, so they carry no duration.
pub(crate) fn node_finished(
    workflow_id: &str,
    kind: NodeKind,
    status: NodeStatus,
    elapsed: Option<Duration>,
) {
    let status = match status {
        NodeStatus::Success => "success",
        NodeStatus::Error => "error",
        NodeStatus::Skipped => "skipped",
        _ => return,
    };
    metrics::counter!(
        NODE_EXECUTIONS_TOTAL,
        "workflow_id" => workflow_id.to_string(),
        "node_type" => kind.as_str(),
        "status" => status
    )
    .increment(1);
    if let Some(elapsed) = elapsed {
        metrics::histogram!(NODE_DURATION, "node_type" => kind.as_str())
            .record(elapsed.as_secs_f64());
    }
}
