//! HTTP surface of the graph runner: start and cancel runs, fetch status and
//! log history, stream logs over SSE and state events over a websocket.
//! Run and node metrics are served in Prometheus format.

mod routes;
mod runs;
mod stream;
mod telemetry;

use actix_web::web;
use graphcore::RuntimeConfig;
use graphruntime::{GraphRuntime, NodeRegistry};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;

pub use runs::{RunHandle, RunTable};
pub use telemetry::prometheus_handle;

/// Application state shared across handlers
pub struct AppState {
    pub runtime: Arc<GraphRuntime>,
    pub registry: Arc<NodeRegistry>,
    pub runs: RunTable,
    pub heartbeat: Duration,
    pub metrics: PrometheusHandle,
}

impl AppState {
    pub fn from_config(config: RuntimeConfig) -> anyhow::Result<Self> {
        let executor = graphnodes::executor_from_config(&config)?;
        let metrics = prometheus_handle()?;
        let registry = graphnodes::simulated_registry(&config.simulation);
        let heartbeat = Duration::from_secs(config.server.heartbeat_secs.max(1));
        let runs = RunTable::new(config.history_limit);

        Ok(Self {
            runtime: Arc::new(GraphRuntime::new(executor, config)),
            registry,
            runs,
            heartbeat,
            metrics,
        })
    }
}

/// Register every route on an actix `App`
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(routes::health_check)
        .service(routes::submit_execution)
        .service(routes::cancel_execution)
        .service(routes::execution_status)
        .service(routes::execution_logs)
        .service(stream::stream_execution_logs)
        .service(routes::websocket_events)
        .service(routes::list_node_types)
        .service(routes::prometheus_metrics);
}
