use graphruntime::telemetry::{EXECUTION_DURATION, NODE_DURATION};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

const EXECUTION_BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0];
const NODE_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0];

static PROMETHEUS: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the process-wide Prometheus recorder on first use and return its handle.
pub fn prometheus_handle() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS.get() {
        return Ok(handle.clone());
    }

    let recorder = PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(EXECUTION_DURATION.to_string()), EXECUTION_BUCKETS)?
        .set_buckets_for_metric(Matcher::Full(NODE_DURATION.to_string()), NODE_BUCKETS)?
        .build_recorder();

    let handle = PROMETHEUS.get_or_init(move || {
        let handle = recorder.handle();
        if metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("Another metrics recorder is installed; /metrics will stay empty");
        }
        handle
    });
    Ok(handle.clone())
}
