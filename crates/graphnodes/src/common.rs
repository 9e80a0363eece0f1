use graphcore::{NodeContext, NodeError};
use serde_json::Value;
use std::time::Duration;

/// Wait out the simulated work, then honor a `simulateFailure` request.
pub(crate) async fn simulate(ctx: &NodeContext, delay: Duration) -> Result<(), NodeError> {
    ctx.delay(delay).await?;
    if let Some(message) = ctx.node.config_str("simulateFailure") {
        return Err(NodeError::ExecutionFailed(message.to_string()));
    }
    Ok(())
}

pub(crate) fn config_f64(config: &serde_json::Map<String, Value>, key: &str) -> Option<f64> {
    config.get(key).and_then(Value::as_f64)
}

pub(crate) fn config_u64(config: &serde_json::Map<String, Value>, key: &str) -> Option<u64> {
    config.get(key).and_then(Value::as_u64)
}

/// Reject a key that is present but not of the expected JSON type.
pub(crate) fn expect_type(
    config: &serde_json::Map<String, Value>,
    key: &str,
    expected: &str,
    check: fn(&Value) -> bool,
) -> Result<(), NodeError> {
    match config.get(key) {
        Some(value) if !check(value) => Err(NodeError::InvalidInputType {
            field: key.to_string(),
            expected: expected.to_string(),
            actual: type_name(value).to_string(),
        }),
        _ => Ok(()),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
