use chrono::{DateTime, Utc};
use graphcore::{ExecutionLog, ExecutionStatus, TransportError};
use serde::{Deserialize, Serialize};

/// Parse a raw SSE byte stream into individual events.
/// SSE format: `event: <type>\ndata: <json>\n\n`
#[derive(Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

/// A parsed SSE event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event_type: Option<String>,
    pub data: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes into the parser and extract complete events.
    ///
    /// Bytes are buffered until a blank line, so multi-byte characters split
    /// across chunks decode correctly.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend(chunk.iter().filter(|b| **b != b'\r'));
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            let block = String::from_utf8_lossy(&block[..pos]);

            let mut event_type = None;
            let mut data_lines = Vec::new();

            for line in block.lines() {
                if line.starts_with(':') {
                    // comment / keep-alive
                    continue;
                }
                if let Some(val) = line.strip_prefix("event:") {
                    event_type = Some(val.trim_start().to_string());
                } else if let Some(val) = line.strip_prefix("data:") {
                    data_lines.push(val.strip_prefix(' ').unwrap_or(val).to_string());
                }
            }

            if event_type.is_some() || !data_lines.is_empty() {
                events.push(SseEvent {
                    event_type,
                    data: data_lines.join("\n"),
                });
            }
        }

        events
    }
}

/// Frame one event for the wire.
pub fn format_event(event_type: &str, data: &str) -> String {
    let mut framed = format!("event: {}\n", event_type);
    for line in data.split('\n') {
        framed.push_str("data: ");
        framed.push_str(line);
        framed.push('\n');
    }
    framed.push('\n');
    framed
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletePayload {
    pub status: ExecutionStatus,
    #[serde(default, alias = "duration_seconds", skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
}

/// Typed event of the execution log stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Log(ExecutionLog),
    Complete(CompletePayload),
    Heartbeat,
    Error(String),
}

impl StreamEvent {
    pub const LOG: &'static str = "log";
    pub const COMPLETE: &'static str = "complete";
    pub const HEARTBEAT: &'static str = "heartbeat";
    pub const ERROR: &'static str = "error";

    /// `Ok(None)` for event types this client does not know.
    pub fn decode(event: &SseEvent) -> Result<Option<Self>, TransportError> {
        let decoded = match event.event_type.as_deref().unwrap_or(Self::LOG) {
            Self::LOG => StreamEvent::Log(serde_json::from_str(&event.data)?),
            Self::COMPLETE => StreamEvent::Complete(serde_json::from_str(&event.data)?),
            Self::HEARTBEAT => StreamEvent::Heartbeat,
            Self::ERROR => {
                let message = serde_json::from_str::<ErrorPayload>(&event.data)
                    .map(|p| p.error)
                    .unwrap_or_else(|_| event.data.clone());
                StreamEvent::Error(message)
            }
            other => {
                tracing::debug!("Ignoring unknown stream event: {}", other);
                return Ok(None);
            }
        };
        Ok(Some(decoded))
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            StreamEvent::Log(_) => Self::LOG,
            StreamEvent::Complete(_) => Self::COMPLETE,
            StreamEvent::Heartbeat => Self::HEARTBEAT,
            StreamEvent::Error(_) => Self::ERROR,
        }
    }

    /// SSE frame for this event
    pub fn to_sse(&self) -> Result<String, TransportError> {
        let data = match self {
            StreamEvent::Log(log) => serde_json::to_string(log)?,
            StreamEvent::Complete(payload) => serde_json::to_string(payload)?,
            StreamEvent::Heartbeat => serde_json::to_string(&HeartbeatPayload {
                timestamp: Some(Utc::now()),
            })?,
            StreamEvent::Error(error) => serde_json::to_string(&ErrorPayload {
                error: error.clone(),
            })?,
        };
        Ok(format_event(self.event_type(), &data))
    }
}
