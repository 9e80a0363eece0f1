use crate::sse::{SseParser, StreamEvent};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use graphcore::TransportError;
use std::collections::VecDeque;
use std::time::Duration;

pub type EventStream = BoxStream<'static, Result<StreamEvent, TransportError>>;

/// A push channel of stream events keyed by execution id.
///
/// The stream ending, or yielding a non-decode error, counts as an
/// unexpected close.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn connect(&self, execution_id: &str) -> Result<EventStream, TransportError>;
}

/// SSE over HTTP: `GET {base}/api/executions/{id}/stream`
pub struct HttpPushTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPushTransport {
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn stream_url(&self, execution_id: &str) -> String {
        format!("{}/api/executions/{}/stream", self.base_url, execution_id)
    }
}

#[async_trait]
impl PushTransport for HttpPushTransport {
    async fn connect(&self, execution_id: &str) -> Result<EventStream, TransportError> {
        let url = self.stream_url(execution_id);
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = Box::pin(response.bytes_stream());
        let events = stream::unfold(
            (bytes, SseParser::new(), VecDeque::new()),
            |(mut bytes, mut parser, mut pending)| async move {
                loop {
                    if let Some(event) = pending.pop_front() {
                        return Some((event, (bytes, parser, pending)));
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => {
                            for raw in parser.feed(&chunk) {
                                match StreamEvent::decode(&raw) {
                                    Ok(Some(event)) => pending.push_back(Ok(event)),
                                    Ok(None) => {}
                                    Err(e) => pending.push_back(Err(e)),
                                }
                            }
                        }
                        Some(Err(e)) => {
                            let error = TransportError::Request(e.to_string());
                            return Some((Err(error), (bytes, parser, pending)));
                        }
                        None => return None,
                    }
                }
            },
        );

        Ok(events.boxed())
    }
}
