use crate::sse::{CompletePayload, StreamEvent};
use crate::transport::PushTransport;
use futures::StreamExt;
use graphcore::config::StreamConfig;
use graphcore::{ExecutionLog, ExecutionStatus, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Retrying { attempt: u32, delay: Duration },
    Closed,
}

/// Callbacks of a log stream subscription. Only `on_log` is required.
pub trait StreamHandler: Send + 'static {
    fn on_log(&mut self, log: ExecutionLog);

    fn on_complete(&mut self, _payload: &CompletePayload) {}

    fn on_heartbeat(&mut self) {}

    fn on_state_change(&mut self, _state: ConnectionState) {}

    /// Terminal failure; the stream is closed right after.
    fn on_error(&mut self, _error: &TransportError) {}
}

/// How a subscription ended
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEnd {
    Completed(CompletePayload),
    Failed(TransportError),
    Unsubscribed,
}

impl StreamEnd {
    pub fn status(&self) -> Option<ExecutionStatus> {
        match self {
            StreamEnd::Completed(payload) => Some(payload.status),
            _ => None,
        }
    }
}

/// Everything a handler can observe, as one message
#[derive(Debug, Clone, PartialEq)]
pub enum StreamUpdate {
    Log(ExecutionLog),
    Complete(CompletePayload),
    Heartbeat,
    State(ConnectionState),
    Error(TransportError),
}

/// Forwards every callback into an unbounded channel.
pub struct ChannelHandler {
    sender: mpsc::UnboundedSender<StreamUpdate>,
}

impl ChannelHandler {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StreamUpdate>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn send(&self, update: StreamUpdate) {
        // Receiver gone means nobody is listening any more
        let _ = self.sender.send(update);
    }
}

impl StreamHandler for ChannelHandler {
    fn on_log(&mut self, log: ExecutionLog) {
        self.send(StreamUpdate::Log(log));
    }

    fn on_complete(&mut self, payload: &CompletePayload) {
        self.send(StreamUpdate::Complete(payload.clone()));
    }

    fn on_heartbeat(&mut self) {
        self.send(StreamUpdate::Heartbeat);
    }

    fn on_state_change(&mut self, state: ConnectionState) {
        self.send(StreamUpdate::State(state));
    }

    fn on_error(&mut self, error: &TransportError) {
        self.send(StreamUpdate::Error(error.clone()));
    }
}

/// Live subscription. Dropping it unsubscribes.
pub struct Subscription {
    execution_id: String,
    token: CancellationToken,
    task: Option<JoinHandle<StreamEnd>>,
}

impl Subscription {
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn unsubscribe(&self) {
        self.token.cancel();
    }

    /// Wait for the stream to end on its own (complete, error, retries exhausted).
    pub async fn closed(mut self) -> StreamEnd {
        match self.task.take() {
            Some(task) => task.await.unwrap_or(StreamEnd::Unsubscribed),
            None => StreamEnd::Unsubscribed,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Reconnecting consumer of an execution's log stream
#[derive(Clone)]
pub struct LogStreamClient {
    transport: Arc<dyn PushTransport>,
    config: StreamConfig,
}

impl LogStreamClient {
    pub fn new(transport: Arc<dyn PushTransport>, config: StreamConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn subscribe<H: StreamHandler>(&self, execution_id: &str, handler: H) -> Subscription {
        let token = CancellationToken::new();
        let task = tokio::spawn(run_stream(
            self.transport.clone(),
            self.config.clone(),
            execution_id.to_string(),
            handler,
            token.clone(),
        ));
        Subscription {
            execution_id: execution_id.to_string(),
            token,
            task: Some(task),
        }
    }

    /// Subscribe with a channel handler
    pub fn subscribe_channel(
        &self,
        execution_id: &str,
    ) -> (Subscription, mpsc::UnboundedReceiver<StreamUpdate>) {
        let (handler, updates) = ChannelHandler::channel();
        (self.subscribe(execution_id, handler), updates)
    }
}

async fn run_stream<H: StreamHandler>(
    transport: Arc<dyn PushTransport>,
    config: StreamConfig,
    execution_id: String,
    mut handler: H,
    token: CancellationToken,
) -> StreamEnd {
    let mut attempt: u32 = 0;

    loop {
        handler.on_state_change(ConnectionState::Connecting);
        let connected = tokio::select! {
            _ = token.cancelled() => return close(&mut handler, StreamEnd::Unsubscribed),
            connected = transport.connect(&execution_id) => connected,
        };

        let interruption = match connected {
            Ok(mut events) => {
                attempt = 0;
                handler.on_state_change(ConnectionState::Open);
                tracing::debug!(execution_id = %execution_id, "Log stream open");

                loop {
                    let next = tokio::select! {
                        _ = token.cancelled() => return close(&mut handler, StreamEnd::Unsubscribed),
                        next = events.next() => next,
                    };
                    match next {
                        Some(Ok(StreamEvent::Log(log))) => handler.on_log(log),
                        Some(Ok(StreamEvent::Heartbeat)) => handler.on_heartbeat(),
                        Some(Ok(StreamEvent::Complete(payload))) => {
                            handler.on_complete(&payload);
                            return close(&mut handler, StreamEnd::Completed(payload));
                        }
                        Some(Ok(StreamEvent::Error(message))) => {
                            let error = TransportError::Server(message);
                            tracing::warn!(execution_id = %execution_id, "Log stream error: {}", error);
                            handler.on_error(&error);
                            return close(&mut handler, StreamEnd::Failed(error));
                        }
                        Some(Err(TransportError::Decode(message))) => {
                            tracing::warn!(execution_id = %execution_id, "Dropping malformed event: {}", message);
                        }
                        Some(Err(e)) => break e,
                        None => break TransportError::Closed,
                    }
                }
            }
            Err(e) => e,
        };

        attempt += 1;
        if attempt > config.max_attempts {
            let error = TransportError::RetriesExhausted {
                attempts: config.max_attempts,
            };
            tracing::warn!(execution_id = %execution_id, "Log stream giving up: {}", interruption);
            handler.on_error(&error);
            return close(&mut handler, StreamEnd::Failed(error));
        }

        let delay = config.backoff(attempt);
        tracing::warn!(
            execution_id = %execution_id,
            "Log stream interrupted ({}), reconnecting in {:?} (attempt {}/{})",
            interruption,
            delay,
            attempt,
            config.max_attempts
        );
        handler.on_state_change(ConnectionState::Retrying { attempt, delay });

        tokio::select! {
            _ = token.cancelled() => return close(&mut handler, StreamEnd::Unsubscribed),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

fn close<H: StreamHandler>(handler: &mut H, end: StreamEnd) -> StreamEnd {
    handler.on_state_change(ConnectionState::Closed);
    end
}
