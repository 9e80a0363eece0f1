use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use graphcore::config::StreamConfig;
use graphcore::{ExecutionLog, ExecutionStatus, TransportError};
use graphstream::{
    CompletePayload, ConnectionState, EventStream, LogBuffer, LogStreamClient, PushTransport,
    StreamEnd, StreamEvent, StreamUpdate,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// One scripted answer to `connect`
enum Script {
    Refuse(TransportError),
    /// Yields the events, then ends (an unexpected close)
    Events(Vec<Result<StreamEvent, TransportError>>),
    /// Yields the events, then stays open forever
    Hang(Vec<Result<StreamEvent, TransportError>>),
}

/// Push transport that plays back a queue of connections.
/// Once the queue is empty every connect is refused.
struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    connects: AtomicUsize,
}

impl ScriptedTransport {
    fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            connects: AtomicUsize::new(0),
        })
    }

    fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushTransport for ScriptedTransport {
    async fn connect(&self, _execution_id: &str) -> Result<EventStream, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let next = self.scripts.lock().unwrap().pop_front();
        match next {
            Some(Script::Refuse(error)) => Err(error),
            Some(Script::Events(events)) => Ok(stream::iter(events).boxed()),
            Some(Script::Hang(events)) => Ok(stream::iter(events).chain(stream::pending()).boxed()),
            None => Err(TransportError::Request("connection refused".into())),
        }
    }
}

fn create_test_client(transport: Arc<ScriptedTransport>, max_attempts: u32) -> LogStreamClient {
    LogStreamClient::new(
        transport,
        StreamConfig {
            base_delay_ms: 1,
            max_attempts,
        },
    )
}

fn log(message: &str) -> ExecutionLog {
    ExecutionLog::info(message)
}

fn complete() -> StreamEvent {
    StreamEvent::Complete(CompletePayload {
        status: ExecutionStatus::Completed,
        duration_seconds: Some(1.2),
    })
}

fn refused() -> Script {
    Script::Refuse(TransportError::Request("connection refused".into()))
}

async fn drain(mut updates: UnboundedReceiver<StreamUpdate>) -> Vec<StreamUpdate> {
    let mut seen = Vec::new();
    while let Some(update) = updates.recv().await {
        seen.push(update);
    }
    seen
}

fn logs_of(updates: &[StreamUpdate]) -> Vec<ExecutionLog> {
    updates
        .iter()
        .filter_map(|u| match u {
            StreamUpdate::Log(log) => Some(log.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_reconnect_resets_attempts_and_dedupes_replay() {
    let first = log("Workflow execution started");
    let second = log("Starting node: Query");
    let transport = ScriptedTransport::new(vec![
        refused(),
        refused(),
        Script::Events(vec![Ok(StreamEvent::Log(first.clone()))]),
        refused(),
        Script::Events(vec![
            Ok(StreamEvent::Log(first.clone())),
            Ok(StreamEvent::Log(second.clone())),
            Ok(complete()),
        ]),
    ]);
    let client = create_test_client(transport.clone(), 2);

    let (subscription, updates) = client.subscribe_channel("exec-1");
    let end = subscription.closed().await;
    let updates = drain(updates).await;

    // Four failures in total, never more than two in a row
    assert_eq!(end.status(), Some(ExecutionStatus::Completed));
    assert_eq!(transport.connects(), 5);
    let retries: Vec<u32> = updates
        .iter()
        .filter_map(|u| match u {
            StreamUpdate::State(ConnectionState::Retrying { attempt, .. }) => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(retries, vec![1, 2, 1, 2]);

    let mut buffer = LogBuffer::new();
    assert_eq!(buffer.extend(logs_of(&updates)), 2);
    assert_eq!(buffer.all()[1].message, second.message);
}

#[tokio::test]
async fn test_retries_exhausted_after_max_attempts() {
    let transport = ScriptedTransport::new(vec![]);
    let client = create_test_client(transport.clone(), 3);

    let (subscription, updates) = client.subscribe_channel("exec-1");
    let end = subscription.closed().await;
    let updates = drain(updates).await;

    assert_eq!(
        end,
        StreamEnd::Failed(TransportError::RetriesExhausted { attempts: 3 })
    );
    assert_eq!(transport.connects(), 4, "initial connect plus three retries");
    assert!(updates
        .iter()
        .any(|u| matches!(u, StreamUpdate::Error(TransportError::RetriesExhausted { .. }))));
    assert_eq!(
        updates.last(),
        Some(&StreamUpdate::State(ConnectionState::Closed))
    );

    // No automatic reconnect after giving up
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(transport.connects(), 4);
}

#[tokio::test]
async fn test_backoff_grows_with_attempt() {
    let transport = ScriptedTransport::new(vec![]);
    let client = LogStreamClient::new(
        transport,
        StreamConfig {
            base_delay_ms: 5,
            max_attempts: 3,
        },
    );

    let (subscription, updates) = client.subscribe_channel("exec-1");
    subscription.closed().await;
    let delays: Vec<Duration> = drain(updates)
        .await
        .iter()
        .filter_map(|u| match u {
            StreamUpdate::State(ConnectionState::Retrying { delay, .. }) => Some(*delay),
            _ => None,
        })
        .collect();
    assert_eq!(
        delays,
        vec![
            Duration::from_millis(5),
            Duration::from_millis(10),
            Duration::from_millis(15)
        ]
    );
}

#[tokio::test]
async fn test_complete_event_closes_stream() {
    let done = log("Workflow execution completed");
    let transport = ScriptedTransport::new(vec![
        Script::Hang(vec![
            Ok(StreamEvent::Heartbeat),
            Ok(StreamEvent::Log(done.clone())),
            Ok(complete()),
        ]),
        Script::Events(vec![Ok(StreamEvent::Log(log("never read")))]),
    ]);
    let client = create_test_client(transport.clone(), 5);

    let (subscription, updates) = client.subscribe_channel("exec-1");
    let end = subscription.closed().await;
    let updates = drain(updates).await;

    assert!(matches!(end, StreamEnd::Completed(_)));
    assert_eq!(transport.connects(), 1);
    assert_eq!(
        updates,
        vec![
            StreamUpdate::State(ConnectionState::Connecting),
            StreamUpdate::State(ConnectionState::Open),
            StreamUpdate::Heartbeat,
            StreamUpdate::Log(done),
            StreamUpdate::Complete(CompletePayload {
                status: ExecutionStatus::Completed,
                duration_seconds: Some(1.2),
            }),
            StreamUpdate::State(ConnectionState::Closed),
        ]
    );
}

#[tokio::test]
async fn test_server_error_event_closes_stream() {
    let transport = ScriptedTransport::new(vec![
        Script::Hang(vec![
            Ok(StreamEvent::Log(log("Starting node: LLM"))),
            Ok(StreamEvent::Error("execution not found".into())),
        ]),
        Script::Hang(vec![]),
    ]);
    let client = create_test_client(transport.clone(), 5);

    let (subscription, updates) = client.subscribe_channel("exec-1");
    let end = subscription.closed().await;
    let updates = drain(updates).await;

    assert_eq!(
        end,
        StreamEnd::Failed(TransportError::Server("execution not found".into()))
    );
    assert_eq!(transport.connects(), 1, "a server error is not retried");
    assert_eq!(logs_of(&updates).len(), 1);
}

#[tokio::test]
async fn test_malformed_event_is_skipped() {
    let transport = ScriptedTransport::new(vec![Script::Events(vec![
        Err(TransportError::Decode("expected value at line 1".into())),
        Ok(StreamEvent::Log(log("after garbage"))),
        Ok(complete()),
    ])]);
    let client = create_test_client(transport.clone(), 1);

    let (subscription, updates) = client.subscribe_channel("exec-1");
    let end = subscription.closed().await;
    let updates = drain(updates).await;

    assert!(matches!(end, StreamEnd::Completed(_)));
    assert_eq!(transport.connects(), 1);
    assert_eq!(logs_of(&updates)[0].message, "after garbage");
}

#[tokio::test]
async fn test_unsubscribe_stops_open_stream() {
    let transport = ScriptedTransport::new(vec![Script::Hang(vec![Ok(StreamEvent::Log(log(
        "Starting node: Query",
    )))])]);
    let client = create_test_client(transport.clone(), 5);

    let (subscription, mut updates) = client.subscribe_channel("exec-1");
    assert_eq!(subscription.execution_id(), "exec-1");
    loop {
        match updates.recv().await {
            Some(StreamUpdate::Log(_)) => break,
            Some(_) => continue,
            None => panic!("stream ended before the first log"),
        }
    }

    subscription.unsubscribe();
    assert_eq!(subscription.closed().await, StreamEnd::Unsubscribed);
    assert_eq!(
        drain(updates).await,
        vec![StreamUpdate::State(ConnectionState::Closed)]
    );
    assert_eq!(transport.connects(), 1);
}

#[tokio::test]
async fn test_drop_unsubscribes_during_backoff() {
    let transport = ScriptedTransport::new(vec![]);
    let client = LogStreamClient::new(
        transport.clone(),
        StreamConfig {
            base_delay_ms: 10_000,
            max_attempts: 5,
        },
    );

    let (subscription, updates) = client.subscribe_channel("exec-1");
    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(subscription);

    let updates = tokio::time::timeout(Duration::from_secs(2), drain(updates))
        .await
        .expect("stream task should stop when the subscription is dropped");
    assert_eq!(updates.last(), Some(&StreamUpdate::State(ConnectionState::Closed)));
    assert_eq!(transport.connects(), 1);
}
