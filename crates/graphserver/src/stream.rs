use crate::routes::not_found;
use crate::AppState;
use actix_web::web::Bytes;
use actix_web::{get, web, HttpResponse, Result as ActixResult};
use futures::stream;
use graphcore::{ExecutionEvent, ExecutionStatus};
use graphruntime::StoreReader;
use graphstream::{CompletePayload, StreamEvent};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval_at, Instant};
use tracing::{debug, warn};

/// Server-sent log stream of one execution.
///
/// Replays the logs recorded so far, then follows the event bus until the
/// execution finishes. A heartbeat goes out on every quiet interval.
#[get("/api/executions/{id}/stream")]
pub(crate) async fn stream_execution_logs(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<HttpResponse> {
    let execution_id = path.into_inner();
    let Some(handle) = data.runs.get(&execution_id).await else {
        return Ok(not_found(&execution_id));
    };

    let (sender, receiver) = mpsc::channel::<Bytes>(64);
    let pump = LogPump {
        execution_id,
        reader: handle.reader,
        sender,
        seen: HashSet::new(),
    };
    actix_web::rt::spawn(pump.run(data.heartbeat));

    let body = stream::unfold(receiver, |mut receiver| async move {
        receiver
            .recv()
            .await
            .map(|frame| (Ok::<_, actix_web::Error>(frame), receiver))
    });

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .insert_header(("X-Accel-Buffering", "no"))
        .streaming(body))
}

enum Flow {
    Continue,
    Stop,
}

struct LogPump {
    execution_id: String,
    reader: StoreReader,
    sender: mpsc::Sender<Bytes>,
    seen: HashSet<String>,
}

impl LogPump {
    async fn run(mut self, heartbeat: Duration) {
        // Subscribe before the replay so nothing falls between the two
        let mut events = self.reader.subscribe();
        if let Flow::Stop = self.catch_up().await {
            return;
        }

        let mut ticker = interval_at(Instant::now() + heartbeat, heartbeat);
        loop {
            let flow = tokio::select! {
                _ = ticker.tick() => self.send(&StreamEvent::Heartbeat).await,
                received = events.recv() => match received {
                    Ok(event) if event.execution_id() != self.execution_id => Flow::Continue,
                    Ok(ExecutionEvent::LogAppended { log, .. }) => {
                        ticker.reset();
                        if self.seen.insert(log.id.clone()) {
                            self.send(&StreamEvent::Log(log)).await
                        } else {
                            Flow::Continue
                        }
                    }
                    Ok(ExecutionEvent::ExecutionFinished { status, duration_ms, .. }) => {
                        self.complete(status, Some(duration_ms)).await;
                        Flow::Stop
                    }
                    Ok(_) => Flow::Continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(execution_id = %self.execution_id, "Log stream lagged by {} events, replaying", skipped);
                        self.catch_up().await
                    }
                    Err(broadcast::error::RecvError::Closed) => Flow::Stop,
                },
            };
            if let Flow::Stop = flow {
                break;
            }
        }
        debug!(execution_id = %self.execution_id, "Log stream closed");
    }

    /// Send every recorded log not sent yet; stop if the run is over.
    async fn catch_up(&mut self) -> Flow {
        let Some(execution) = self.reader.find(&self.execution_id) else {
            return Flow::Continue;
        };
        for log in execution.logs {
            if self.seen.insert(log.id.clone()) {
                if let Flow::Stop = self.send(&StreamEvent::Log(log)).await {
                    return Flow::Stop;
                }
            }
        }
        if execution.status.is_terminal() {
            self.complete(execution.status, execution.duration_ms).await;
            return Flow::Stop;
        }
        Flow::Continue
    }

    async fn complete(&self, status: ExecutionStatus, duration_ms: Option<u64>) {
        let payload = CompletePayload {
            status,
            duration_seconds: duration_ms.map(|ms| ms as f64 / 1000.0),
        };
        self.send(&StreamEvent::Complete(payload)).await;
    }

    async fn send(&self, event: &StreamEvent) -> Flow {
        let frame = match event.to_sse() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(execution_id = %self.execution_id, "Failed to encode {} event: {}", event.event_type(), e);
                return Flow::Continue;
            }
        };
        match self.sender.send(Bytes::from(frame)).await {
            Ok(()) => Flow::Continue,
            // client went away
            Err(_) => Flow::Stop,
        }
    }
}
