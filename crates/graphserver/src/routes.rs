use crate::runs::RunHandle;
use crate::AppState;
use actix_web::{get, post, web, HttpRequest, HttpResponse, Responder, Result as ActixResult};
use actix_ws::Message;
use graphcore::{LogPage, LogQuery, RunRequest};
use graphruntime::RunOptions;
use graphstream::SubmitResponse;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Error response
#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    error: String,
}

pub(crate) fn not_found(execution_id: &str) -> HttpResponse {
    HttpResponse::NotFound().json(ErrorResponse {
        error: format!("Execution {} not found", execution_id),
    })
}

/// Health check endpoint
#[get("/health")]
pub(crate) async fn health_check(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "graphrun",
        "executor": data.runtime.executor().name(),
        "runs": data.runs.len().await,
    }))
}

/// Validate a run request and start it in the background
#[post("/api/executions")]
pub(crate) async fn submit_execution(
    data: web::Data<AppState>,
    request: web::Json<RunRequest>,
) -> ActixResult<impl Responder> {
    let request = request.into_inner();

    if let Err(e) = data.runtime.validate(&request) {
        warn!("Rejected workflow {}: {}", request.graph.id, e);
        return Ok(HttpResponse::UnprocessableEntity().json(ErrorResponse {
            error: e.to_string(),
        }));
    }

    let execution_id = Uuid::new_v4().to_string();
    let cancellation = CancellationToken::new();
    let mut store = data.runtime.new_store();
    data.runs
        .insert(
            execution_id.clone(),
            RunHandle {
                reader: store.reader(),
                cancellation: cancellation.clone(),
            },
        )
        .await;

    info!(
        execution_id = %execution_id,
        "Starting workflow {} ({} nodes)",
        request.graph.id,
        request.graph.nodes.len()
    );

    let runtime = data.runtime.clone();
    let options = RunOptions {
        execution_id: Some(execution_id.clone()),
        cancellation: Some(cancellation),
    };
    actix_web::rt::spawn(async move {
        let outcome = runtime
            .execute_with_options(&mut store, request, options)
            .await;
        let id = outcome.execution_id().unwrap_or_default().to_string();
        match outcome.error() {
            None => info!(execution_id = %id, "Workflow run finished"),
            Some(e) if e.is_cancelled() => info!(execution_id = %id, "Workflow run cancelled"),
            Some(e) => error!(execution_id = %id, "Workflow run failed: {}", e),
        }
    });

    Ok(HttpResponse::Accepted().json(SubmitResponse { execution_id }))
}

#[post("/api/executions/{id}/cancel")]
pub(crate) async fn cancel_execution(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<impl Responder> {
    let execution_id = path.into_inner();
    let Some(handle) = data.runs.get(&execution_id).await else {
        return Ok(not_found(&execution_id));
    };

    let cancelled = !handle.is_finished();
    if cancelled {
        info!(execution_id = %execution_id, "Cancelling execution");
        handle.cancellation.cancel();
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "executionId": execution_id,
        "cancelled": cancelled,
    })))
}

#[get("/api/executions/{id}/status")]
pub(crate) async fn execution_status(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<impl Responder> {
    let execution_id = path.into_inner();
    match data.runs.execution(&execution_id).await {
        Some(execution) => Ok(HttpResponse::Ok().json(execution.status_report())),
        None => Ok(not_found(&execution_id)),
    }
}

/// Paginated log history
#[get("/api/executions/{id}/logs")]
pub(crate) async fn execution_logs(
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<LogQuery>,
) -> ActixResult<impl Responder> {
    let execution_id = path.into_inner();
    match data.runs.execution(&execution_id).await {
        Some(execution) => Ok(HttpResponse::Ok().json(LogPage::paginate(&execution.logs, &query))),
        None => Ok(not_found(&execution_id)),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EventsQuery {
    execution_id: Option<String>,
}

/// WebSocket endpoint for real-time execution events
#[get("/api/events")]
pub(crate) async fn websocket_events(
    req: HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
    query: web::Query<EventsQuery>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;
    let only = query.into_inner().execution_id;

    info!("WebSocket client connected");

    let mut events = data.runtime.subscribe_events();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if only.as_deref().map_or(false, |id| id != event.execution_id()) {
                                continue;
                            }
                            if let Ok(json) = serde_json::to_string(&event) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("WebSocket client lagged, {} events dropped", skipped);
                        }
                        Err(_) => break,
                    }
                }

                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        info!("WebSocket client disconnected");
        let _ = session.close(None).await;
    });

    Ok(res)
}

/// List available node kinds
#[get("/api/nodes")]
pub(crate) async fn list_node_types(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let nodes: Vec<_> = data
        .registry
        .list_kinds()
        .into_iter()
        .map(|kind| {
            let metadata = data.registry.get_metadata(kind).unwrap_or_default();
            serde_json::json!({
                "type": kind.as_str(),
                "critical": kind.is_critical(),
                "description": metadata.description,
                "category": metadata.category,
                "inputs": metadata.inputs,
                "outputs": metadata.outputs,
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(nodes))
}

/// Prometheus metrics endpoint
#[get("/metrics")]
pub(crate) async fn prometheus_metrics(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4; charset=utf-8")
        .body(data.metrics.render())
}
