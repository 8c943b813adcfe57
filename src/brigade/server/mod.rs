// SPDX-License-Identifier: MIT

//! HTTP service for kitchen workflows
//!
//! Runs workflows on request and exposes pending approval gates so a
//! manager can answer them from another client while the run waits.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::adk::approval::{parse_verdict, ApprovalBroker, ApprovalRequest, Decision};
use crate::adk::error::BrigadeError;
use crate::brigade::kitchen::{self, Kitchen, WORKFLOWS};
use crate::brigade::workflow::{RunReport, Workflow};

type ApiError = (StatusCode, Json<Value>);

#[derive(Clone)]
pub struct AppState {
    kitchen: Arc<Kitchen>,
    broker: Arc<ApprovalBroker>,
}

impl AppState {
    /// `kitchen` should use `broker` as its approver so gates surface here
    pub fn new(kitchen: Kitchen, broker: Arc<ApprovalBroker>) -> Self {
        Self {
            kitchen: Arc::new(kitchen),
            broker,
        }
    }

    fn workflow(&self, name: &str) -> Result<Workflow, ApiError> {
        kitchen::build(name, &self.kitchen).map_err(|e| match e {
            BrigadeError::WorkflowNotFound { .. } => error(StatusCode::NOT_FOUND, e),
            other => error(StatusCode::INTERNAL_SERVER_ERROR, other),
        })
    }
}

fn error(status: StatusCode, e: impl std::fmt::Display) -> ApiError {
    (status, Json(json!({ "error": e.to_string() })))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/workflows", get(list_workflows))
        .route("/api/runs", post(create_run))
        .route("/api/runs/stream", post(stream_run))
        .route("/api/approvals", get(list_approvals))
        .route("/api/approvals/{id}", post(answer_approval))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(port: u16, state: AppState) -> Result<(), BrigadeError> {
    let app = router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    log::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_workflows(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let mut workflows = Vec::new();
    for name in WORKFLOWS {
        let workflow = state.workflow(name)?;
        let nodes: Vec<&str> = workflow
            .graph()
            .nodes()
            .iter()
            .map(|n| n.id.as_str())
            .collect();
        workflows.push(json!({
            "name": name,
            "description": workflow.description,
            "nodes": nodes,
            "sample_input": kitchen::sample_input(name),
        }));
    }
    Ok(Json(json!(workflows)))
}

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub workflow: String,
    /// Defaults to the workflow's sample request
    #[serde(default)]
    pub input: Option<Value>,
}

impl RunRequest {
    fn input(&self) -> Value {
        self.input
            .clone()
            .or_else(|| kitchen::sample_input(&self.workflow))
            .unwrap_or_else(|| json!({}))
    }
}

async fn create_run(
    State(state): State<AppState>,
    Json(payload): Json<RunRequest>,
) -> Result<Json<RunReport>, ApiError> {
    let workflow = state.workflow(&payload.workflow)?;
    Ok(Json(workflow.run(payload.input()).await))
}

fn sse_event<T: Serialize>(name: &str, payload: &T) -> Event {
    Event::default()
        .event(name)
        .json_data(payload)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

async fn stream_run(
    State(state): State<AppState>,
    Json(payload): Json<RunRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let workflow = state.workflow(&payload.workflow)?;
    let input = payload.input();
    let (tx, rx) = mpsc::channel(100);

    tokio::spawn(async move {
        log::info!("Starting streaming run of {}", workflow.name);
        let (events_tx, mut events_rx) = mpsc::channel(100);

        let forward = {
            let tx = tx.clone();
            tokio::spawn(async move {
                while let Some(event) = events_rx.recv().await {
                    if tx.send(sse_event("run_event", &event)).await.is_err() {
                        log::warn!("Stream client went away");
                        break;
                    }
                }
            })
        };

        let report = workflow.run_with_events(input, events_tx).await;
        let _ = forward.await;
        let _ = tx.send(sse_event("report", &report)).await;
    });

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(1))))
}

async fn list_approvals(State(state): State<AppState>) -> Json<Vec<ApprovalRequest>> {
    Json(state.broker.pending_requests().await)
}

#[derive(Debug, Deserialize)]
pub struct ApprovalAnswer {
    pub decision: String,
    #[serde(default)]
    pub rationale: String,
}

async fn answer_approval(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(answer): Json<ApprovalAnswer>,
) -> Result<Json<Value>, ApiError> {
    let verdict = parse_verdict(&answer.decision).ok_or_else(|| {
        error(
            StatusCode::BAD_REQUEST,
            format!("unrecognised decision '{}'", answer.decision),
        )
    })?;
    let decision = Decision {
        verdict,
        rationale: answer.rationale,
    };

    if !state.broker.respond(&id, decision).await {
        return Err(error(
            StatusCode::NOT_FOUND,
            format!("no pending approval {}", id),
        ));
    }
    log::info!("Approval {} answered: {}", id, verdict.as_str());
    Ok(Json(json!({ "id": id, "decision": verdict.as_str() })))
}
