// SPDX-License-Identifier: MIT

//! Workflow runs
//!
//! A `Workflow` pairs a compiled graph with its state schema. Running it
//! always yields a `RunReport`: engine errors are folded into a `failed`
//! report that keeps the state reached so far.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::graph::{Executor, Graph, RunEvent};
use super::state::{StateSchema, StateUpdate, WorkflowState};

/// Closed set of run outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
    Aborted,
    Approved,
    NeedsRevision,
    Unsupported,
}

impl RunStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "aborted" => Some(Self::Aborted),
            "approved" => Some(Self::Approved),
            "needs_revision" => Some(Self::NeedsRevision),
            "unsupported" => Some(Self::Unsupported),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
            Self::Approved => "approved",
            Self::NeedsRevision => "needs_revision",
            Self::Unsupported => "unsupported",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub workflow: String,
    pub status: RunStatus,
    pub reason: String,
    pub state: Value,
}

pub struct Workflow {
    pub name: String,
    pub description: String,
    graph: Graph,
    schema: Arc<StateSchema>,
}

impl Workflow {
    pub fn new(name: &str, description: &str, graph: Graph, schema: StateSchema) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            graph,
            schema: Arc::new(schema),
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn schema(&self) -> &Arc<StateSchema> {
        &self.schema
    }

    /// Run to completion
    pub async fn run(&self, input: Value) -> RunReport {
        self.execute(input, None).await
    }

    /// Run to completion, publishing progress on `events`
    pub async fn run_with_events(&self, input: Value, events: mpsc::Sender<RunEvent>) -> RunReport {
        self.execute(input, Some(events)).await
    }

    async fn execute(&self, input: Value, events: Option<mpsc::Sender<RunEvent>>) -> RunReport {
        let run_id = Uuid::new_v4();
        log::info!("Starting run {} of workflow '{}'", run_id, self.name);

        let initial = match WorkflowState::from_input(self.schema.clone(), input.clone()) {
            Ok(state) => state,
            Err(e) => {
                log::error!("Run {} rejected its input: {}", run_id, e);
                if let Some(tx) = &events {
                    let _ = tx
                        .send(RunEvent::RunFailed {
                            error: e.to_string(),
                        })
                        .await;
                }
                let mut state = json!({ "input": input });
                state["status"] = json!("failed");
                state["reason"] = json!(e.to_string());
                return RunReport {
                    run_id,
                    workflow: self.name.clone(),
                    status: RunStatus::Failed,
                    reason: e.to_string(),
                    state,
                };
            }
        };

        let mut executor = Executor::new(&self.graph);
        if let Some(tx) = events {
            executor = executor.with_events(tx);
        }

        let report = match executor.run(initial).await {
            Ok(state) => self.report(run_id, state),
            Err(halted) => {
                let reason = halted.error.to_string();
                let mut state = halted.state;
                let failure = StateUpdate::new()
                    .set("status", RunStatus::Failed.as_str())
                    .set("reason", reason.clone());
                if let Err(e) = state.apply(&failure, "__run__") {
                    log::warn!("Could not record failure in state: {}", e);
                }
                RunReport {
                    run_id,
                    workflow: self.name.clone(),
                    status: RunStatus::Failed,
                    reason,
                    state: state.to_json(),
                }
            }
        };

        log::info!(
            "Run {} of '{}' finished: {}",
            run_id,
            self.name,
            report.status.as_str()
        );
        report
    }

    /// Derive status and reason from the final state
    fn report(&self, run_id: Uuid, mut state: WorkflowState) -> RunReport {
        let status = state
            .get_str("status")
            .and_then(RunStatus::parse)
            .unwrap_or(RunStatus::Completed);
        let reason = state
            .get_str("reason")
            .or_else(|| state.get_str("notes"))
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("workflow {}", status.as_str()));

        let stamp = StateUpdate::new()
            .set("status", status.as_str())
            .set("reason", reason.clone());
        if let Err(e) = state.apply(&stamp, "__run__") {
            log::warn!("Could not record outcome in state: {}", e);
        }

        RunReport {
            run_id,
            workflow: self.name.clone(),
            status,
            reason,
            state: state.to_json(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adk::error::NodeError;
    use crate::brigade::workflow::graph::{work_fn, GraphBuilder, NodeSpec, END, START};
    use crate::brigade::workflow::state::FieldType;

    fn single_node(work: Arc<dyn crate::brigade::workflow::graph::Work>) -> Graph {
        let mut b = GraphBuilder::new();
        b.add_node(NodeSpec::task("only", work))
            .add_edge(START, "only")
            .add_edge("only", END);
        b.compile().unwrap()
    }

    #[test]
    fn test_status_round_trip() {
        for s in ["completed", "failed", "aborted", "approved", "needs_revision", "unsupported"] {
            assert_eq!(RunStatus::parse(s).unwrap().as_str(), s);
        }
        assert!(RunStatus::parse("pending").is_none());
        assert_eq!(
            serde_json::to_value(RunStatus::NeedsRevision).unwrap(),
            json!("needs_revision")
        );
    }

    #[tokio::test]
    async fn test_default_status_is_completed() {
        let wf = Workflow::new(
            "plain",
            "",
            single_node(work_fn(|_| Ok(StateUpdate::new().set("x", 1)))),
            StateSchema::default(),
        );
        let report = wf.run(json!({})).await;
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.reason, "workflow completed");
        assert_eq!(report.state["status"], "completed");
        assert_eq!(report.state["x"], 1);
    }

    #[tokio::test]
    async fn test_status_and_notes_from_state() {
        let wf = Workflow::new(
            "router",
            "",
            single_node(work_fn(|_| {
                Ok(StateUpdate::new()
                    .set("status", "unsupported")
                    .set("notes", "Unsupported order type: drone"))
            })),
            StateSchema::default(),
        );
        let report = wf.run(json!({})).await;
        assert_eq!(report.status, RunStatus::Unsupported);
        assert_eq!(report.reason, "Unsupported order type: drone");
    }

    #[tokio::test]
    async fn test_engine_error_becomes_failed_report() {
        let wf = Workflow::new(
            "broken",
            "",
            single_node(work_fn(|_| Err(NodeError::fatal("oven exploded")))),
            StateSchema::default(),
        );
        let report = wf.run(json!({"item": "rye"})).await;
        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.reason.contains("only"));
        assert!(report.reason.contains("oven exploded"));
        assert_eq!(report.state["status"], "failed");
        assert_eq!(report.state["item"], "rye");
    }

    #[tokio::test]
    async fn test_bad_input_becomes_failed_report() {
        let wf = Workflow::new(
            "typed",
            "",
            single_node(work_fn(|_| Ok(StateUpdate::new()))),
            StateSchema::new().field("headcount", FieldType::Number),
        );
        let report = wf.run(json!({"headcount": "lots"})).await;
        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.reason.contains("headcount"));

        let report = wf.run(json!("not an object")).await;
        assert_eq!(report.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_events_are_published() {
        let wf = Workflow::new(
            "evented",
            "",
            single_node(work_fn(|_| Ok(StateUpdate::new()))),
            StateSchema::default(),
        );
        let (tx, mut rx) = mpsc::channel(16);
        let report = wf.run_with_events(json!({}), tx).await;
        assert_eq!(report.status, RunStatus::Completed);

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(serde_json::to_value(&event).unwrap()["event"].clone());
        }
        assert_eq!(
            kinds,
            vec![json!("node_started"), json!("node_completed"), json!("run_finished")]
        );
    }
}
