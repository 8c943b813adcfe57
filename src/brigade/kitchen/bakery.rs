// SPDX-License-Identifier: MIT

//! Bakery batch workflow
//!
//! A supervisor drives a four-stage bake, retrying whenever a heartbeat is
//! lost or the oven runs cold, then hands off to a finalizer that writes a
//! log-ready reason.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use super::{advise_text, Kitchen};
use crate::adk::error::{BrigadeError, NodeError};
use crate::adk::model::TextGenerator;
use crate::brigade::workflow::config::BakerySettings;
use crate::brigade::workflow::graph::{GraphBuilder, NodeKind, NodeSpec, Work, END, START};
use crate::brigade::workflow::process::{Probe, ProcessReport, StagedProcess, ToleranceBand};
use crate::brigade::workflow::retry::{Attempt, AttemptOutcome, SupervisedWork};
use crate::brigade::workflow::state::{
    FieldType, ReducerType, StateSchema, StateUpdate, WorkflowState,
};
use crate::brigade::workflow::Workflow;

pub const BAKE_STAGES: [&str; 4] = ["preheat", "load", "bake", "finish"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BakeRecord {
    pub item: Option<String>,
    pub target_temp_c: Option<f64>,
    pub batch_size: Option<u64>,
    pub status: Option<String>,
    pub reason: Option<String>,
    pub attempts: Option<u32>,
    pub peak_oven_c: Option<f64>,
    pub stages: Option<Vec<String>>,
    pub last_failure: Option<Value>,
}

impl BakeRecord {
    fn item(&self) -> &str {
        self.item.as_deref().unwrap_or("unnamed item")
    }
}

/// Oven whose core temperature wanders around the setpoint
pub struct SimulatedOven {
    fault_probability: f64,
    latency: Duration,
}

impl SimulatedOven {
    /// A probability outside `[0, 1]` is clamped; NaN means no faults
    pub fn new(fault_probability: f64, latency: Duration) -> Self {
        let fault_probability = if fault_probability.is_nan() {
            0.0
        } else {
            fault_probability.clamp(0.0, 1.0)
        };
        Self {
            fault_probability,
            latency,
        }
    }

    pub fn from_settings(settings: &BakerySettings) -> Self {
        Self::new(
            settings.fault_probability,
            Duration::from_millis(settings.stage_latency_ms),
        )
    }
}

#[async_trait]
impl Probe for SimulatedOven {
    async fn read(&self, _stage: &str, setpoint: f64, _attempt: u32) -> Option<f64> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let mut rng = rand::thread_rng();
        if rng.gen_bool(self.fault_probability) {
            return None;
        }
        Some(rng.gen_range(setpoint - 20.0..=setpoint + 5.0).round())
    }
}

/// One pass through every bake stage
struct BakeAttempt {
    oven: Arc<dyn Probe>,
    tolerance: ToleranceBand,
}

#[async_trait]
impl Attempt for BakeAttempt {
    async fn attempt(&self, state: &WorkflowState, number: u32) -> AttemptOutcome<StateUpdate> {
        let record: BakeRecord = match state.record() {
            Ok(record) => record,
            Err(e) => return AttemptOutcome::Fatal(json!({ "message": e.to_string() })),
        };
        let Some(target) = record.target_temp_c else {
            return AttemptOutcome::Fatal(json!({ "message": "target_temp_c is required" }));
        };

        log::info!("Starting bake attempt #{} for {}", number, record.item());
        let process = StagedProcess::new(
            &BAKE_STAGES,
            target,
            self.oven.clone(),
            Arc::new(self.tolerance),
        );
        let report = process.run(number).await;

        match &report.failed_stage {
            None => AttemptOutcome::Success(
                StateUpdate::new()
                    .set("status", "completed")
                    .set("stages", json!(report.completed))
                    .set("current_stage", BAKE_STAGES[BAKE_STAGES.len() - 1])
                    .set("heartbeats", json!(report.heartbeats))
                    .set("peak_oven_c", json!(report.peak)),
            ),
            Some(stage) => {
                let lost = report
                    .heartbeats
                    .last()
                    .is_some_and(|hb| hb.reading.is_none());
                let message = if lost {
                    format!("heartbeat lost during {}", stage)
                } else {
                    format!("oven below tolerance during {}", stage)
                };
                AttemptOutcome::Retryable(json!({
                    "message": message,
                    "attempt": number,
                    "report": report.to_value(),
                }))
            }
        }
    }

    fn salvage(&self, diagnostic: &Value) -> Option<StateUpdate> {
        let report: ProcessReport =
            serde_json::from_value(diagnostic.get("report")?.clone()).ok()?;
        let mut update = StateUpdate::new().set("heartbeats", json!(report.heartbeats));
        if let Some(peak) = report.peak {
            update.insert("peak_oven_c", peak);
        }
        Some(update)
    }
}

/// Writes the success summary
struct FinalizeSuccess {
    generator: Arc<dyn TextGenerator>,
}

#[async_trait]
impl Work for FinalizeSuccess {
    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, NodeError> {
        let record: BakeRecord = state.record()?;
        let peak = record.peak_oven_c.unwrap_or_default();
        let prompt = format!(
            "Bake completed successfully.\nItem: {}\nBatch size: {}\nPeak oven temp: {}°C\n\
             Provide a concise 1-2 sentence reason/summary for logs.",
            record.item(),
            record.batch_size.unwrap_or_default(),
            peak
        );
        let fallback = format!(
            "{} baked after {} attempt(s), peak oven {}°C.",
            record.item(),
            record.attempts.unwrap_or(1),
            peak
        );
        let reason = advise_text(self.generator.as_ref(), &prompt, fallback).await;
        Ok(StateUpdate::new().set("reason", reason))
    }
}

/// Writes the escalation reason after an aborted or failed bake
struct FinalizeFailure {
    generator: Arc<dyn TextGenerator>,
}

#[async_trait]
impl Work for FinalizeFailure {
    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, NodeError> {
        let record: BakeRecord = state.record()?;
        let prompt = format!(
            "Bake {} after {} attempts.\nItem: {}\nBatch size: {}\nLast failure: {}\n\
             Provide a concise reason suitable for escalation (1-2 sentences).",
            record.status.as_deref().unwrap_or("aborted"),
            record.attempts.unwrap_or_default(),
            record.item(),
            record.batch_size.unwrap_or_default(),
            record.last_failure.clone().unwrap_or(Value::Null)
        );
        let fallback = record
            .reason
            .clone()
            .unwrap_or_else(|| format!("bake of {} did not complete", record.item()));
        let reason = advise_text(self.generator.as_ref(), &prompt, fallback).await;
        Ok(StateUpdate::new().set("reason", reason))
    }
}

fn schema() -> StateSchema {
    StateSchema::new()
        .field("item", FieldType::String)
        .field("target_temp_c", FieldType::Number)
        .field("batch_size", FieldType::Number)
        .field("status", FieldType::String)
        .field("reason", FieldType::String)
        .field("attempts", FieldType::Number)
        .field("attempt_log", FieldType::Array)
        .reduced_field("heartbeats", FieldType::Array, ReducerType::Append)
        .field("stages", FieldType::Array)
        .field("current_stage", FieldType::String)
        .reduced_field("peak_oven_c", FieldType::Number, ReducerType::Max)
        .field("last_failure", FieldType::Object)
}

pub fn build(kitchen: &Kitchen) -> Result<Workflow, BrigadeError> {
    let settings = &kitchen.config.bakery;
    let attempt = Arc::new(BakeAttempt {
        oven: kitchen.oven.clone(),
        tolerance: settings.tolerance,
    });
    let supervised = SupervisedWork::new(attempt, settings.retry.to_policy()?);

    let mut b = GraphBuilder::new();
    b.add_node(
        NodeSpec::new("supervise_bake", NodeKind::Supervisor, Arc::new(supervised))
            .routed_by("status", &["completed", "aborted", "failed"]),
    )
    .add_node(NodeSpec::task(
        "finalize_success",
        Arc::new(FinalizeSuccess {
            generator: kitchen.generator.clone(),
        }),
    ))
    .add_node(NodeSpec::task(
        "finalize_failure",
        Arc::new(FinalizeFailure {
            generator: kitchen.generator.clone(),
        }),
    ))
    .add_edge(START, "supervise_bake")
    .add_route("supervise_bake", "completed", "finalize_success")
    .add_route("supervise_bake", "aborted", "finalize_failure")
    .add_route("supervise_bake", "failed", "finalize_failure")
    .add_edge("finalize_success", END)
    .add_edge("finalize_failure", END);
    if let Some(timeout) = kitchen.config.node_timeout() {
        b.default_timeout(timeout);
    }

    Ok(Workflow::new(
        "bakery",
        "Supervised bake with heartbeat monitoring and bounded retries",
        b.compile()?,
        schema(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brigade::kitchen::testing::{kitchen, QueuedApprover, ScriptedGenerator};
    use crate::brigade::workflow::RunStatus;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Reads the setpoint exactly, except at `cold_stage` on attempts up to
    /// `cold_until`, where it reads 40 degrees low.
    struct ScriptedOven {
        cold_stage: &'static str,
        cold_until: u32,
        reads: AtomicU32,
    }

    impl ScriptedOven {
        fn new(cold_stage: &'static str, cold_until: u32) -> Arc<Self> {
            Arc::new(Self {
                cold_stage,
                cold_until,
                reads: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl Probe for ScriptedOven {
        async fn read(&self, stage: &str, setpoint: f64, attempt: u32) -> Option<f64> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if stage == self.cold_stage && attempt <= self.cold_until {
                Some(setpoint - 40.0)
            } else {
                Some(setpoint)
            }
        }
    }

    fn sample() -> Value {
        json!({"item": "sourdough", "target_temp_c": 230, "batch_size": 12})
    }

    #[tokio::test]
    async fn test_recovers_on_third_attempt() {
        let generator = ScriptedGenerator::new(vec![(
            "completed successfully",
            "Sourdough batch baked on the third try.",
        )]);
        let oven = ScriptedOven::new("load", 2);
        let kitchen = kitchen(generator, QueuedApprover::new(vec![])).with_oven(oven.clone());

        let report = build(&kitchen).unwrap().run(sample()).await;

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.state["attempts"], 3);
        assert_eq!(report.reason, "Sourdough batch baked on the third try.");
        assert_eq!(report.state["stages"], json!(BAKE_STAGES));
        assert_eq!(report.state["peak_oven_c"], 230.0);
        // heartbeats from every attempt, failed ones included
        let heartbeats = report.state["heartbeats"].as_array().unwrap();
        assert_eq!(heartbeats.len(), 8);
        assert_eq!(heartbeats[1]["stage"], "load");
        assert_eq!(heartbeats[1]["ok"], false);
        assert_eq!(heartbeats[7]["stage"], "finish");
        let log = report.state["attempt_log"].as_array().unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0]["outcome"], "retryable_failure");
        assert_eq!(log[2]["outcome"], "success");
        // two stages per failed attempt, four on the last
        assert_eq!(oven.reads.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_aborts_after_max_attempts() {
        let kitchen = kitchen(ScriptedGenerator::offline(), QueuedApprover::new(vec![]))
            .with_oven(ScriptedOven::new("bake", u32::MAX));

        let report = build(&kitchen).unwrap().run(sample()).await;

        assert_eq!(report.status, RunStatus::Aborted);
        assert_eq!(report.state["attempts"], 3);
        assert!(report.reason.contains("aborted after 3 attempts"));
        assert!(report.reason.contains("oven below tolerance during bake"));
        assert_eq!(report.state["last_failure"]["report"]["failed_stage"], "bake");
        assert_eq!(report.state["heartbeats"].as_array().unwrap().len(), 9);
        assert_eq!(report.state["peak_oven_c"], 230.0);
    }

    #[tokio::test]
    async fn test_missing_target_is_fatal() {
        let kitchen = kitchen(ScriptedGenerator::offline(), QueuedApprover::new(vec![]))
            .with_oven(ScriptedOven::new("load", 0));

        let report = build(&kitchen).unwrap().run(json!({"item": "rye"})).await;

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.state["attempts"], 1);
        assert!(report.reason.contains("target_temp_c is required"));
    }

    #[tokio::test]
    async fn test_escalation_reason_from_generator() {
        let generator = ScriptedGenerator::new(vec![(
            "escalation",
            "Oven 2 cannot hold temperature; call maintenance.",
        )]);
        let kitchen = kitchen(generator, QueuedApprover::new(vec![]))
            .with_oven(ScriptedOven::new("preheat", u32::MAX));

        let report = build(&kitchen).unwrap().run(sample()).await;

        assert_eq!(report.status, RunStatus::Aborted);
        assert_eq!(report.reason, "Oven 2 cannot hold temperature; call maintenance.");
    }

    #[tokio::test]
    async fn test_simulated_oven_stays_in_range() {
        let oven = SimulatedOven::new(0.0, Duration::ZERO);
        for _ in 0..50 {
            let reading = oven.read("bake", 230.0, 1).await.unwrap();
            assert!((210.0..=235.0).contains(&reading));
        }

        let dead = SimulatedOven::new(1.0, Duration::ZERO);
        assert_eq!(dead.read("bake", 230.0, 1).await, None);

        let unset = SimulatedOven::new(f64::NAN, Duration::ZERO);
        assert!(unset.read("bake", 230.0, 1).await.is_some());
    }
}
