// SPDX-License-Identifier: MIT

//! Catering quote workflow
//!
//! Capacity and ingredient checks run side by side once the event's
//! complexity is known. Their join routes to a price tier, and the drafted
//! quote waits at a manager gate before it is finalized.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

use super::{advise_json, Kitchen};
use crate::adk::approval::Decision;
use crate::adk::error::{BrigadeError, NodeError};
use crate::adk::model::TextGenerator;
use crate::brigade::workflow::gate::{Gate, APPROVED, NEEDS_REVISION};
use crate::brigade::workflow::graph::{
    work_fn, GraphBuilder, NodeSpec, Passthrough, Work, END, START,
};
use crate::brigade::workflow::state::{FieldType, StateSchema, StateUpdate, WorkflowState};
use crate::brigade::workflow::Workflow;

/// Dishes the kitchen can source
static ALLOWED_MENU: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "grilled chicken",
        "pasta",
        "salad",
        "dessert",
        "paneer tikka",
        "naan",
        "butter chicken",
        "steak",
        "lobster",
        "premium cake",
    ]
    .into_iter()
    .collect()
});

const PREMIUM_ITEMS: [&str; 3] = ["lobster", "steak", "premium cake"];

const DEFAULT_REASON: &str = "manager requested changes";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CateringRecord {
    pub event_date: Option<String>,
    pub headcount: Option<u64>,
    pub menu: Option<Vec<String>>,
    pub complexity: Option<String>,
    pub capacity_ok: Option<bool>,
    pub ingredients_ok: Option<bool>,
    pub quote: Option<Map<String, Value>>,
    pub status: Option<String>,
    pub reason: Option<String>,
}

impl CateringRecord {
    fn headcount(&self) -> u64 {
        self.headcount.unwrap_or(0)
    }

    fn menu(&self) -> &[String] {
        self.menu.as_deref().unwrap_or(&[])
    }
}

pub fn complexity(headcount: u64, menu: &[String]) -> &'static str {
    let premium = menu
        .iter()
        .any(|item| PREMIUM_ITEMS.contains(&item.to_lowercase().as_str()));
    if headcount > 120 || premium {
        "high"
    } else if headcount > 60 {
        "medium"
    } else {
        "low"
    }
}

/// Largest party each complexity tier can serve
pub fn capacity_for(complexity: &str) -> u64 {
    match complexity {
        "medium" => 120,
        "high" => 250,
        _ => 60,
    }
}

pub fn menu_available(menu: &[String]) -> bool {
    menu.iter()
        .all(|item| ALLOWED_MENU.contains(item.to_lowercase().as_str()))
}

fn capture_request(state: &WorkflowState) -> Result<StateUpdate, NodeError> {
    let record: CateringRecord = state.record()?;
    Ok(StateUpdate::new()
        .set("event_date", json!(record.event_date))
        .set("headcount", record.headcount())
        .set("menu", json!(record.menu()))
        .set("complexity", "")
        .set("capacity_ok", false)
        .set("ingredients_ok", false)
        .set("quote", json!({}))
        .set("status", "pending")
        .set("reason", ""))
}

fn determine_complexity(state: &WorkflowState) -> Result<StateUpdate, NodeError> {
    let record: CateringRecord = state.record()?;
    let level = complexity(record.headcount(), record.menu());
    log::info!("Complexity determined: {}", level);
    Ok(StateUpdate::new().set("complexity", level))
}

fn check_capacity(state: &WorkflowState) -> Result<StateUpdate, NodeError> {
    let record: CateringRecord = state.record()?;
    let cap = capacity_for(record.complexity.as_deref().unwrap_or("low"));
    let ok = record.headcount() <= cap;
    log::info!("Capacity check ({} <= {}) -> {}", record.headcount(), cap, ok);
    Ok(StateUpdate::new().set("capacity_ok", ok))
}

fn check_ingredients(state: &WorkflowState) -> Result<StateUpdate, NodeError> {
    let record: CateringRecord = state.record()?;
    let ok = menu_available(record.menu());
    log::info!("Ingredients check -> {}", ok);
    Ok(StateUpdate::new().set("ingredients_ok", ok))
}

/// Prices one complexity tier
struct Draft {
    per_person: u64,
    ready_time: &'static str,
}

#[async_trait]
impl Work for Draft {
    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, NodeError> {
        let record: CateringRecord = state.record()?;
        let feasible = record.capacity_ok == Some(true) && record.ingredients_ok == Some(true);
        let quote = if feasible {
            json!({
                "total": record.headcount() * self.per_person,
                "per_person": self.per_person,
                "ready_time": self.ready_time,
            })
        } else {
            log::warn!("Request failed its checks, drafting no quote");
            json!({})
        };
        log::info!("Draft quote: {}", quote);
        Ok(StateUpdate::new().set("quote", quote))
    }
}

fn is_empty_quote(state: &WorkflowState) -> bool {
    state
        .get("quote")
        .and_then(Value::as_object)
        .map_or(true, Map::is_empty)
}

/// Closes the request once the manager has decided
struct Finalize {
    approved: bool,
    generator: Arc<dyn TextGenerator>,
}

impl Finalize {
    /// Have the generator explain a decision the manager left unexplained
    async fn explain(&self, state: &WorkflowState) -> String {
        let decision = if self.approved { "approved" } else { "rejected" };
        let prompt = format!(
            "You are a manager reviewing this catering request:\n{}\nDecision: {}\n\
             Generate a short reason explaining the decision.\n\
             Respond JSON as {{\"reason\": \"<short reason>\"}}",
            state.to_json(),
            decision
        );
        advise_json(self.generator.as_ref(), &prompt)
            .await
            .ok()
            .and_then(|v| v.get("reason").and_then(Value::as_str).map(str::to_string))
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| {
                if self.approved {
                    "quote approved".to_string()
                } else {
                    DEFAULT_REASON.to_string()
                }
            })
    }
}

#[async_trait]
impl Work for Finalize {
    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, NodeError> {
        let record: CateringRecord = state.record()?;
        let reason = match record.reason.filter(|r| !r.trim().is_empty()) {
            Some(reason) => reason,
            None => self.explain(state).await,
        };

        let update = StateUpdate::new().set("reason", reason);
        Ok(if self.approved {
            update.set("status", APPROVED)
        } else {
            update.set("status", NEEDS_REVISION).set("quote", json!({}))
        })
    }
}

fn schema() -> StateSchema {
    StateSchema::new()
        .field("event_date", FieldType::String)
        .field("headcount", FieldType::Number)
        .field("menu", FieldType::Array)
        .field("complexity", FieldType::String)
        .field("capacity_ok", FieldType::Boolean)
        .field("ingredients_ok", FieldType::Boolean)
        .field("quote", FieldType::Object)
        .field("decision", FieldType::Object)
        .field("status", FieldType::String)
        .field("reason", FieldType::String)
}

pub fn build(kitchen: &Kitchen) -> Result<Workflow, BrigadeError> {
    let gate = Gate::new("manager_gate", kitchen.approver.clone())
        .with_context(|state| {
            json!({
                "event_date": state.get("event_date"),
                "headcount": state.get("headcount"),
                "menu": state.get("menu"),
                "complexity": state.get("complexity"),
                "quote": state.get("quote"),
            })
        })
        .with_auto_decision(|state| {
            is_empty_quote(state).then(|| Decision::reject("infeasible request"))
        });

    let finalize = |approved| {
        Arc::new(Finalize {
            approved,
            generator: kitchen.generator.clone(),
        })
    };

    let mut b = GraphBuilder::new();
    b.add_node(NodeSpec::task("capture_request", work_fn(capture_request)))
        .add_node(NodeSpec::task("determine_complexity", work_fn(determine_complexity)))
        .add_node(NodeSpec::task("check_capacity", work_fn(check_capacity)))
        .add_node(NodeSpec::task("check_ingredients", work_fn(check_ingredients)))
        .add_node(
            NodeSpec::join("select_draft", Arc::new(Passthrough))
                .routed_by("complexity", &["low", "medium", "high"]),
        );
    let tiers = [("low", 28, "15:00"), ("medium", 34, "16:00"), ("high", 48, "18:00")];
    for (tier, per_person, ready_time) in tiers {
        let id = format!("draft_{}", tier);
        b.add_node(NodeSpec::task(
            &id,
            Arc::new(Draft {
                per_person,
                ready_time,
            }),
        ))
        .add_route("select_draft", tier, &id)
        .add_edge(&id, "manager_gate");
    }
    b.add_node(gate.into_node())
        .add_node(NodeSpec::task("finalize_approved", finalize(true)))
        .add_node(NodeSpec::task("finalize_rejected", finalize(false)))
        .add_edge(START, "capture_request")
        .add_edge("capture_request", "determine_complexity")
        .add_edge("determine_complexity", "check_capacity")
        .add_edge("determine_complexity", "check_ingredients")
        .add_edge("check_capacity", "select_draft")
        .add_edge("check_ingredients", "select_draft")
        .add_route("manager_gate", APPROVED, "finalize_approved")
        .add_route("manager_gate", NEEDS_REVISION, "finalize_rejected")
        .add_edge("finalize_approved", END)
        .add_edge("finalize_rejected", END);
    if let Some(timeout) = kitchen.config.node_timeout() {
        b.default_timeout(timeout);
    }

    Ok(Workflow::new(
        "catering",
        "Catering quote with parallel feasibility checks and manager approval",
        b.compile()?,
        schema(),
    ))
}
