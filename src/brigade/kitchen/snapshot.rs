// SPDX-License-Identifier: MIT

//! Dinner-rush snapshot workflow
//!
//! Three independent checks fan out from the start and meet at a join that
//! rates how busy the service area is.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;

use super::{advise_json, Kitchen};
use crate::adk::error::{BrigadeError, NodeError};
use crate::adk::model::TextGenerator;
use crate::brigade::workflow::config::SnapshotSettings;
use crate::brigade::workflow::graph::{GraphBuilder, NodeSpec, Work, END, START};
use crate::brigade::workflow::state::{FieldType, StateSchema, StateUpdate, WorkflowState};
use crate::brigade::workflow::Workflow;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SnapshotRecord {
    pub service_area: Option<String>,
    pub inventory: Option<Map<String, Value>>,
    pub floor: Option<Map<String, Value>>,
    pub delivery: Option<Map<String, Value>>,
}

impl SnapshotRecord {
    fn area(&self) -> &str {
        self.service_area.as_deref().unwrap_or("unknown")
    }
}

/// One generator-backed check writing its findings to `field`
struct Survey {
    field: &'static str,
    prompt: fn(&str) -> String,
    generator: Arc<dyn TextGenerator>,
}

#[async_trait]
impl Work for Survey {
    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, NodeError> {
        let area = state.get_str("service_area").unwrap_or("unknown");
        let prompt = (self.prompt)(area);
        let findings = advise_json(self.generator.as_ref(), &prompt)
            .await
            .unwrap_or_else(|e| e.to_value());
        log::debug!("{} for {}: {}", self.field, area, findings);
        Ok(StateUpdate::new().set(self.field, findings))
    }
}

fn inventory_prompt(area: &str) -> String {
    format!(
        "You are checking stock for the {} restaurant.\n\
         Respond strictly in JSON format with three keys:\n\
         {{\"steak\": \"ok/low/critical\", \"pasta\": \"ok/low/critical\", \
         \"lettuce\": \"ok/low/critical\"}}",
        area
    )
}

fn floor_prompt(area: &str) -> String {
    format!(
        "Estimate occupancy for the {} restaurant.\n\
         Return only valid JSON:\n\
         {{\"open_tables\": <number>, \"waitlist\": <number>}}",
        area
    )
}

fn delivery_prompt(area: &str) -> String {
    format!(
        "You are a delivery monitor for the {} restaurant.\n\
         Return JSON with:\n\
         {{\"drivers_on_duty\": <number>, \"avg_eta_min\": <number>}}",
        area
    )
}

/// Rates the floor from the three checks
struct Summarize {
    settings: SnapshotSettings,
}

impl Summarize {
    fn overall(&self, record: &SnapshotRecord) -> &'static str {
        let number = |section: &Option<Map<String, Value>>, key: &str| {
            section
                .as_ref()
                .and_then(|s| s.get(key))
                .and_then(Value::as_f64)
                .unwrap_or(0.0)
        };
        let load = number(&record.floor, "waitlist") + number(&record.delivery, "avg_eta_min");
        let steak = record
            .inventory
            .as_ref()
            .and_then(|i| i.get("steak"))
            .and_then(Value::as_str)
            .unwrap_or("ok");

        if steak == "low" || load > self.settings.busy_threshold {
            "busy"
        } else if load > self.settings.moderate_threshold {
            "moderate"
        } else {
            "calm"
        }
    }
}

fn section(value: &Option<Map<String, Value>>) -> String {
    value
        .as_ref()
        .map(|m| Value::Object(m.clone()).to_string())
        .unwrap_or_else(|| "n/a".to_string())
}

#[async_trait]
impl Work for Summarize {
    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, NodeError> {
        let record: SnapshotRecord = state.record()?;
        let overall = self.overall(&record);
        let summary = format!(
            "Restaurant Area: {}\nFloor: {}\nDelivery: {}\nInventory: {}\nOverall Status: {}",
            record.area(),
            section(&record.floor),
            section(&record.delivery),
            section(&record.inventory),
            overall.to_uppercase()
        );
        log::info!("Dinner snapshot for {}: {}", record.area(), overall);

        Ok(StateUpdate::new()
            .set("overall", overall)
            .set("summary", summary)
            .set("status", "completed")
            .set("reason", format!("{} is {}", record.area(), overall)))
    }
}

fn schema() -> StateSchema {
    StateSchema::new()
        .field("service_area", FieldType::String)
        .field("inventory", FieldType::Object)
        .field("floor", FieldType::Object)
        .field("delivery", FieldType::Object)
        .field("overall", FieldType::String)
        .field("summary", FieldType::String)
        .field("status", FieldType::String)
        .field("reason", FieldType::String)
}

pub fn build(kitchen: &Kitchen) -> Result<Workflow, BrigadeError> {
    let checks: [(&'static str, &'static str, fn(&str) -> String); 3] = [
        ("check_inventory", "inventory", inventory_prompt),
        ("check_floor", "floor", floor_prompt),
        ("check_delivery", "delivery", delivery_prompt),
    ];

    let mut b = GraphBuilder::new();
    b.add_node(NodeSpec::join(
        "summarize_status",
        Arc::new(Summarize {
            settings: kitchen.config.snapshot.clone(),
        }),
    ));
    for (id, field, prompt) in checks {
        b.add_node(NodeSpec::task(
            id,
            Arc::new(Survey {
                field,
                prompt,
                generator: kitchen.generator.clone(),
            }),
        ))
        .add_edge(START, id)
        .add_edge(id, "summarize_status");
    }
    b.add_edge("summarize_status", END);
    if let Some(timeout) = kitchen.config.node_timeout() {
        b.default_timeout(timeout);
    }

    Ok(Workflow::new(
        "dinner_snapshot",
        "Parallel inventory, floor and delivery checks rolled into one status",
        b.compile()?,
        schema(),
    ))
}
