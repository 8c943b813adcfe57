// SPDX-License-Identifier: MIT

//! Order routing workflow
//!
//! The generator picks the service path for an incoming order. When it is
//! unavailable or answers with something unreadable, the route falls back
//! to a rule on `order_type`. A label outside the known routes still fails
//! the run.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{advise_json, Kitchen};
use crate::adk::error::{BrigadeError, NodeError};
use crate::adk::model::TextGenerator;
use crate::brigade::workflow::graph::{work_fn, GraphBuilder, NodeSpec, Work, END, START};
use crate::brigade::workflow::state::{FieldType, StateSchema, StateUpdate, WorkflowState};
use crate::brigade::workflow::Workflow;

pub const ROUTES: [&str; 4] = ["dine_in", "takeout", "delivery", "unsupported"];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderRecord {
    pub order_type: Option<String>,
    pub items: Option<Vec<String>>,
    pub address: Option<String>,
    pub requested_time: Option<String>,
    pub route: Option<String>,
}

/// Route derived from the order type alone
pub fn rule_route(order_type: &str) -> &'static str {
    match order_type.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
        "dine_in" => "dine_in",
        "takeout" | "take_out" | "pickup" => "takeout",
        "delivery" => "delivery",
        _ => "unsupported",
    }
}

fn intake_order(state: &WorkflowState) -> Result<StateUpdate, NodeError> {
    let order: OrderRecord = state.record()?;
    Ok(StateUpdate::new()
        .set("order_type", order.order_type.unwrap_or_default())
        .set("items", json!(order.items.unwrap_or_default()))
        .set("address", order.address.unwrap_or_default())
        .set("requested_time", order.requested_time.unwrap_or_default()))
}

struct RouteOrder {
    generator: Arc<dyn TextGenerator>,
}

#[async_trait]
impl Work for RouteOrder {
    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, NodeError> {
        let order: OrderRecord = state.record()?;
        let order_type = order.order_type.unwrap_or_default();
        let prompt = format!(
            "You are an order router. The order has the following info:\n{}\n\n\
             Decide the route based on order_type:\n\
             - \"dine_in\": find table, estimate seat time, notify host\n\
             - \"takeout\": estimate prep time, print pickup label\n\
             - \"delivery\": estimate prep + courier ETA, assign driver\n\
             - anything else: unsupported\n\n\
             Respond ONLY in JSON:\n\
             {{\"route\": \"<dine_in|takeout|delivery|unsupported>\"}}",
            state.to_json()
        );

        let proposed = advise_json(self.generator.as_ref(), &prompt)
            .await
            .ok()
            .and_then(|v| v.get("route").and_then(Value::as_str).map(str::to_string));
        let (route, source) = match proposed {
            Some(route) => (route, "generator"),
            None => {
                let route = rule_route(&order_type);
                log::warn!("No usable route from generator, rule chose {}", route);
                (route.to_string(), "rule")
            }
        };

        Ok(StateUpdate::new().set("route", route).set("route_source", source))
    }
}

fn dine_in(_: &WorkflowState) -> Result<StateUpdate, NodeError> {
    let table = 7;
    Ok(StateUpdate::new()
        .set("prep_eta_min", 5)
        .set("notes", format!("Table {} ready, notify host", table))
        .set("status", "completed"))
}

fn takeout(_: &WorkflowState) -> Result<StateUpdate, NodeError> {
    Ok(StateUpdate::new()
        .set("prep_eta_min", 12)
        .set("notes", "Pickup label printed")
        .set("status", "completed"))
}

fn delivery(_: &WorkflowState) -> Result<StateUpdate, NodeError> {
    Ok(StateUpdate::new()
        .set("prep_eta_min", 18)
        .set("courier_eta_min", 22)
        .set("notes", "Assigned to Driver-07")
        .set("status", "completed"))
}

fn unsupported(state: &WorkflowState) -> Result<StateUpdate, NodeError> {
    let order_type = state.get_str("order_type").unwrap_or_default();
    Ok(StateUpdate::new()
        .set("notes", format!("Unsupported order type: {}", order_type))
        .set("status", "unsupported"))
}

fn schema() -> StateSchema {
    StateSchema::new()
        .field("order_type", FieldType::String)
        .field("items", FieldType::Array)
        .field("address", FieldType::String)
        .field("requested_time", FieldType::String)
        .field("route", FieldType::String)
        .field("route_source", FieldType::String)
        .field("prep_eta_min", FieldType::Number)
        .field("courier_eta_min", FieldType::Number)
        .field("notes", FieldType::String)
        .field("status", FieldType::String)
}

pub fn build(kitchen: &Kitchen) -> Result<Workflow, BrigadeError> {
    let mut b = GraphBuilder::new();
    b.add_node(NodeSpec::task("intake_order", work_fn(intake_order)))
        .add_node(NodeSpec::router(
            "route_order",
            Arc::new(RouteOrder {
                generator: kitchen.generator.clone(),
            }),
            "route",
            &ROUTES,
        ))
        .add_node(NodeSpec::task("dine_in", work_fn(dine_in)))
        .add_node(NodeSpec::task("takeout", work_fn(takeout)))
        .add_node(NodeSpec::task("delivery", work_fn(delivery)))
        .add_node(NodeSpec::task("unsupported", work_fn(unsupported)))
        .add_edge(START, "intake_order")
        .add_edge("intake_order", "route_order");
    for route in ROUTES {
        b.add_route("route_order", route, route).add_edge(route, END);
    }
    if let Some(timeout) = kitchen.config.node_timeout() {
        b.default_timeout(timeout);
    }

    Ok(Workflow::new(
        "order_router",
        "Routes an order to dine-in, takeout or delivery handling",
        b.compile()?,
        schema(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brigade::kitchen::testing::{kitchen, QueuedApprover, ScriptedGenerator};
    use crate::brigade::workflow::RunStatus;

    fn workflow(replies: Vec<(&'static str, &'static str)>) -> Workflow {
        build(&kitchen(ScriptedGenerator::new(replies), QueuedApprover::new(vec![]))).unwrap()
    }

    #[test]
    fn test_rule_route() {
        assert_eq!(rule_route("Dine-In"), "dine_in");
        assert_eq!(rule_route("pickup"), "takeout");
        assert_eq!(rule_route(" delivery "), "delivery");
        assert_eq!(rule_route("drone"), "unsupported");
    }

    #[tokio::test]
    async fn test_delivery_by_rule_when_offline() {
        let report = workflow(vec![])
            .run(json!({
                "order_type": "delivery",
                "items": ["margherita pizza", "caesar salad"],
                "address": "55 King St W",
                "requested_time": "ASAP"
            }))
            .await;

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.reason, "Assigned to Driver-07");
        assert_eq!(report.state["route"], "delivery");
        assert_eq!(report.state["route_source"], "rule");
        assert_eq!(report.state["prep_eta_min"], 18);
        assert_eq!(report.state["courier_eta_min"], 22);
    }

    #[tokio::test]
    async fn test_generator_route_is_followed() {
        let report = workflow(vec![("order router", r#"{"route": "dine_in"}"#)])
            .run(json!({"order_type": "dine in", "items": ["soup"]}))
            .await;

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.state["route_source"], "generator");
        assert_eq!(report.state["notes"], "Table 7 ready, notify host");
        assert!(report.state.get("courier_eta_min").is_none());
    }

    #[tokio::test]
    async fn test_unreadable_answer_falls_back_to_rule() {
        let report = workflow(vec![("order router", "takeout, obviously")])
            .run(json!({"order_type": "takeout"}))
            .await;

        assert_eq!(report.state["route"], "takeout");
        assert_eq!(report.state["notes"], "Pickup label printed");
    }

    #[tokio::test]
    async fn test_unsupported_order() {
        let report = workflow(vec![])
            .run(json!({"order_type": "catering"}))
            .await;

        assert_eq!(report.status, RunStatus::Unsupported);
        assert_eq!(report.reason, "Unsupported order type: catering");
    }

    #[tokio::test]
    async fn test_unknown_label_fails_run() {
        let report = workflow(vec![("order router", r#"{"route": "drone"}"#)])
            .run(json!({"order_type": "delivery"}))
            .await;

        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.reason.contains("route_order"));
        assert!(report.reason.contains("drone"));
        assert_eq!(report.state["route"], "drone");
        assert!(report.state.get("notes").is_none());
    }
}
