// SPDX-License-Identifier: MIT

//! Kitchen workflows
//!
//! Four restaurant workflows built on the graph engine:
//! - [bakery] - supervised bake with heartbeat monitoring and retries
//! - [snapshot] - dinner-rush fan-out status check
//! - [catering] - catering quote with a manager approval gate
//! - [order_router] - routes an order to its service path
//!
//! Every workflow gets its collaborators from a [`Kitchen`], so tests can
//! swap in scripted generators, probes and approvers.

pub mod bakery;
pub mod catering;
pub mod order_router;
pub mod snapshot;

use serde_json::{json, Value};
use std::sync::Arc;

use crate::adk::approval::DecisionSource;
use crate::adk::error::BrigadeError;
use crate::adk::extract::{extract, ExtractionError};
use crate::adk::model::TextGenerator;
use crate::brigade::workflow::config::RunConfig;
use crate::brigade::workflow::process::Probe;
use crate::brigade::workflow::Workflow;

/// Reason recorded when the generator itself failed
pub const MODEL_ERROR: &str = "model_error";

/// Names of every workflow in the catalogue
pub const WORKFLOWS: [&str; 4] = ["bakery", "dinner_snapshot", "catering", "order_router"];

/// Collaborators shared by the kitchen workflows
#[derive(Clone)]
pub struct Kitchen {
    pub generator: Arc<dyn TextGenerator>,
    pub approver: Arc<dyn DecisionSource>,
    pub oven: Arc<dyn Probe>,
    pub config: RunConfig,
}

impl Kitchen {
    /// A kitchen with the simulated oven tuned by `config`
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        approver: Arc<dyn DecisionSource>,
        config: RunConfig,
    ) -> Self {
        let oven = Arc::new(bakery::SimulatedOven::from_settings(&config.bakery));
        Self {
            generator,
            approver,
            oven,
            config,
        }
    }

    pub fn with_oven(mut self, oven: Arc<dyn Probe>) -> Self {
        self.oven = oven;
        self
    }
}

/// Build the named workflow
pub fn build(name: &str, kitchen: &Kitchen) -> Result<Workflow, BrigadeError> {
    match name {
        "bakery" => bakery::build(kitchen),
        "dinner_snapshot" => snapshot::build(kitchen),
        "catering" => catering::build(kitchen),
        "order_router" => order_router::build(kitchen),
        other => Err(BrigadeError::workflow_not_found(other)),
    }
}

/// The request each workflow was written against
pub fn sample_input(name: &str) -> Option<Value> {
    let input = match name {
        "bakery" => json!({"item": "sourdough", "target_temp_c": 230, "batch_size": 12}),
        "dinner_snapshot" => json!({"service_area": "Downtown"}),
        "catering" => json!({
            "event_date": "2025-11-12",
            "headcount": 80,
            "menu": ["grilled chicken", "pasta", "salad"]
        }),
        "order_router" => json!({
            "order_type": "delivery",
            "items": ["margherita pizza", "caesar salad"],
            "address": "55 King St W",
            "requested_time": "ASAP"
        }),
        _ => return None,
    };
    Some(input)
}

/// Ask the generator for a JSON object. Model failures and unparseable
/// output both come back as an `ExtractionError` the caller can store.
pub(crate) async fn advise_json(
    generator: &dyn TextGenerator,
    prompt: &str,
) -> Result<Value, ExtractionError> {
    match generator.generate(prompt).await {
        Ok(text) => extract(&text).inspect_err(|_| {
            log::warn!("Non-JSON generator output, fallback applied");
        }),
        Err(e) => {
            log::warn!("Generator call failed, fallback applied: {}", e);
            Err(ExtractionError {
                reason: MODEL_ERROR.to_string(),
                raw: e.to_string(),
            })
        }
    }
}

/// Ask the generator for free text, using `fallback` when the call fails or
/// returns nothing.
pub(crate) async fn advise_text(
    generator: &dyn TextGenerator,
    prompt: &str,
    fallback: String,
) -> String {
    match generator.generate(prompt).await {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => fallback,
        Err(e) => {
            log::warn!("Generator call failed, using fallback text: {}", e);
            fallback
        }
    }
}
