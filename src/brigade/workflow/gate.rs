// SPDX-License-Identifier: MIT

//! Approval gates
//!
//! A gate suspends its branch until a `DecisionSource` answers, then writes
//! the decision into state and routes on it. Sibling branches keep running
//! while the gate waits.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::adk::approval::{ApprovalRequest, Decision, DecisionSource, Verdict};
use crate::adk::error::{NodeError, StateError};
use crate::brigade::workflow::graph::{NodeKind, NodeSpec, Work};
use crate::brigade::workflow::state::{StateUpdate, WorkflowState};

pub const APPROVED: &str = "approved";
pub const NEEDS_REVISION: &str = "needs_revision";

/// Field the gate routes on
pub const STATUS_FIELD: &str = "status";

type ContextFn = Arc<dyn Fn(&WorkflowState) -> Value + Send + Sync>;
type AutoDecisionFn = Arc<dyn Fn(&WorkflowState) -> Option<Decision> + Send + Sync>;

pub struct Gate {
    id: String,
    source: Arc<dyn DecisionSource>,
    context: ContextFn,
    auto_decision: Option<AutoDecisionFn>,
}

impl Gate {
    /// A gate that shows the whole state to the approver
    pub fn new(id: &str, source: Arc<dyn DecisionSource>) -> Self {
        Self {
            id: id.to_string(),
            source,
            context: Arc::new(WorkflowState::to_json),
            auto_decision: None,
        }
    }

    /// Choose what the approver sees
    pub fn with_context<F>(mut self, context: F) -> Self
    where
        F: Fn(&WorkflowState) -> Value + Send + Sync + 'static,
    {
        self.context = Arc::new(context);
        self
    }

    /// Resolve the gate without asking when `decide` returns a decision
    pub fn with_auto_decision<F>(mut self, decide: F) -> Self
    where
        F: Fn(&WorkflowState) -> Option<Decision> + Send + Sync + 'static,
    {
        self.auto_decision = Some(Arc::new(decide));
        self
    }

    /// Wrap the gate as a two-way router node
    pub fn into_node(self) -> NodeSpec {
        let id = self.id.clone();
        NodeSpec::new(&id, NodeKind::Gate, Arc::new(self))
            .routed_by(STATUS_FIELD, &[APPROVED, NEEDS_REVISION])
    }
}

#[async_trait]
impl Work for Gate {
    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, NodeError> {
        let auto = self.auto_decision.as_ref().and_then(|decide| decide(state));
        let decision = match auto {
            Some(decision) => {
                log::info!(
                    "Gate {} resolved automatically: {}",
                    self.id,
                    decision.verdict.as_str()
                );
                decision
            }
            None => {
                let request = ApprovalRequest::new(&self.id, (self.context)(state));
                log::info!("Gate {} waiting for decision {}", self.id, request.id);
                self.source.request_approval(request).await?
            }
        };

        let status = match decision.verdict {
            Verdict::Approve => APPROVED,
            Verdict::Reject => NEEDS_REVISION,
        };
        let recorded = serde_json::to_value(&decision).map_err(StateError::from)?;

        Ok(StateUpdate::new()
            .set("decision", recorded)
            .set(STATUS_FIELD, status)
            .set("reason", decision.rationale))
    }
}
