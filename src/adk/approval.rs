// SPDX-License-Identifier: MIT

//! Human decision sources for approval gates
//!
//! A gate asks a `DecisionSource` for a verdict and awaits the answer. The
//! broker hands out oneshot receivers so any other task (an HTTP handler, a
//! test) can resolve the request; the console source reads stdin on a
//! blocking thread and keeps asking until it gets a valid answer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};

use crate::adk::error::ApprovalError;

/// Outcome chosen by the approver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Approve,
    Reject,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Approve => "approve",
            Verdict::Reject => "reject",
        }
    }
}

/// Parse a typed answer; `None` means the answer must be asked again
pub fn parse_verdict(answer: &str) -> Option<Verdict> {
    match answer.trim().to_lowercase().as_str() {
        "yes" | "y" | "approve" | "approved" => Some(Verdict::Approve),
        "no" | "n" | "reject" | "rejected" => Some(Verdict::Reject),
        _ => None,
    }
}

/// A verdict plus the approver's rationale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub verdict: Verdict,
    #[serde(default)]
    pub rationale: String,
}

impl Decision {
    pub fn approve(rationale: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Approve,
            rationale: rationale.into(),
        }
    }

    pub fn reject(rationale: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Reject,
            rationale: rationale.into(),
        }
    }
}

/// What the approver is asked to decide on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub gate: String,
    pub context: Value,
    pub requested_at: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn new(gate: impl Into<String>, context: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            gate: gate.into(),
            context,
            requested_at: Utc::now(),
        }
    }
}

/// Anything that can answer an approval request
#[async_trait]
pub trait DecisionSource: Send + Sync {
    async fn request_approval(&self, request: ApprovalRequest) -> Result<Decision, ApprovalError>;
}

/// Manages pending approval requests with oneshot channels.
///
/// A request whose waiter has gone away (its run was cancelled) is dropped
/// from the pending list and can no longer be answered.
#[derive(Default)]
pub struct ApprovalBroker {
    pending: Mutex<HashMap<String, (ApprovalRequest, oneshot::Sender<Decision>)>>,
    timeout: Option<Duration>,
}

impl ApprovalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give up on requests nobody answers within `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Register a request and return the receiver to await.
    pub async fn submit(&self, request: ApprovalRequest) -> oneshot::Receiver<Decision> {
        let (tx, rx) = oneshot::channel();
        log::info!(
            "Approval requested at gate '{}' (id {})",
            request.gate,
            request.id
        );
        self.pending
            .lock()
            .await
            .insert(request.id.clone(), (request, tx));
        rx
    }

    /// Resolve a pending request. Returns true if the request was found.
    pub async fn respond(&self, request_id: &str, decision: Decision) -> bool {
        let entry = self.pending.lock().await.remove(request_id);
        match entry {
            Some((request, tx)) => {
                log::info!(
                    "Approval '{}' at gate '{}' resolved: {}",
                    request_id,
                    request.gate,
                    decision.verdict.as_str()
                );
                if tx.send(decision).is_err() {
                    log::warn!("Approval '{}' answered after its run was cancelled", request_id);
                    return false;
                }
                true
            }
            None => false,
        }
    }

    /// Drop a pending request without answering it
    pub async fn withdraw(&self, request_id: &str) -> bool {
        self.pending.lock().await.remove(request_id).is_some()
    }

    /// List all pending requests, oldest first.
    pub async fn pending_requests(&self) -> Vec<ApprovalRequest> {
        let mut pending = self.pending.lock().await;
        pending.retain(|id, (_, tx)| {
            if tx.is_closed() {
                log::info!("Dropping approval '{}': its run is gone", id);
            }
            !tx.is_closed()
        });
        let mut requests: Vec<ApprovalRequest> =
            pending.values().map(|(req, _)| req.clone()).collect();
        requests.sort_by_key(|r| r.requested_at);
        requests
    }
}

#[async_trait]
impl DecisionSource for ApprovalBroker {
    async fn request_approval(&self, request: ApprovalRequest) -> Result<Decision, ApprovalError> {
        let id = request.id.clone();
        let rx = self.submit(request).await;
        let Some(limit) = self.timeout else {
            return rx.await.map_err(|_| ApprovalError::Dropped(id));
        };
        match tokio::time::timeout(limit, rx).await {
            Ok(answer) => answer.map_err(|_| ApprovalError::Dropped(id)),
            Err(_) => {
                log::warn!("Approval '{}' timed out after {:?}", id, limit);
                self.withdraw(&id).await;
                Err(ApprovalError::TimedOut(id))
            }
        }
    }
}

/// Prompt on `output` and read answers from `input` until one is valid.
///
/// A second line is read as the rationale; it may be empty.
pub fn read_decision<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    question: &str,
) -> Result<Decision, ApprovalError> {
    loop {
        write!(output, "{} (yes/no): ", question)?;
        output.flush()?;

        let mut answer = String::new();
        if input.read_line(&mut answer)? == 0 {
            return Err(ApprovalError::InputClosed);
        }

        if let Some(verdict) = parse_verdict(&answer) {
            write!(output, "Rationale (optional): ")?;
            output.flush()?;
            let mut rationale = String::new();
            input.read_line(&mut rationale)?;
            return Ok(Decision {
                verdict,
                rationale: rationale.trim().to_string(),
            });
        }

        writeln!(output, "Please enter yes or no.")?;
    }
}

/// Interactive approver reading from the terminal
pub struct ConsoleApprover;

#[async_trait]
impl DecisionSource for ConsoleApprover {
    async fn request_approval(&self, request: ApprovalRequest) -> Result<Decision, ApprovalError> {
        tokio::task::spawn_blocking(move || {
            let stdin = std::io::stdin();
            let mut stdout = std::io::stdout();
            writeln!(stdout, "\nApproval needed at '{}':", request.gate)?;
            writeln!(
                stdout,
                "{}",
                serde_json::to_string_pretty(&request.context).unwrap_or_default()
            )?;
            read_decision(&mut stdin.lock(), &mut stdout, "Approve?")
        })
        .await
        .map_err(|e| ApprovalError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }
}
