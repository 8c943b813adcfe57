// SPDX-License-Identifier: MIT

//! Bounded retry supervision
//!
//! A `RetrySupervisor` runs a unit of work until it succeeds, fails fatally,
//! or uses up `max_attempts`. Every attempt is recorded in an audit trail
//! that is returned whatever the outcome.
//!
//! ```text
//! Idle -> Attempting -> Succeeded
//!             |  ^
//!             v  |  (retryable, attempts left, wait delay)
//!           Retrying
//!             |
//!             v  (retryable, no attempts left | fatal)
//!          Aborted
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::adk::error::{BrigadeError, NodeError, StateError};
use crate::brigade::workflow::graph::Work;
use crate::brigade::workflow::state::{StateUpdate, WorkflowState};

/// How many times to try and how long to wait in between
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Wait before the first retry
    pub delay: Duration,
    /// Multiplier applied to the delay after each retry
    pub backoff_factor: f64,
    pub max_delay: Option<Duration>,
    /// Per-attempt budget; exceeding it is a retryable failure
    pub attempt_timeout: Option<Duration>,
}

impl RetryPolicy {
    /// Policy with a fixed zero delay. `max_attempts` must be positive.
    pub fn new(max_attempts: u32) -> Result<Self, BrigadeError> {
        if max_attempts == 0 {
            return Err(BrigadeError::config("max_attempts must be at least 1"));
        }
        Ok(Self {
            max_attempts,
            delay: Duration::ZERO,
            backoff_factor: 1.0,
            max_delay: None,
            attempt_timeout: None,
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor.max(1.0);
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let scaled = self.delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let delay = Duration::try_from_secs_f64(scaled).unwrap_or(Duration::MAX);
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

/// Result of a single attempt
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome<T> {
    Success(T),
    Retryable(Value),
    Fatal(Value),
}

impl<T> From<Result<T, NodeError>> for AttemptOutcome<T> {
    fn from(result: Result<T, NodeError>) -> Self {
        match result {
            Ok(value) => AttemptOutcome::Success(value),
            Err(e) => {
                let diagnostic = with_message(e.diagnostic(), &e.to_string());
                if e.is_retryable() {
                    AttemptOutcome::Retryable(diagnostic)
                } else {
                    AttemptOutcome::Fatal(diagnostic)
                }
            }
        }
    }
}

fn with_message(diagnostic: Value, message: &str) -> Value {
    match diagnostic {
        Value::Object(mut obj) => {
            obj.entry("message").or_insert_with(|| json!(message));
            Value::Object(obj)
        }
        Value::Null => json!({ "message": message }),
        other => json!({ "message": message, "detail": other }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    RetryableFailure,
    Fatal,
}

/// Audit record of one attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryAttempt {
    pub attempt: u32,
    pub outcome: OutcomeKind,
    pub diagnostic: Value,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    Idle,
    Attempting,
    Retrying,
    Succeeded,
    Aborted,
}

#[derive(Debug, Clone)]
pub struct SupervisionResult<T> {
    /// `Succeeded` or `Aborted`
    pub state: SupervisorState,
    pub value: Option<T>,
    pub attempts: Vec<RetryAttempt>,
}

impl<T> SupervisionResult<T> {
    pub fn succeeded(&self) -> bool {
        self.state == SupervisorState::Succeeded
    }

    /// Whether the run was cut short by a fatal failure
    pub fn was_fatal(&self) -> bool {
        self.attempts
            .last()
            .is_some_and(|a| a.outcome == OutcomeKind::Fatal)
    }

    pub fn last_diagnostic(&self) -> Option<&Value> {
        self.attempts.last().map(|a| &a.diagnostic)
    }
}

pub struct RetrySupervisor {
    policy: RetryPolicy,
}

impl RetrySupervisor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `attempt` (called with the 1-based attempt number) under the policy
    pub async fn supervise<T, F, Fut>(&self, mut attempt: F) -> SupervisionResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = AttemptOutcome<T>>,
    {
        let max = self.policy.max_attempts.max(1);
        let mut state = SupervisorState::Idle;
        let mut trail = Vec::new();
        let mut counter = 0;

        loop {
            transition(&mut state, SupervisorState::Attempting);
            counter += 1;

            let started_at = Utc::now();
            let clock = Instant::now();
            let outcome = match self.policy.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, attempt(counter)).await {
                    Ok(outcome) => outcome,
                    Err(_) => AttemptOutcome::Retryable(json!({
                        "message": format!("attempt timed out after {:?}", limit),
                        "timeout_ms": limit.as_millis() as u64,
                    })),
                },
                None => attempt(counter).await,
            };
            let elapsed_ms = clock.elapsed().as_millis() as u64;

            let (kind, diagnostic, value) = match outcome {
                AttemptOutcome::Success(v) => (OutcomeKind::Success, Value::Null, Some(v)),
                AttemptOutcome::Retryable(d) => (OutcomeKind::RetryableFailure, d, None),
                AttemptOutcome::Fatal(d) => (OutcomeKind::Fatal, d, None),
            };
            trail.push(RetryAttempt {
                attempt: counter,
                outcome: kind,
                diagnostic: diagnostic.clone(),
                started_at,
                elapsed_ms,
            });

            match kind {
                OutcomeKind::Success => {
                    log::info!("Attempt {}/{} succeeded", counter, max);
                    transition(&mut state, SupervisorState::Succeeded);
                    return SupervisionResult {
                        state,
                        value,
                        attempts: trail,
                    };
                }
                OutcomeKind::Fatal => {
                    log::error!("Attempt {}/{} failed fatally: {}", counter, max, diagnostic);
                    transition(&mut state, SupervisorState::Aborted);
                    return SupervisionResult {
                        state,
                        value: None,
                        attempts: trail,
                    };
                }
                OutcomeKind::RetryableFailure if counter >= max => {
                    log::warn!("Attempt {}/{} failed, giving up: {}", counter, max, diagnostic);
                    transition(&mut state, SupervisorState::Aborted);
                    return SupervisionResult {
                        state,
                        value: None,
                        attempts: trail,
                    };
                }
                OutcomeKind::RetryableFailure => {
                    transition(&mut state, SupervisorState::Retrying);
                    let delay = self.policy.delay_for(counter);
                    log::warn!(
                        "Attempt {}/{} failed, retrying in {:?}: {}",
                        counter,
                        max,
                        delay,
                        diagnostic
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}

fn transition(state: &mut SupervisorState, next: SupervisorState) {
    log::debug!("Supervisor {:?} -> {:?}", state, next);
    *state = next;
}

/// A unit of work that a `SupervisedWork` node retries
#[async_trait]
pub trait Attempt: Send + Sync {
    async fn attempt(&self, state: &WorkflowState, number: u32) -> AttemptOutcome<StateUpdate>;

    /// Fields worth keeping from a failed attempt, given its diagnostic
    fn salvage(&self, _diagnostic: &Value) -> Option<StateUpdate> {
        None
    }
}

/// Graph node that runs an `Attempt` under a `RetrySupervisor` and records
/// the audit trail in state. Failures never escape the node; they become
/// `status`, `reason` and `last_failure`. Whatever failed attempts salvage is
/// folded in attempt order through the state's reducers.
pub struct SupervisedWork {
    attempt: Arc<dyn Attempt>,
    supervisor: RetrySupervisor,
}

impl SupervisedWork {
    pub fn new(attempt: Arc<dyn Attempt>, policy: RetryPolicy) -> Self {
        Self {
            attempt,
            supervisor: RetrySupervisor::new(policy),
        }
    }
}

#[async_trait]
impl Work for SupervisedWork {
    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, NodeError> {
        let result = self
            .supervisor
            .supervise(|n| {
                let attempt = self.attempt.clone();
                let state = state.clone();
                async move { attempt.attempt(&state, n).await }
            })
            .await;

        let count = result.attempts.len();
        let attempt_log = serde_json::to_value(&result.attempts).map_err(StateError::from)?;
        let audit = StateUpdate::new()
            .set("attempts", count)
            .set("attempt_log", attempt_log);

        let salvaged = result
            .attempts
            .iter()
            .filter(|a| a.outcome != OutcomeKind::Success)
            .filter_map(|a| self.attempt.salvage(&a.diagnostic))
            .fold(StateUpdate::new(), |acc, update| {
                acc.combine(update, state.schema())
            });

        if let Some(update) = result.value.clone() {
            return Ok(salvaged.combine(update, state.schema()).extend(audit));
        }

        let last = result.last_diagnostic().cloned().unwrap_or(Value::Null);
        let (status, reason) = if result.was_fatal() {
            (
                "failed",
                format!("fatal failure on attempt {}: {}", count, describe(&last)),
            )
        } else {
            (
                "aborted",
                format!("aborted after {} attempts: {}", count, describe(&last)),
            )
        };

        Ok(salvaged
            .extend(audit)
            .set("status", status)
            .set("reason", reason)
            .set("last_failure", last))
    }
}

fn describe(diagnostic: &Value) -> String {
    diagnostic
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| diagnostic.to_string())
}
