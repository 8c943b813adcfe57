// SPDX-License-Identifier: MIT

//! Run configuration types
//!
//! Every field has a default, so an empty file (or no file) gives the
//! behaviour the kitchen workflows were tuned for.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::adk::error::BrigadeError;
use crate::brigade::workflow::process::ToleranceBand;
use crate::brigade::workflow::retry::RetryPolicy;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RunConfig {
    pub model: ModelSettings,
    /// Graph-wide node timeout
    pub node_timeout_ms: Option<u64>,
    /// How long a served approval gate waits for an answer
    pub approval_timeout_ms: Option<u64>,
    pub bakery: BakerySettings,
    pub snapshot: SnapshotSettings,
}

impl RunConfig {
    pub fn node_timeout(&self) -> Option<Duration> {
        self.node_timeout_ms.map(Duration::from_millis)
    }

    pub fn approval_timeout(&self) -> Option<Duration> {
        self.approval_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ModelSettings {
    pub name: String,
    pub temperature: Option<f32>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            name: "gemini-2.5-flash".to_string(),
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: Option<u64>,
    pub attempt_timeout_ms: Option<u64>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1000,
            backoff_factor: 1.0,
            max_delay_ms: None,
            attempt_timeout_ms: None,
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> Result<RetryPolicy, BrigadeError> {
        let mut policy = RetryPolicy::new(self.max_attempts)?
            .with_delay(Duration::from_millis(self.delay_ms))
            .with_backoff_factor(self.backoff_factor);
        if let Some(ms) = self.max_delay_ms {
            policy = policy.with_max_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = self.attempt_timeout_ms {
            policy = policy.with_attempt_timeout(Duration::from_millis(ms));
        }
        Ok(policy)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BakerySettings {
    pub retry: RetrySettings,
    pub tolerance: ToleranceBand,
    /// Chance that a stage loses its heartbeat
    pub fault_probability: f64,
    pub stage_latency_ms: u64,
}

impl Default for BakerySettings {
    fn default() -> Self {
        Self {
            retry: RetrySettings::default(),
            tolerance: ToleranceBand::below(15.0),
            fault_probability: 0.08,
            stage_latency_ms: 1000,
        }
    }
}

impl BakerySettings {
    /// Reject settings the simulated oven cannot run with
    pub fn validate(&self) -> Result<(), BrigadeError> {
        if !(0.0..=1.0).contains(&self.fault_probability) {
            return Err(BrigadeError::config(format!(
                "bakery.fault_probability must be between 0 and 1, got {}",
                self.fault_probability
            )));
        }
        if !self.tolerance.below.is_finite() {
            return Err(BrigadeError::config("bakery.tolerance.below must be a number"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SnapshotSettings {
    /// Waitlist plus delivery ETA above which the floor is busy
    pub busy_threshold: f64,
    pub moderate_threshold: f64,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            busy_threshold: 35.0,
            moderate_threshold: 20.0,
        }
    }
}
