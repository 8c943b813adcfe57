// SPDX-License-Identifier: MIT

//! Staged processes with heartbeat monitoring
//!
//! A `StagedProcess` walks a fixed list of stages, takes one reading per
//! stage from a `Probe` and asks a `FailurePredicate` whether the reading is
//! healthy. The first unhealthy stage stops the run. The report keeps
//! everything observed up to that point so a supervisor can log it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Source of per-stage measurements. `None` means the heartbeat was lost.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn read(&self, stage: &str, setpoint: f64, attempt: u32) -> Option<f64>;
}

/// Decides whether a reading taken against `setpoint` is healthy
pub trait FailurePredicate: Send + Sync {
    fn healthy(&self, setpoint: f64, reading: Option<f64>) -> bool;
}

/// Healthy when a reading exists and lies within `[setpoint - below,
/// setpoint + above]`. No upper bound when `above` is unset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToleranceBand {
    pub below: f64,
    #[serde(default)]
    pub above: Option<f64>,
}

impl ToleranceBand {
    pub fn below(below: f64) -> Self {
        Self { below, above: None }
    }
}

impl FailurePredicate for ToleranceBand {
    fn healthy(&self, setpoint: f64, reading: Option<f64>) -> bool {
        let Some(value) = reading else {
            return false;
        };
        value >= setpoint - self.below && self.above.map_or(true, |a| value <= setpoint + a)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub stage: String,
    pub reading: Option<f64>,
    pub ok: bool,
}

/// What one run of the process observed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessReport {
    /// Stages that finished healthy, in order
    pub completed: Vec<String>,
    pub failed_stage: Option<String>,
    /// Highest reading seen
    pub peak: Option<f64>,
    pub heartbeats: Vec<Heartbeat>,
}

impl ProcessReport {
    pub fn succeeded(&self) -> bool {
        self.failed_stage.is_none()
    }

    /// The report as a JSON diagnostic payload
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

pub struct StagedProcess {
    stages: Vec<String>,
    setpoint: f64,
    probe: Arc<dyn Probe>,
    predicate: Arc<dyn FailurePredicate>,
}

impl StagedProcess {
    pub fn new(
        stages: &[&str],
        setpoint: f64,
        probe: Arc<dyn Probe>,
        predicate: Arc<dyn FailurePredicate>,
    ) -> Self {
        Self {
            stages: stages.iter().map(|s| s.to_string()).collect(),
            setpoint,
            probe,
            predicate,
        }
    }

    pub fn stages(&self) -> &[String] {
        &self.stages
    }

    /// Run every stage, stopping at the first unhealthy heartbeat
    pub async fn run(&self, attempt: u32) -> ProcessReport {
        let mut report = ProcessReport::default();

        for stage in &self.stages {
            let reading = self.probe.read(stage, self.setpoint, attempt).await;
            if let Some(value) = reading {
                report.peak = Some(report.peak.map_or(value, |p| p.max(value)));
            }

            let ok = self.predicate.healthy(self.setpoint, reading);
            log::info!(
                "Heartbeat: attempt {} stage {} reading {:?} ok={}",
                attempt,
                stage,
                reading,
                ok
            );
            report.heartbeats.push(Heartbeat {
                stage: stage.clone(),
                reading,
                ok,
            });

            if !ok {
                report.failed_stage = Some(stage.clone());
                return report;
            }
            report.completed.push(stage.clone());
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Returns fixed readings keyed by (attempt, stage); anything else reads
    /// the setpoint exactly.
    struct ScriptedProbe {
        readings: HashMap<(u32, &'static str), Option<f64>>,
    }

    #[async_trait]
    impl Probe for ScriptedProbe {
        async fn read(&self, stage: &str, setpoint: f64, attempt: u32) -> Option<f64> {
            self.readings
                .iter()
                .find(|((a, s), _)| *a == attempt && *s == stage)
                .map(|(_, r)| *r)
                .unwrap_or(Some(setpoint))
        }
    }

    const STAGES: [&str; 4] = ["preheat", "load", "bake", "finish"];

    fn process(readings: Vec<((u32, &'static str), Option<f64>)>) -> StagedProcess {
        StagedProcess::new(
            &STAGES,
            230.0,
            Arc::new(ScriptedProbe {
                readings: readings.into_iter().collect(),
            }),
            Arc::new(ToleranceBand::below(15.0)),
        )
    }

    #[test]
    fn test_tolerance_band() {
        let band = ToleranceBand::below(15.0);
        assert!(band.healthy(230.0, Some(215.0)));
        assert!(band.healthy(230.0, Some(260.0)));
        assert!(!band.healthy(230.0, Some(214.9)));
        assert!(!band.healthy(230.0, None));

        let band = ToleranceBand {
            below: 5.0,
            above: Some(5.0),
        };
        assert!(band.healthy(100.0, Some(105.0)));
        assert!(!band.healthy(100.0, Some(105.5)));
    }

    #[test]
    fn test_tolerance_band_from_yaml() {
        let band: ToleranceBand = serde_yaml::from_str("below: 5").unwrap();
        assert_eq!(band, ToleranceBand::below(5.0));
    }

    #[tokio::test]
    async fn test_all_stages_healthy() {
        let report = process(vec![((1, "bake"), Some(233.0))]).run(1).await;

        assert!(report.succeeded());
        assert_eq!(report.completed, STAGES.to_vec());
        assert_eq!(report.heartbeats.len(), 4);
        assert_eq!(report.peak, Some(233.0));
    }

    #[tokio::test]
    async fn test_cold_stage_stops_run_with_partial_progress() {
        let report = process(vec![((1, "load"), Some(200.0))]).run(1).await;

        assert!(!report.succeeded());
        assert_eq!(report.completed, vec!["preheat"]);
        assert_eq!(report.failed_stage.as_deref(), Some("load"));
        assert_eq!(report.heartbeats.len(), 2);
        assert!(!report.heartbeats[1].ok);
        assert_eq!(report.peak, Some(230.0));
    }

    #[tokio::test]
    async fn test_missing_heartbeat_fails_stage() {
        let report = process(vec![((2, "preheat"), None)]).run(2).await;

        assert_eq!(report.failed_stage.as_deref(), Some("preheat"));
        assert!(report.completed.is_empty());
        assert_eq!(report.peak, None);
    }

    #[tokio::test]
    async fn test_report_value_shape() {
        let report = process(vec![((1, "finish"), Some(100.0))]).run(1).await;
        let value = report.to_value();
        assert_eq!(value["failed_stage"], "finish");
        assert_eq!(value["heartbeats"][3]["ok"], false);
    }
}
