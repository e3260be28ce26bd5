//! Maintenance Cycle: the serialized background sweep.
//!
//! Stages run in a fixed order (topology healing, hypha healing, trail
//! evaporation, memory decay, stuck-ant detection) because topology health
//! feeds the routing cost functions used by the later stages. The cycle only
//! knows the capability traits below, never the concrete subsystems.
//!
//! Each stage is isolated: an error or panic in one is recorded in the report
//! and the remaining stages still run.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::error::FabricResult;

/// What one stage did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageOutcome {
    /// Records whose state changed
    pub touched: usize,
    /// Records removed or retired
    pub removed: usize,
    /// Per-record problems that were skipped over
    pub errors: Vec<String>,
}

impl StageOutcome {
    pub fn is_noop(&self) -> bool {
        self.touched == 0 && self.removed == 0
    }
}

/// Restores health over time.
pub trait Healable: Send + Sync {
    fn heal(&self) -> FabricResult<StageOutcome>;
}

/// Lets stale state fade.
pub trait Decayable: Send + Sync {
    fn decay(&self) -> FabricResult<StageOutcome>;
}

/// Retires work that can no longer make progress.
pub trait Reapable: Send + Sync {
    fn reap(&self) -> FabricResult<StageOutcome>;
}

pub enum StageTask {
    Heal(Arc<dyn Healable>),
    Decay(Arc<dyn Decayable>),
    Reap(Arc<dyn Reapable>),
}

impl StageTask {
    fn run(&self) -> FabricResult<StageOutcome> {
        match self {
            StageTask::Heal(h) => h.heal(),
            StageTask::Decay(d) => d.decay(),
            StageTask::Reap(r) => r.reap(),
        }
    }
}

struct Stage {
    name: &'static str,
    task: StageTask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// Another cycle is still running
    Overlapping,
    /// The previous cycle finished less than the minimum spacing ago
    TooSoon,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageReport {
    pub stage: &'static str,
    pub outcome: Option<StageOutcome>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    pub started_at: DateTime<Utc>,
    pub skipped: Option<SkipReason>,
    pub stages: Vec<StageReport>,
}

impl MaintenanceReport {
    fn skipped(started_at: DateTime<Utc>, reason: SkipReason) -> Self {
        Self {
            started_at,
            skipped: Some(reason),
            stages: Vec::new(),
        }
    }

    pub fn failed_stages(&self) -> Vec<&'static str> {
        self.stages
            .iter()
            .filter(|s| s.error.is_some())
            .map(|s| s.stage)
            .collect()
    }
}

pub struct MaintenanceCycle {
    stages: Vec<Stage>,
    clock: Arc<dyn Clock>,
    min_spacing: Duration,
    running: Mutex<()>,
    last_run: Mutex<Option<DateTime<Utc>>>,
}

impl MaintenanceCycle {
    pub fn new(clock: Arc<dyn Clock>, min_spacing_secs: i64) -> Self {
        Self {
            stages: Vec::new(),
            clock,
            min_spacing: Duration::seconds(min_spacing_secs),
            running: Mutex::new(()),
            last_run: Mutex::new(None),
        }
    }

    /// Append a stage; stages run in insertion order.
    pub fn with_stage(mut self, name: &'static str, task: StageTask) -> Self {
        self.stages.push(Stage { name, task });
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name).collect()
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        *self.last_run.lock()
    }

    pub fn run(&self) -> MaintenanceReport {
        let started_at = self.clock.now();
        let Some(_running) = self.running.try_lock() else {
            debug!("Maintenance cycle already running, skipping");
            return MaintenanceReport::skipped(started_at, SkipReason::Overlapping);
        };

        if let Some(previous) = *self.last_run.lock() {
            if started_at.signed_duration_since(previous) < self.min_spacing {
                debug!(previous = %previous, "Maintenance cycle requested too soon, skipping");
                return MaintenanceReport::skipped(started_at, SkipReason::TooSoon);
            }
        }

        let mut stages = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            let result = catch_unwind(AssertUnwindSafe(|| stage.task.run()));
            let report = match result {
                Ok(Ok(outcome)) => {
                    for problem in &outcome.errors {
                        warn!(stage = stage.name, problem = %problem, "Maintenance skipped a record");
                    }
                    StageReport {
                        stage: stage.name,
                        outcome: Some(outcome),
                        error: None,
                    }
                }
                Ok(Err(e)) => {
                    error!(stage = stage.name, error = %e, "Maintenance stage failed");
                    StageReport {
                        stage: stage.name,
                        outcome: None,
                        error: Some(e.to_string()),
                    }
                }
                Err(_) => {
                    error!(stage = stage.name, "Maintenance stage panicked");
                    StageReport {
                        stage: stage.name,
                        outcome: None,
                        error: Some("stage panicked".to_string()),
                    }
                }
            };
            stages.push(report);
        }

        *self.last_run.lock() = Some(self.clock.now());
        info!(
            stages = stages.len(),
            failed = stages.iter().filter(|s| s.error.is_some()).count(),
            "Maintenance cycle complete"
        );
        MaintenanceReport {
            started_at,
            skipped: None,
            stages,
        }
    }
}
