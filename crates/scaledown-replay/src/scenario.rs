//! Scenario files: a timed script of scale-down loop and actuator calls.
//!
//! ```toml
//! start = "2024-05-01T12:00:00Z"
//!
//! [[step]]
//! action = "reconcile"
//! at = "0s"
//! unneeded = ["node-a", "node-b"]
//!
//! [[step]]
//! action = "threshold"
//! at = "30s"
//! node = "node-a"
//! threshold = "2m"
//!
//! [[step]]
//! action = "delete"
//! at = "5m"
//! node = "node-a"
//! ```
//!
//! `at` is an offset from `start`, in the same duration syntax as
//! `scaledown.toml`. Offsets must not decrease from one step to the next.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use scaledown_core::config::parse_duration;
use scaledown_core::{NodeId, ScaledownConfig};
use scaledown_metrics::{RemovalLatencyCollector, RemovalLatencySnapshot};
use scaledown_tracker::{LatencyTracker, NodeLatencyTracker, TrackerOptions};

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    /// RFC 3339, quoted.
    pub start: DateTime<Utc>,
    #[serde(default, rename = "step")]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    Reconcile {
        at: String,
        #[serde(default)]
        unneeded: Vec<NodeId>,
        #[serde(default)]
        in_deletion: Vec<NodeId>,
    },
    Delete {
        at: String,
        node: NodeId,
    },
    Threshold {
        at: String,
        node: NodeId,
        threshold: String,
    },
}

impl Step {
    fn at(&self) -> &str {
        match self {
            Step::Reconcile { at, .. } | Step::Delete { at, .. } | Step::Threshold { at, .. } => at,
        }
    }
}

/// A tracker call with its time and arguments resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Reconcile {
        unneeded: Vec<NodeId>,
        in_deletion: HashSet<NodeId>,
    },
    Delete {
        node: NodeId,
    },
    Threshold {
        node: NodeId,
        threshold: TimeDelta,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimedAction {
    pub at: DateTime<Utc>,
    pub action: Action,
}

impl Scenario {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("failed to parse scenario {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Resolve every step, checking durations and ordering.
    pub fn timeline(&self) -> Result<Vec<TimedAction>> {
        let mut previous = TimeDelta::zero();
        let mut timeline = Vec::with_capacity(self.steps.len());

        for (i, step) in self.steps.iter().enumerate() {
            let offset = parse_duration(&format!("step[{i}].at"), step.at())?;
            if offset < previous {
                bail!(
                    "step[{i}] at {:?} is earlier than the step before it",
                    step.at()
                );
            }
            previous = offset;

            let action = match step {
                Step::Reconcile {
                    unneeded,
                    in_deletion,
                    ..
                } => Action::Reconcile {
                    unneeded: unneeded.clone(),
                    in_deletion: in_deletion.iter().cloned().collect(),
                },
                Step::Delete { node, .. } => Action::Delete { node: node.clone() },
                Step::Threshold {
                    node, threshold, ..
                } => Action::Threshold {
                    node: node.clone(),
                    threshold: parse_duration(&format!("step[{i}].threshold"), threshold)?,
                },
            };

            let at = self
                .start
                .checked_add_signed(offset)
                .with_context(|| format!("step[{i}].at {:?} is out of range", step.at()))?;
            timeline.push(TimedAction { at, action });
        }

        Ok(timeline)
    }
}

/// Result of replaying a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayOutcome {
    pub steps: usize,
    pub finished_at: DateTime<Utc>,
    /// Still tracked at the end, sorted.
    pub tracked: Vec<NodeId>,
    pub removals: Vec<RemovalLatencySnapshot>,
}

/// Drive a fresh tracker through `scenario`, recording into a collector
/// built from `config`.
pub fn replay(scenario: &Scenario, config: &ScaledownConfig) -> Result<ReplayOutcome> {
    let timeline = scenario.timeline()?;
    let collector = Arc::new(RemovalLatencyCollector::from_config(config)?);
    let tracker = NodeLatencyTracker::new(collector.clone())
        .with_options(TrackerOptions::from_config(config)?);

    let mut finished_at = scenario.start;
    for step in &timeline {
        debug!(at = %step.at, action = ?step.action, "replaying step");
        match &step.action {
            Action::Reconcile {
                unneeded,
                in_deletion,
            } => tracker.reconcile(unneeded, in_deletion, step.at),
            Action::Delete { node } => tracker.observe_deletion(node, step.at),
            Action::Threshold { node, threshold } => tracker.update_threshold(node, *threshold),
        }
        finished_at = step.at;
    }

    let mut tracked: Vec<NodeId> = tracker.tracked_node_ids().into_iter().collect();
    tracked.sort();

    info!(
        steps = timeline.len(),
        tracked = tracked.len(),
        "scenario replayed"
    );

    Ok(ReplayOutcome {
        steps: timeline.len(),
        finished_at,
        tracked,
        removals: collector.snapshot(),
    })
}
