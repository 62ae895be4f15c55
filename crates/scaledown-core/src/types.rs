//! Shared types used across scale-down latency crates.

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

/// Opaque node identifier, as supplied by the node catalog.
pub type NodeId = String;

/// Why a tracked node stopped being tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalCause {
    /// The scale-down actuator announced the deletion.
    ActuatorInitiated,
    /// The node left the unneeded list without an actuator deletion
    /// (became needed again, deleted manually, scaled in externally).
    NotActuatorInitiated,
}

impl RemovalCause {
    pub const ALL: [RemovalCause; 2] = [
        RemovalCause::ActuatorInitiated,
        RemovalCause::NotActuatorInitiated,
    ];

    /// Value of the `deleted` label on the removal latency histogram.
    pub fn deleted_label(&self) -> &'static str {
        match self {
            RemovalCause::ActuatorInitiated => "true",
            RemovalCause::NotActuatorInitiated => "false",
        }
    }

    /// Category name used in logs; same text as `Display`.
    pub fn label(&self) -> &'static str {
        match self {
            RemovalCause::ActuatorInitiated => "actuator-initiated",
            RemovalCause::NotActuatorInitiated => "not-actuator-initiated",
        }
    }
}

impl std::fmt::Display for RemovalCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Sink for node removal latency samples.
///
/// The tracker calls this once per removed node, after releasing its own
/// lock. Implementations must return promptly: no I/O, no waiting on other
/// locks held across tracker calls.
///
/// `latency` is signed. It is negative when the node's threshold exceeded
/// the time it spent unneeded, and must be recorded as-is.
pub trait RemovalLatencyRecorder: Send + Sync {
    fn record_removal(&self, cause: RemovalCause, latency: TimeDelta);
}

/// Recorder that drops every sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRecorder;

impl RemovalLatencyRecorder for NoopRecorder {
    fn record_removal(&self, _cause: RemovalCause, _latency: TimeDelta) {}
}
