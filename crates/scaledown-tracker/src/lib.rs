//! scaledown-tracker: how long nodes stay unneeded before they go away.
//!
//! The scale-down loop reports the current unneeded list on every pass;
//! the actuator reports each deletion just before it happens. From those
//! two signals the tracker measures, per node, the time from first being
//! unneeded to removal, minus the node's scale-down threshold, and hands
//! the result to a [`RemovalLatencyRecorder`](scaledown_core::RemovalLatencyRecorder).
//!
//! # Node lifecycle
//!
//! ```text
//! UNTRACKED --reconcile (appears in unneeded list)--> TRACKED
//!
//! TRACKED --observe_deletion--------------------------> UNTRACKED  (deleted="true")
//! TRACKED --reconcile (gone, not in deletion)---------> UNTRACKED  (deleted="false")
//! TRACKED --reconcile (gone, in deletion)-------------> TRACKED    (wait for actuator)
//!
//! latency = removed_at - unneeded_since - threshold
//! ```
//!
//! Each TRACKED -> UNTRACKED transition records exactly one sample.

pub mod tracker;

pub use tracker::{LatencyTracker, NodeLatencyTracker, NoopLatencyTracker, TrackerOptions};
