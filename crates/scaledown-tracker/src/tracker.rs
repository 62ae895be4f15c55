//! Node latency tracker: unneeded-time bookkeeping for scale-down.
//!
//! All state lives in one map behind a `std::sync::Mutex`. Lock hold time
//! is limited to map operations; recorder calls and logging happen after
//! the guard is dropped.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, warn};

use scaledown_core::{
    ConfigResult, NodeId, RemovalCause, RemovalLatencyRecorder, ScaledownConfig,
};

/// Tracks node removal latency for the scale-down loop and the actuator.
///
/// Every operation is total: unknown nodes and empty inputs are no-ops,
/// never errors.
pub trait LatencyTracker: Send + Sync {
    /// Called by the actuator immediately before deleting `node`.
    fn observe_deletion(&self, node: &str, timestamp: DateTime<Utc>);

    /// Sync with the scale-down loop's current view.
    ///
    /// Starts tracking every node in `unneeded` that is not yet tracked.
    /// Stops tracking every node missing from `unneeded`, unless it is in
    /// `in_deletion`, in which case the actuator's `observe_deletion` is
    /// expected to finish it off.
    fn reconcile(
        &self,
        unneeded: &[NodeId],
        in_deletion: &HashSet<NodeId>,
        timestamp: DateTime<Utc>,
    );

    /// Set the grace period subtracted from `node`'s latency on removal.
    fn update_threshold(&self, node: &str, threshold: TimeDelta);

    /// Snapshot of the currently tracked node ids.
    fn tracked_node_ids(&self) -> HashSet<NodeId>;
}

/// Tuning for [`NodeLatencyTracker`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerOptions {
    /// Evict a node that has waited this long in the in-deletion set
    /// (absent from the unneeded list) without an `observe_deletion`.
    /// `None` waits indefinitely.
    pub in_deletion_eviction: Option<TimeDelta>,
}

impl TrackerOptions {
    pub fn from_config(config: &ScaledownConfig) -> ConfigResult<Self> {
        Ok(Self {
            in_deletion_eviction: config.in_deletion_eviction()?,
        })
    }
}

/// Per-node tracking state.
#[derive(Debug, Clone)]
struct TrackedNode {
    /// Set on first observation; never changes while tracked.
    unneeded_since: DateTime<Utc>,
    threshold: TimeDelta,
    /// First reconcile that saw the node only in the in-deletion set.
    in_deletion_since: Option<DateTime<Utc>>,
}

impl TrackedNode {
    fn new(unneeded_since: DateTime<Utc>) -> Self {
        Self {
            unneeded_since,
            threshold: TimeDelta::zero(),
            in_deletion_since: None,
        }
    }

    /// `at - unneeded_since - threshold`, saturating instead of overflowing.
    fn removal_latency(&self, at: DateTime<Utc>) -> TimeDelta {
        let unneeded_for = at.signed_duration_since(self.unneeded_since);
        unneeded_for.checked_sub(&self.threshold).unwrap_or_else(|| {
            if self.threshold < TimeDelta::zero() {
                TimeDelta::MAX
            } else {
                TimeDelta::MIN
            }
        })
    }
}

/// A node taken out of the map, waiting to be recorded.
struct Removal {
    node: NodeId,
    cause: RemovalCause,
    unneeded_for: TimeDelta,
    threshold: TimeDelta,
    latency: TimeDelta,
    evicted: bool,
}

impl Removal {
    fn new(node: NodeId, cause: RemovalCause, info: &TrackedNode, at: DateTime<Utc>) -> Self {
        Self {
            node,
            cause,
            unneeded_for: at.signed_duration_since(info.unneeded_since),
            threshold: info.threshold,
            latency: info.removal_latency(at),
            evicted: false,
        }
    }
}

/// The tracker used by the scale-down loop.
pub struct NodeLatencyTracker {
    nodes: Mutex<HashMap<NodeId, TrackedNode>>,
    recorder: Arc<dyn RemovalLatencyRecorder>,
    options: TrackerOptions,
}

impl NodeLatencyTracker {
    /// Create a tracker that reports removals to `recorder`.
    pub fn new(recorder: Arc<dyn RemovalLatencyRecorder>) -> Self {
        Self {
            nodes: Mutex::new(HashMap::new()),
            recorder,
            options: TrackerOptions::default(),
        }
    }

    /// Replace the default options (no in-deletion eviction).
    pub fn with_options(mut self, options: TrackerOptions) -> Self {
        self.options = options;
        self
    }

    /// Options this tracker was built with.
    pub fn options(&self) -> TrackerOptions {
        self.options
    }

    /// Number of tracked nodes.
    pub fn len(&self) -> usize {
        self.lock_nodes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_nodes().is_empty()
    }

    /// When `node` started being tracked, if it is tracked.
    pub fn unneeded_since(&self, node: &str) -> Option<DateTime<Utc>> {
        self.lock_nodes().get(node).map(|n| n.unneeded_since)
    }

    /// Current threshold for `node`, if it is tracked.
    pub fn threshold(&self, node: &str) -> Option<TimeDelta> {
        self.lock_nodes().get(node).map(|n| n.threshold)
    }

    // A panic elsewhere while holding the lock cannot leave the map
    // half-updated (every mutation is a single insert/remove/assign), so
    // a poisoned lock is safe to reuse.
    fn lock_nodes(&self) -> MutexGuard<'_, HashMap<NodeId, TrackedNode>> {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, removals: Vec<Removal>) {
        for r in removals {
            if r.evicted {
                warn!(
                    node = %r.node,
                    unneeded_for_ms = r.unneeded_for.num_milliseconds(),
                    threshold_ms = r.threshold.num_milliseconds(),
                    "evicting node stuck in deletion without an observed deletion"
                );
            } else {
                debug!(
                    node = %r.node,
                    cause = %r.cause,
                    unneeded_for_ms = r.unneeded_for.num_milliseconds(),
                    threshold_ms = r.threshold.num_milliseconds(),
                    latency_ms = r.latency.num_milliseconds(),
                    "stopped tracking node"
                );
            }
            self.recorder.record_removal(r.cause, r.latency);
        }
    }
}

impl LatencyTracker for NodeLatencyTracker {
    fn observe_deletion(&self, node: &str, timestamp: DateTime<Utc>) {
        let removal = {
            let mut nodes = self.lock_nodes();
            nodes.remove_entry(node).map(|(name, info)| {
                Removal::new(name, RemovalCause::ActuatorInitiated, &info, timestamp)
            })
        };

        match removal {
            Some(r) => self.emit(vec![r]),
            None => debug!(node, "deletion observed for untracked node"),
        }
    }

    fn reconcile(
        &self,
        unneeded: &[NodeId],
        in_deletion: &HashSet<NodeId>,
        timestamp: DateTime<Utc>,
    ) {
        let current: HashSet<&str> = unneeded.iter().map(String::as_str).collect();
        let eviction = self.options.in_deletion_eviction;
        let mut started = Vec::new();
        let mut removals = Vec::new();

        {
            let mut nodes = self.lock_nodes();

            for name in unneeded {
                match nodes.get_mut(name.as_str()) {
                    Some(info) => info.in_deletion_since = None,
                    None => {
                        nodes.insert(name.clone(), TrackedNode::new(timestamp));
                        started.push(name.as_str());
                    }
                }
            }

            nodes.retain(|name, info| {
                if current.contains(name.as_str()) {
                    return true;
                }

                if in_deletion.contains(name) {
                    let pending_since = *info.in_deletion_since.get_or_insert(timestamp);
                    let overdue = eviction
                        .is_some_and(|limit| timestamp.signed_duration_since(pending_since) >= limit);
                    if overdue {
                        let mut removal = Removal::new(
                            name.clone(),
                            RemovalCause::NotActuatorInitiated,
                            info,
                            timestamp,
                        );
                        removal.evicted = true;
                        removals.push(removal);
                    }
                    return !overdue;
                }

                removals.push(Removal::new(
                    name.clone(),
                    RemovalCause::NotActuatorInitiated,
                    info,
                    timestamp,
                ));
                false
            });
        }

        for name in started {
            debug!(node = %name, since = %timestamp, "started tracking unneeded node");
        }
        self.emit(removals);
    }

    fn update_threshold(&self, node: &str, threshold: TimeDelta) {
        let updated = {
            let mut nodes = self.lock_nodes();
            match nodes.get_mut(node) {
                Some(info) => {
                    info.threshold = threshold;
                    true
                }
                None => false,
            }
        };

        if updated {
            debug!(node, threshold_ms = threshold.num_milliseconds(), "updated node threshold");
        } else {
            warn!(node, "attempted to update threshold for unknown node");
        }
    }

    fn tracked_node_ids(&self) -> HashSet<NodeId> {
        self.lock_nodes().keys().cloned().collect()
    }
}

/// Tracker for when latency tracking is disabled. Tracks nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLatencyTracker;

impl LatencyTracker for NoopLatencyTracker {
    fn observe_deletion(&self, _node: &str, _timestamp: DateTime<Utc>) {}

    fn reconcile(
        &self,
        _unneeded: &[NodeId],
        _in_deletion: &HashSet<NodeId>,
        _timestamp: DateTime<Utc>,
    ) {
    }

    fn update_threshold(&self, _node: &str, _threshold: TimeDelta) {}

    fn tracked_node_ids(&self) -> HashSet<NodeId> {
        HashSet::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[derive(Default)]
    struct RecordingRecorder {
        samples: Mutex<Vec<(RemovalCause, TimeDelta)>>,
    }

    impl RecordingRecorder {
        fn samples(&self) -> Vec<(RemovalCause, TimeDelta)> {
            self.samples.lock().unwrap().clone()
        }
    }

    impl RemovalLatencyRecorder for RecordingRecorder {
        fn record_removal(&self, cause: RemovalCause, latency: TimeDelta) {
            self.samples.lock().unwrap().push((cause, latency));
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn ids(names: &[&str]) -> Vec<NodeId> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn set(names: &[&str]) -> HashSet<NodeId> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn tracker() -> (NodeLatencyTracker, Arc<RecordingRecorder>) {
        let recorder = Arc::new(RecordingRecorder::default());
        (NodeLatencyTracker::new(recorder.clone()), recorder)
    }

    #[test]
    fn reconcile_tracks_new_nodes() {
        let (tracker, recorder) = tracker();

        tracker.reconcile(&ids(&["n1", "n2"]), &set(&[]), t0());

        assert_eq!(tracker.tracked_node_ids(), set(&["n1", "n2"]));
        assert_eq!(tracker.unneeded_since("n1"), Some(t0()));
        assert_eq!(tracker.threshold("n2"), Some(TimeDelta::zero()));
        assert!(recorder.samples().is_empty());
    }

    #[test]
    fn reconcile_is_idempotent_for_tracked_nodes() {
        let (tracker, recorder) = tracker();

        tracker.reconcile(&ids(&["n1"]), &set(&[]), t0());
        tracker.reconcile(&ids(&["n1"]), &set(&[]), t0() + TimeDelta::minutes(1));
        tracker.reconcile(&ids(&["n1", "n1"]), &set(&[]), t0() + TimeDelta::minutes(2));

        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.unneeded_since("n1"), Some(t0()));
        assert!(recorder.samples().is_empty());
    }

    #[test]
    fn reconcile_removes_nodes_that_stopped_being_unneeded() {
        let (tracker, recorder) = tracker();

        tracker.reconcile(&ids(&["n1", "n2"]), &set(&[]), t0());
        tracker.reconcile(&ids(&["n2"]), &set(&[]), t0() + TimeDelta::minutes(5));

        assert_eq!(tracker.tracked_node_ids(), set(&["n2"]));
        assert_eq!(tracker.unneeded_since("n2"), Some(t0()));
        assert_eq!(
            recorder.samples(),
            vec![(RemovalCause::NotActuatorInitiated, TimeDelta::minutes(5))]
        );
    }

    #[test]
    fn empty_reconcile_removes_everything_not_in_deletion() {
        let (tracker, recorder) = tracker();

        tracker.reconcile(&ids(&["n1", "n2", "n3"]), &set(&[]), t0());
        tracker.reconcile(&[], &set(&["n3"]), t0() + TimeDelta::seconds(30));

        assert_eq!(tracker.tracked_node_ids(), set(&["n3"]));
        assert_eq!(recorder.samples().len(), 2);
    }

    #[test]
    fn empty_inputs_on_empty_tracker_are_noops() {
        let (tracker, recorder) = tracker();

        tracker.reconcile(&[], &set(&[]), t0());
        tracker.reconcile(&[], &set(&["ghost"]), t0());

        assert!(tracker.is_empty());
        assert!(recorder.samples().is_empty());
    }

    #[test]
    fn in_deletion_nodes_wait_for_actuator() {
        let (tracker, recorder) = tracker();

        tracker.reconcile(&ids(&["n1"]), &set(&[]), t0());
        tracker.reconcile(&[], &set(&["n1"]), t0() + TimeDelta::minutes(4));

        assert_eq!(tracker.tracked_node_ids(), set(&["n1"]));
        assert!(recorder.samples().is_empty());

        tracker.observe_deletion("n1", t0() + TimeDelta::minutes(5));

        assert!(tracker.is_empty());
        assert_eq!(
            recorder.samples(),
            vec![(RemovalCause::ActuatorInitiated, TimeDelta::minutes(5))]
        );
    }

    #[test]
    fn observe_deletion_subtracts_threshold() {
        let (tracker, recorder) = tracker();

        tracker.reconcile(&ids(&["n1"]), &set(&[]), t0());
        tracker.update_threshold("n1", TimeDelta::minutes(2));
        tracker.observe_deletion("n1", t0() + TimeDelta::minutes(5));

        assert_eq!(
            recorder.samples(),
            vec![(RemovalCause::ActuatorInitiated, TimeDelta::minutes(3))]
        );
    }

    #[test]
    fn latency_may_be_negative() {
        let (tracker, recorder) = tracker();

        tracker.reconcile(&ids(&["n1"]), &set(&[]), t0());
        tracker.update_threshold("n1", TimeDelta::minutes(10));
        tracker.reconcile(&[], &set(&[]), t0() + TimeDelta::minutes(4));

        assert_eq!(
            recorder.samples(),
            vec![(RemovalCause::NotActuatorInitiated, TimeDelta::minutes(-6))]
        );
    }

    #[test]
    fn latest_threshold_wins() {
        let (tracker, recorder) = tracker();

        tracker.reconcile(&ids(&["n1"]), &set(&[]), t0());
        tracker.update_threshold("n1", TimeDelta::minutes(1));
        tracker.update_threshold("n1", TimeDelta::minutes(7));
        tracker.update_threshold("n1", TimeDelta::seconds(90));
        tracker.observe_deletion("n1", t0() + TimeDelta::minutes(10));

        assert_eq!(tracker.threshold("n1"), None);
        assert_eq!(
            recorder.samples(),
            vec![(RemovalCause::ActuatorInitiated, TimeDelta::seconds(510))]
        );
    }

    #[test]
    fn observe_deletion_of_untracked_node_is_noop() {
        let (tracker, recorder) = tracker();

        tracker.reconcile(&ids(&["n1"]), &set(&[]), t0());
        tracker.observe_deletion("n2", t0() + TimeDelta::minutes(1));

        assert_eq!(tracker.tracked_node_ids(), set(&["n1"]));
        assert!(recorder.samples().is_empty());
    }

    #[test]
    fn observe_deletion_twice_records_once() {
        let (tracker, recorder) = tracker();

        tracker.reconcile(&ids(&["n1"]), &set(&[]), t0());
        tracker.observe_deletion("n1", t0() + TimeDelta::minutes(1));
        tracker.observe_deletion("n1", t0() + TimeDelta::minutes(2));

        assert_eq!(recorder.samples().len(), 1);
    }

    #[test]
    fn update_threshold_of_untracked_node_is_noop() {
        let (tracker, recorder) = tracker();

        tracker.update_threshold("n1", TimeDelta::minutes(3));
        assert!(tracker.is_empty());

        // A threshold set before tracking starts must not leak in.
        tracker.reconcile(&ids(&["n1"]), &set(&[]), t0());
        assert_eq!(tracker.threshold("n1"), Some(TimeDelta::zero()));
        assert!(recorder.samples().is_empty());
    }

    #[test]
    fn tracked_node_ids_is_a_snapshot() {
        let (tracker, _recorder) = tracker();

        tracker.reconcile(&ids(&["n1", "n2"]), &set(&[]), t0());
        let mut snapshot = tracker.tracked_node_ids();
        snapshot.insert("n3".to_string());
        snapshot.remove("n1");

        assert_eq!(tracker.tracked_node_ids(), set(&["n1", "n2"]));

        tracker.observe_deletion("n2", t0());
        assert!(snapshot.contains("n2"));
    }

    #[test]
    fn node_can_be_tracked_again_with_fresh_start() {
        let (tracker, recorder) = tracker();

        tracker.reconcile(&ids(&["n1"]), &set(&[]), t0());
        tracker.update_threshold("n1", TimeDelta::minutes(1));
        tracker.reconcile(&[], &set(&[]), t0() + TimeDelta::minutes(2));

        let again = t0() + TimeDelta::minutes(10);
        tracker.reconcile(&ids(&["n1"]), &set(&[]), again);
        assert_eq!(tracker.unneeded_since("n1"), Some(again));
        assert_eq!(tracker.threshold("n1"), Some(TimeDelta::zero()));

        tracker.observe_deletion("n1", again + TimeDelta::minutes(3));
        assert_eq!(
            recorder.samples(),
            vec![
                (RemovalCause::NotActuatorInitiated, TimeDelta::minutes(1)),
                (RemovalCause::ActuatorInitiated, TimeDelta::minutes(3)),
            ]
        );
    }

    #[test]
    fn extreme_thresholds_saturate() {
        let (tracker, recorder) = tracker();

        tracker.reconcile(&ids(&["lo", "hi"]), &set(&[]), t0());
        tracker.update_threshold("lo", TimeDelta::MAX);
        tracker.update_threshold("hi", TimeDelta::MIN);
        tracker.observe_deletion("lo", t0() - TimeDelta::days(1));
        tracker.observe_deletion("hi", t0() + TimeDelta::days(1));

        assert_eq!(
            recorder.samples(),
            vec![
                (RemovalCause::ActuatorInitiated, TimeDelta::MIN),
                (RemovalCause::ActuatorInitiated, TimeDelta::MAX),
            ]
        );
    }

    #[test]
    fn stuck_in_deletion_node_is_kept_without_eviction() {
        let (tracker, recorder) = tracker();

        tracker.reconcile(&ids(&["n1"]), &set(&[]), t0());
        for hours in 1..=48 {
            tracker.reconcile(&[], &set(&["n1"]), t0() + TimeDelta::hours(hours));
        }

        assert_eq!(tracker.tracked_node_ids(), set(&["n1"]));
        assert!(recorder.samples().is_empty());
    }

    #[test]
    fn stuck_in_deletion_node_is_evicted_after_limit() {
        let recorder = Arc::new(RecordingRecorder::default());
        let tracker = NodeLatencyTracker::new(recorder.clone()).with_options(TrackerOptions {
            in_deletion_eviction: Some(TimeDelta::minutes(10)),
        });

        tracker.reconcile(&ids(&["n1"]), &set(&[]), t0());
        let pending = t0() + TimeDelta::minutes(5);
        tracker.reconcile(&[], &set(&["n1"]), pending);
        tracker.reconcile(&[], &set(&["n1"]), pending + TimeDelta::minutes(9));
        assert_eq!(tracker.len(), 1);

        tracker.reconcile(&[], &set(&["n1"]), pending + TimeDelta::minutes(10));
        assert!(tracker.is_empty());
        assert_eq!(
            recorder.samples(),
            vec![(RemovalCause::NotActuatorInitiated, TimeDelta::minutes(15))]
        );

        // Late actuator notification finds nothing to record.
        tracker.observe_deletion("n1", pending + TimeDelta::minutes(11));
        assert_eq!(recorder.samples().len(), 1);
    }

    #[test]
    fn reappearing_node_resets_eviction_clock() {
        let recorder = Arc::new(RecordingRecorder::default());
        let tracker = NodeLatencyTracker::new(recorder.clone()).with_options(TrackerOptions {
            in_deletion_eviction: Some(TimeDelta::minutes(10)),
        });

        tracker.reconcile(&ids(&["n1"]), &set(&[]), t0());
        tracker.reconcile(&[], &set(&["n1"]), t0() + TimeDelta::minutes(1));
        tracker.reconcile(&ids(&["n1"]), &set(&["n1"]), t0() + TimeDelta::minutes(8));
        tracker.reconcile(&[], &set(&["n1"]), t0() + TimeDelta::minutes(12));
        tracker.reconcile(&[], &set(&["n1"]), t0() + TimeDelta::minutes(21));

        assert_eq!(tracker.unneeded_since("n1"), Some(t0()));
        assert!(recorder.samples().is_empty());

        tracker.reconcile(&[], &set(&["n1"]), t0() + TimeDelta::minutes(22));
        assert!(tracker.is_empty());
        assert_eq!(recorder.samples().len(), 1);
    }

    #[test]
    fn options_from_config() {
        let config = ScaledownConfig::from_toml_str("[tracker]\nin_deletion_eviction = \"20m\"\n")
            .unwrap();
        let options = TrackerOptions::from_config(&config).unwrap();
        assert_eq!(options.in_deletion_eviction, Some(TimeDelta::minutes(20)));

        let defaults = TrackerOptions::from_config(&ScaledownConfig::default()).unwrap();
        assert_eq!(defaults, TrackerOptions::default());
    }

    #[test]
    fn tracks_with_noop_recorder() {
        let tracker = NodeLatencyTracker::new(Arc::new(scaledown_core::NoopRecorder));

        tracker.reconcile(&ids(&["n1", "n2"]), &set(&[]), t0());
        tracker.observe_deletion("n1", t0() + TimeDelta::minutes(1));

        assert_eq!(tracker.tracked_node_ids(), set(&["n2"]));
        assert_eq!(tracker.options(), TrackerOptions::default());
    }

    #[test]
    fn noop_tracker_tracks_nothing() {
        let tracker: Arc<dyn LatencyTracker> = Arc::new(NoopLatencyTracker);

        tracker.reconcile(&ids(&["n1"]), &set(&[]), t0());
        tracker.update_threshold("n1", TimeDelta::minutes(1));
        tracker.observe_deletion("n1", t0());

        assert!(tracker.tracked_node_ids().is_empty());
    }
}
