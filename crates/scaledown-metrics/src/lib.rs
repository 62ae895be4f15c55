//! scaledown-metrics: node removal latency as a Prometheus histogram.
//!
//! # Architecture
//!
//! ```text
//! NodeLatencyTracker
//!   └── record_removal(cause, latency) → RemovalLatencyCollector (atomics)
//!
//! RemovalLatencyCollector
//!   └── snapshot() → Vec<RemovalLatencySnapshot>, one per cause
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for a /metrics endpoint
//! ```

pub mod collector;
pub mod prometheus;

pub use collector::{RemovalLatencyCollector, RemovalLatencySnapshot};
pub use prometheus::render_prometheus;
