//! scaledown.toml configuration parser.

use std::path::Path;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Default metric namespace, matching the host autoscaler's metric prefix.
pub const DEFAULT_NAMESPACE: &str = "cluster_autoscaler";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScaledownConfig {
    pub tracker: Option<TrackerConfig>,
    pub metrics: Option<MetricsConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// How long a node may sit in the in-deletion set, absent from the
    /// unneeded list, before reconciliation stops waiting for the actuator
    /// and evicts it. Unset means wait forever.
    pub in_deletion_eviction: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub namespace: Option<String>,
    /// Histogram upper bounds in seconds.
    pub buckets: Option<Vec<f64>>,
}

impl ScaledownConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Parsed `[tracker].in_deletion_eviction`.
    pub fn in_deletion_eviction(&self) -> ConfigResult<Option<TimeDelta>> {
        self.tracker
            .as_ref()
            .and_then(|t| t.in_deletion_eviction.as_deref())
            .map(|raw| parse_duration("tracker.in_deletion_eviction", raw))
            .transpose()
    }

    pub fn metrics_namespace(&self) -> &str {
        self.metrics
            .as_ref()
            .and_then(|m| m.namespace.as_deref())
            .unwrap_or(DEFAULT_NAMESPACE)
    }

    /// Histogram bucket bounds, validated, or the defaults when unset.
    pub fn histogram_buckets(&self) -> ConfigResult<Vec<f64>> {
        match self.metrics.as_ref().and_then(|m| m.buckets.as_ref()) {
            Some(buckets) => {
                validate_buckets(buckets)?;
                Ok(buckets.clone())
            }
            None => Ok(default_buckets()),
        }
    }
}

/// Exponential buckets from one second, doubling, up to roughly nine hours.
pub fn default_buckets() -> Vec<f64> {
    (0..16).map(|k| f64::from(1u32 << k)).collect()
}

fn validate_buckets(buckets: &[f64]) -> ConfigResult<()> {
    if buckets.is_empty() {
        return Err(ConfigError::InvalidBuckets("bucket list is empty".to_string()));
    }
    if let Some(b) = buckets.iter().find(|b| !b.is_finite()) {
        return Err(ConfigError::InvalidBuckets(format!("non-finite bound {b}")));
    }
    if let Some(w) = buckets.windows(2).find(|w| w[0] >= w[1]) {
        return Err(ConfigError::InvalidBuckets(format!(
            "bounds must be strictly increasing, got {} then {}",
            w[0], w[1]
        )));
    }
    Ok(())
}

/// Parse a duration string like "30s", "5m", "2h" or bare seconds.
///
/// `field` only names the setting in the error.
pub fn parse_duration(field: &str, raw: &str) -> ConfigResult<TimeDelta> {
    let invalid = || ConfigError::InvalidDuration {
        field: field.to_string(),
        value: raw.to_string(),
    };

    let s = raw.trim();
    let (digits, unit_secs) = if let Some(h) = s.strip_suffix('h') {
        (h, 3600)
    } else if let Some(m) = s.strip_suffix('m') {
        (m, 60)
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, 1)
    } else {
        (s, 1)
    };

    let value: i64 = digits.trim().parse::<u32>().map_err(|_| invalid())?.into();
    TimeDelta::try_seconds(value * unit_secs).ok_or_else(invalid)
}
