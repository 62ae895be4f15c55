use std::path::Path;

use anyhow::Context;
use scaledown_core::ScaledownConfig;

pub mod run;
pub mod validate;

/// Load `scaledown.toml`, or defaults when no path is given.
fn load_config(path: Option<&str>) -> anyhow::Result<ScaledownConfig> {
    match path {
        Some(p) => ScaledownConfig::from_file(Path::new(p))
            .with_context(|| format!("failed to load config {p}")),
        None => Ok(ScaledownConfig::default()),
    }
}
