use std::path::Path;

use anyhow::bail;
use scaledown_metrics::render_prometheus;

use crate::scenario::{Scenario, replay};

pub fn run(scenario_path: &str, config_path: Option<&str>, format: &str) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let scenario = Scenario::from_file(Path::new(scenario_path))?;
    let outcome = replay(&scenario, &config)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        "prometheus" | "prom" => {
            print!("{}", render_prometheus(config.metrics_namespace(), &outcome.removals));
        }
        other => bail!("unsupported output format: {other} (expected prometheus or json)"),
    }

    Ok(())
}
