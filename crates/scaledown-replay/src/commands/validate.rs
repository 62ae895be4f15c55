use std::path::Path;

use crate::scenario::Scenario;

pub fn validate(scenario_path: &str, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    config.in_deletion_eviction()?;
    config.histogram_buckets()?;

    let scenario = Scenario::from_file(Path::new(scenario_path))?;
    let timeline = scenario.timeline()?;

    let end = timeline.last().map(|s| s.at).unwrap_or(scenario.start);
    println!("✓ {} steps, {} to {}", timeline.len(), scenario.start, end);
    Ok(())
}
