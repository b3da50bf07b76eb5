//! `steward simulate`: replay a scripted conversation.

use std::path::Path;

use anyhow::Context;

use sw_domain::config::Config;
use sw_runtime::{Script, Simulation};

pub fn load_script(path: &Path) -> anyhow::Result<Script> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading script {}", path.display()))?;
    Script::from_json(&raw).with_context(|| format!("parsing script {}", path.display()))
}

/// Run the script and return the JSON report.
pub async fn run(config: &Config, path: &Path, summary: bool) -> anyhow::Result<serde_json::Value> {
    let script = load_script(path)?;
    let simulation: Simulation = sw_runtime::simulate(&script, config)
        .await
        .context("running simulation")?;

    if !simulation.consistency.is_empty() {
        tracing::warn!(problems = ?simulation.consistency, "registry inconsistent after simulation");
    }

    let report = if summary {
        serde_json::to_value(&simulation.segments)?
    } else {
        serde_json::to_value(&simulation)?
    };
    Ok(report)
}
