use crate::output::print_json;
use crate::settings::Settings;
use anyhow::Context;
use std::time::Duration;

pub fn run(
    settings: &Settings,
    max_age_hours: Option<u64>,
    max_size_mb: Option<u64>,
    json: bool,
) -> anyhow::Result<()> {
    let prune = &settings.config.prune;
    let max_age = match max_age_hours {
        Some(h) => Duration::from_secs(h.saturating_mul(3600)),
        None => settings.config.prune_max_age(),
    };
    let max_size_mb = max_size_mb.unwrap_or(prune.max_size_mb);

    let model = settings.open_model()?;
    let stats = model
        .prune(max_age, max_size_mb)
        .context("prune failed")?;

    if json {
        print_json(&stats)?;
    } else {
        println!(
            "Deleted {} orphan action(s), {} operation(s) and {} of their action(s).",
            stats.orphan_actions_deleted, stats.operations_deleted, stats.operation_actions_deleted
        );
    }
    Ok(())
}
