use crate::output::print_json;
use crate::settings::Settings;
use anyhow::Context;
use clap::Subcommand;
use taskline_core::config::WarnLevel;
use taskline_core::Config;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show the effective configuration
    Show,

    /// Validate the config for common mistakes
    Validate,

    /// Write a config file with the defaults
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub fn run(settings: &Settings, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Show => show(settings, json),
        ConfigSubcommand::Validate => validate(settings, json),
        ConfigSubcommand::Init { force } => init(settings, force),
    }
}

fn show(settings: &Settings, json: bool) -> anyhow::Result<()> {
    let cfg = &settings.config;
    if json {
        print_json(cfg)?;
        return Ok(());
    }
    println!("Config file:   {}", settings.config_path.display());
    println!("Model:         {}", cfg.model_uuid);
    println!("Agent version: {}", cfg.agent_version);
    println!("Store:         {}", cfg.store_path.display());
    println!("Txn attempts:  {}", cfg.txn.max_attempts);
    println!("Prune age:     {}h", cfg.prune.max_age_hours);
    println!("Prune size:    {} MB", cfg.prune.max_size_mb);
    Ok(())
}

fn validate(settings: &Settings, json: bool) -> anyhow::Result<()> {
    let warnings = settings.config.validate();

    if json {
        let value = serde_json::json!({
            "warnings": warnings,
        });
        print_json(&value)?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}

fn init(settings: &Settings, force: bool) -> anyhow::Result<()> {
    let path = &settings.config_path;
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    Config::default()
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}
