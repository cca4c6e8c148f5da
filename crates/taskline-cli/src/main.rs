mod cmd;
mod output;
mod settings;

use clap::{Parser, Subcommand};
use cmd::{
    actions::ActionsSubcommand, config::ConfigSubcommand, operations::OperationsSubcommand,
    receivers::ReceiversSubcommand,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "taskline",
    about = "Queue, drive and inspect actions and operations in a taskline store",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: ./taskline.yaml)
    #[arg(long, global = true, env = "TASKLINE_CONFIG")]
    config: Option<PathBuf>,

    /// Store file, overriding store_path from the config
    #[arg(long, global = true, env = "TASKLINE_STORE")]
    store: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enqueue, drive and list actions
    Actions {
        #[command(subcommand)]
        subcommand: ActionsSubcommand,
    },

    /// Enqueue and list operations
    Operations {
        #[command(subcommand)]
        subcommand: OperationsSubcommand,
    },

    /// Register receivers and change their life
    Receivers {
        #[command(subcommand)]
        subcommand: ReceiversSubcommand,
    },

    /// Delete finished history past the age or size limits
    Prune {
        /// Override prune.max_age_hours (0 disables the age limit)
        #[arg(long)]
        max_age_hours: Option<u64>,

        /// Override prune.max_size_mb (0 disables the size limit)
        #[arg(long)]
        max_size_mb: Option<u64>,
    },

    /// Show, validate or initialise the config
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Prune { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = settings::load(cli.config.as_deref(), cli.store.as_deref()).and_then(|s| {
        match cli.command {
            Commands::Actions { subcommand } => cmd::actions::run(&s, subcommand, cli.json),
            Commands::Operations { subcommand } => {
                cmd::operations::run(&s, subcommand, cli.json)
            }
            Commands::Receivers { subcommand } => cmd::receivers::run(&s, subcommand, cli.json),
            Commands::Prune {
                max_age_hours,
                max_size_mb,
            } => cmd::prune::run(&s, max_age_hours, max_size_mb, cli.json),
            Commands::Config { subcommand } => cmd::config::run(&s, subcommand, cli.json),
        }
    });

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
