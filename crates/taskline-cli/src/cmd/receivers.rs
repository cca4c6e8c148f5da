use crate::output::print_json;
use crate::settings::Settings;
use clap::Subcommand;
use taskline_core::{Life, ReceiverTag};

#[derive(Subcommand)]
pub enum ReceiversSubcommand {
    /// Register a receiver, or change its life
    SetLife {
        /// Receiver tag, e.g. unit-mysql-0 or machine-3
        tag: String,
        /// alive, dying or dead
        life: String,
    },
    /// Show a receiver's life and outstanding actions
    Show { tag: String },
}

pub fn run(settings: &Settings, subcmd: ReceiversSubcommand, json: bool) -> anyhow::Result<()> {
    let model = settings.open_model()?;
    let receivers = model.store_receivers();
    match subcmd {
        ReceiversSubcommand::SetLife { tag, life } => {
            let tag: ReceiverTag = tag.parse()?;
            let life: Life = life.parse()?;
            receivers.set_life(&tag, life)?;
            if json {
                print_json(&serde_json::json!({ "receiver": tag.to_string(), "life": life }))?;
            } else {
                println!("{tag} is {life}");
            }
        }
        ReceiversSubcommand::Show { tag } => {
            let tag: ReceiverTag = tag.parse()?;
            let life = receivers.life(&tag)?;
            let pending = model.pending_notifications(&tag)?;
            if json {
                print_json(&serde_json::json!({
                    "receiver": tag.to_string(),
                    "life": life,
                    "outstanding": pending,
                }))?;
            } else {
                let life = life.map(|l| l.to_string()).unwrap_or_else(|| "unknown".into());
                println!("{tag} ({}) is {life}", tag.id());
                if pending.is_empty() {
                    println!("No outstanding actions.");
                } else {
                    println!("Outstanding actions: {}", pending.join(", "));
                }
            }
        }
    }
    Ok(())
}
