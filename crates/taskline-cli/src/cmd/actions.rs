use crate::output::{print_json, print_table, stamp};
use crate::settings::Settings;
use anyhow::Context;
use clap::Subcommand;
use serde_json::{Map, Value};
use taskline_core::{Action, ActionResults, ActionStatus, Model, ReceiverTag, StatusFilter};

#[derive(Subcommand)]
pub enum ActionsSubcommand {
    /// Queue an action for a receiver under an existing operation
    Enqueue {
        operation: String,
        /// Receiver tag, e.g. unit-mysql-0 or machine-3
        receiver: String,
        name: String,
        /// Parameter as KEY=VALUE; VALUE is parsed as JSON when it can be
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
    },
    /// Mark a pending action running
    Begin { id: String },
    /// Record the outcome of an action
    Finish {
        id: String,
        /// completed, failed or cancelled
        #[arg(long)]
        status: String,
        #[arg(long, default_value = "")]
        message: String,
        /// Result as KEY=VALUE; VALUE is parsed as JSON when it can be
        #[arg(long = "result", value_name = "KEY=VALUE")]
        results: Vec<String>,
    },
    /// Cancel an action that has not finished
    Cancel { id: String },
    /// Append a progress message to a running action
    Log {
        id: String,
        #[arg(required = true)]
        message: Vec<String>,
    },
    /// List actions
    List {
        /// Only actions for this receiver tag
        #[arg(long)]
        receiver: Option<String>,
        /// pending, running or terminal
        #[arg(long)]
        status: Option<String>,
        /// Only actions with this name
        #[arg(long)]
        name: Option<String>,
    },
    /// Show one action with its results and log
    Show { id: String },
    /// Find action tags by id or id prefix
    Find { prefix: String },
}

pub fn run(settings: &Settings, subcmd: ActionsSubcommand, json: bool) -> anyhow::Result<()> {
    let model = settings.open_model()?;
    match subcmd {
        ActionsSubcommand::Enqueue {
            operation,
            receiver,
            name,
            params,
        } => enqueue(&model, &operation, &receiver, &name, &params, json),
        ActionsSubcommand::Begin { id } => begin(&model, &id, json),
        ActionsSubcommand::Finish {
            id,
            status,
            message,
            results,
        } => finish(&model, &id, &status, message, &results, json),
        ActionsSubcommand::Cancel { id } => cancel(&model, &id, json),
        ActionsSubcommand::Log { id, message } => log(&model, &id, &message.join(" ")),
        ActionsSubcommand::List {
            receiver,
            status,
            name,
        } => list(
            &model,
            receiver.as_deref(),
            status.as_deref(),
            name.as_deref(),
            json,
        ),
        ActionsSubcommand::Show { id } => show(&model, &id, json),
        ActionsSubcommand::Find { prefix } => find(&model, &prefix, json),
    }
}

/// Parse `KEY=VALUE` pairs into a JSON object.
fn parse_pairs(pairs: &[String]) -> anyhow::Result<Map<String, Value>> {
    let mut map = Map::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .with_context(|| format!("expected KEY=VALUE, got '{pair}'"))?;
        if key.is_empty() {
            anyhow::bail!("empty key in '{pair}'");
        }
        let value =
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        map.insert(key.to_string(), value);
    }
    Ok(map)
}

fn summary(action: &Action) {
    println!(
        "Action {} ({}) on {}: {}",
        action.id(),
        action.name(),
        action.receiver(),
        action.status()
    );
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

fn enqueue(
    model: &Model,
    operation: &str,
    receiver: &str,
    name: &str,
    params: &[String],
    json: bool,
) -> anyhow::Result<()> {
    let tag: ReceiverTag = receiver.parse()?;
    let parameters = parse_pairs(params)?;
    let action = model
        .enqueue_action(operation, &tag, name, parameters)
        .with_context(|| format!("failed to enqueue '{name}' for {tag}"))?;
    if json {
        print_json(&action)?;
    } else {
        println!("Enqueued action {} ({name}) for {}", action.id(), action.receiver());
    }
    Ok(())
}

fn begin(model: &Model, id: &str, json: bool) -> anyhow::Result<()> {
    let action = model.action(id)?.begin()?;
    if json {
        print_json(&action)?;
    } else {
        summary(&action);
    }
    Ok(())
}

fn finish(
    model: &Model,
    id: &str,
    status: &str,
    message: String,
    results: &[String],
    json: bool,
) -> anyhow::Result<()> {
    let status: ActionStatus = status.parse()?;
    let outcome = ActionResults {
        status,
        results: parse_pairs(results)?,
        message,
    };
    let action = model.action(id)?.finish(outcome)?;
    if json {
        print_json(&action)?;
    } else {
        summary(&action);
    }
    Ok(())
}

fn cancel(model: &Model, id: &str, json: bool) -> anyhow::Result<()> {
    let action = model.action(id)?.cancel()?;
    if json {
        print_json(&action)?;
    } else {
        summary(&action);
    }
    Ok(())
}

fn log(model: &Model, id: &str, message: &str) -> anyhow::Result<()> {
    model.action(id)?.log(message)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

fn list(
    model: &Model,
    receiver: Option<&str>,
    status: Option<&str>,
    name: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let filter: Option<StatusFilter> = status.map(str::parse).transpose()?;
    let receiver: Option<ReceiverTag> = receiver.map(str::parse).transpose()?;

    let mut actions = match (&receiver, filter) {
        (Some(tag), Some(f)) => model.actions_by_receiver_and_status(tag, f)?,
        (Some(tag), None) => model.actions_for_receiver(tag.id())?,
        (None, _) => match name {
            Some(n) => model.find_actions_by_name(n)?,
            None => model.all_actions()?,
        },
    };
    if let Some(f) = filter {
        actions.retain(|a| f.matches(a.status()));
    }
    if let Some(n) = name {
        actions.retain(|a| a.name() == n);
    }

    if json {
        print_json(&actions)?;
        return Ok(());
    }
    if actions.is_empty() {
        println!("No actions.");
        return Ok(());
    }
    let rows = actions
        .iter()
        .map(|a| {
            vec![
                a.id().to_string(),
                a.receiver().to_string(),
                a.name().to_string(),
                a.operation_id().unwrap_or("-").to_string(),
                a.status().to_string(),
                stamp(Some(a.enqueued())),
            ]
        })
        .collect();
    print_table(
        &["ID", "RECEIVER", "NAME", "OPERATION", "STATUS", "ENQUEUED"],
        rows,
    );
    Ok(())
}

fn show(model: &Model, id: &str, json: bool) -> anyhow::Result<()> {
    let action = model.action(id)?;
    if json {
        print_json(&action)?;
        return Ok(());
    }
    println!("Action:    {}", action.id());
    println!("Name:      {}", action.name());
    println!("Receiver:  {}", action.receiver());
    println!("Operation: {}", action.operation_id().unwrap_or("-"));
    println!("Status:    {}", action.status());
    println!("Enqueued:  {}", stamp(Some(action.enqueued())));
    println!("Started:   {}", stamp(action.started()));
    println!("Completed: {}", stamp(action.completed()));
    if !action.parameters().is_empty() {
        println!("Parameters: {}", Value::Object(action.parameters().clone()));
    }
    let (results, message) = action.results();
    if !message.is_empty() {
        println!("Message:   {message}");
    }
    if !results.is_empty() {
        println!("Results:   {}", Value::Object(results.clone()));
    }
    if !action.messages().is_empty() {
        println!("\nLog:");
        for m in action.messages() {
            println!("  {}  {}", stamp(Some(m.timestamp())), m.message());
        }
    }
    Ok(())
}

fn find(model: &Model, prefix: &str, json: bool) -> anyhow::Result<()> {
    let tags = model.find_action_tags_by_id(prefix)?;
    if json {
        print_json(&tags)?;
    } else if tags.is_empty() {
        println!("No actions match '{prefix}'.");
    } else {
        for tag in tags {
            println!("{tag}");
        }
    }
    Ok(())
}
