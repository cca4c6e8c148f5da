use crate::output::{print_json, print_table, stamp};
use crate::settings::Settings;
use clap::Subcommand;
use taskline_core::Model;

#[derive(Subcommand)]
pub enum OperationsSubcommand {
    /// Create a pending operation to enqueue actions under
    Enqueue {
        #[arg(required = true)]
        summary: Vec<String>,
    },
    /// List operations
    List,
    /// Show one operation and its tasks
    Show { id: String },
}

pub fn run(settings: &Settings, subcmd: OperationsSubcommand, json: bool) -> anyhow::Result<()> {
    let model = settings.open_model()?;
    match subcmd {
        OperationsSubcommand::Enqueue { summary } => enqueue(&model, &summary.join(" "), json),
        OperationsSubcommand::List => list(&model, json),
        OperationsSubcommand::Show { id } => show(&model, &id, json),
    }
}

fn enqueue(model: &Model, summary: &str, json: bool) -> anyhow::Result<()> {
    let id = model.enqueue_operation(summary)?;
    if json {
        print_json(&serde_json::json!({ "id": id, "summary": summary }))?;
    } else {
        println!("Enqueued operation {id}: {summary}");
    }
    Ok(())
}

fn list(model: &Model, json: bool) -> anyhow::Result<()> {
    let ops = model.all_operations()?;
    if json {
        print_json(&ops)?;
        return Ok(());
    }
    if ops.is_empty() {
        println!("No operations.");
        return Ok(());
    }
    let rows = ops
        .iter()
        .map(|o| {
            vec![
                o.id().to_string(),
                o.status().to_string(),
                format!("{}/{}", o.complete_task_count(), o.spawned_task_count()),
                stamp(Some(o.enqueued())),
                stamp(o.completed()),
                o.summary().to_string(),
            ]
        })
        .collect();
    print_table(
        &["ID", "STATUS", "DONE", "ENQUEUED", "COMPLETED", "SUMMARY"],
        rows,
    );
    Ok(())
}

fn show(model: &Model, id: &str, json: bool) -> anyhow::Result<()> {
    let op = model.operation(id)?;
    let actions = op.actions()?;
    if json {
        print_json(&serde_json::json!({ "operation": op, "actions": actions }))?;
        return Ok(());
    }
    println!("Operation: {}", op.id());
    println!("Summary:   {}", op.summary());
    println!("Status:    {}", op.status());
    println!(
        "Tasks:     {} of {} done",
        op.complete_task_count(),
        op.spawned_task_count()
    );
    println!("Enqueued:  {}", stamp(Some(op.enqueued())));
    println!("Started:   {}", stamp(op.started()));
    println!("Completed: {}", stamp(op.completed()));
    if !actions.is_empty() {
        println!();
        let rows = actions
            .iter()
            .map(|a| {
                vec![
                    a.id().to_string(),
                    a.receiver().to_string(),
                    a.name().to_string(),
                    a.status().to_string(),
                ]
            })
            .collect();
        print_table(&["ID", "RECEIVER", "NAME", "STATUS"], rows);
    }
    Ok(())
}
