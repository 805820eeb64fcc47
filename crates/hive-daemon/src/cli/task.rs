//! Background task subcommands.
//!
//! Tasks run inside this process, so `spawn` waits for the task to finish.
//! A task left running when the process exits is marked failed on the next
//! start.

use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::Subcommand;
use hive_types::session::now_millis;
use hive_types::task::{SpawnRequest, Task, TaskStatus};

use crate::cli::session::format_millis;
use crate::state::AppState;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Subcommand)]
pub enum TaskCommand {
    /// Run a prompt as a background task and wait for its result.
    Spawn {
        #[arg(long, short)]
        agent: String,

        /// Short label shown in listings.
        #[arg(long, short, default_value = "")]
        label: String,

        prompt: String,
    },

    /// List tasks, newest first.
    #[command(alias = "ls")]
    List {
        /// Only tasks run by this agent.
        #[arg(long, short)]
        agent: Option<String>,
    },

    /// Show one task.
    Show { id: String },

    /// Kill a pending or running task.
    Kill { id: String },
}

pub async fn handle(state: &AppState, action: TaskCommand, json: bool) -> Result<()> {
    match action {
        TaskCommand::Spawn {
            agent,
            label,
            prompt,
        } => spawn(state, agent, label, prompt, json).await,
        TaskCommand::List { agent } => {
            let tasks = state.tasks.list(agent.as_deref());
            if json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else if tasks.is_empty() {
                println!("No tasks.");
            } else {
                let now = now_millis();
                for task in &tasks {
                    println!("{}", list_line(task, now));
                }
            }
            Ok(())
        }
        TaskCommand::Show { id } => {
            let task = state
                .tasks
                .get(&id)
                .ok_or_else(|| anyhow!("task '{id}' not found"))?;
            print_task(&task, json)
        }
        TaskCommand::Kill { id } => {
            let task = state
                .tasks
                .kill(&id)
                .await
                .with_context(|| format!("failed to kill task '{id}'"))?;
            print_task(&task, json)
        }
    }
}

async fn spawn(state: &AppState, agent: String, label: String, prompt: String, json: bool) -> Result<()> {
    let task = state
        .tasks
        .spawn(SpawnRequest {
            agent_id: agent,
            prompt,
            label,
            spawned_by: None,
        })
        .await
        .context("failed to spawn task")?;
    tracing::info!(task_id = %task.id, "task spawned");

    let finished = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                let killed = state.tasks.kill(&task.id).await?;
                break killed;
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
        match state.tasks.get(&task.id) {
            Some(current) if current.status.is_terminal() => break current,
            Some(_) => continue,
            None => bail!("task '{}' disappeared", task.id),
        }
    };
    print_task(&finished, json)?;
    if finished.status != TaskStatus::Done {
        bail!("task {} ended with status {}", finished.id, finished.status);
    }
    Ok(())
}

fn print_task(task: &Task, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(task)?);
        return Ok(());
    }
    println!("{}", list_line(task, now_millis()));
    println!("  created: {}", format_millis(task.created_at));
    println!("  session: {}", task.session_id);
    if let Some(error) = &task.error {
        println!("  error: {error}");
    }
    if !task.output.is_empty() {
        println!("\n{}", task.output);
    }
    Ok(())
}

fn list_line(task: &Task, now_ms: i64) -> String {
    let label = if task.label.is_empty() { "-" } else { task.label.as_str() };
    format!(
        "{}  [{}]  {}  {}  {}",
        task.id,
        task.status,
        task.agent_id,
        task.duration_label(now_ms),
        label
    )
}
