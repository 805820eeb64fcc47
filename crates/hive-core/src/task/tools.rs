//! Tools that let an agent delegate work to background tasks.

use std::fmt::Write as _;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use hive_types::error::{TaskError, ToolError};
use hive_types::llm::ToolDefinition;
use hive_types::session::now_millis;
use hive_types::task::{SpawnRequest, Task, TaskStatus};
use serde::Deserialize;
use serde_json::json;

use super::manager::TaskManager;
use super::store::TaskStore;
use crate::tool::registry::{Tool, ToolContext, ToolRegistry, parse_input};

/// Characters of a task prompt shown in listings.
const PROMPT_PREVIEW_CHARS: usize = 80;

/// Register `agent_spawn`, `agent_tasks`, `agent_kill` and `agent_result`.
pub fn register_task_tools<T: TaskStore>(registry: &mut ToolRegistry, manager: Arc<TaskManager<T>>) {
    registry.register(SpawnTool {
        manager: Arc::clone(&manager),
    });
    registry.register(ListTool {
        manager: Arc::clone(&manager),
    });
    registry.register(KillTool {
        manager: Arc::clone(&manager),
    });
    registry.register(ResultTool { manager });
}

fn task_error(err: TaskError) -> ToolError {
    match err {
        TaskError::MissingAgent | TaskError::MissingPrompt => ToolError::InvalidInput(err.to_string()),
        other => ToolError::Execution(other.to_string()),
    }
}

struct SpawnTool<T> {
    manager: Arc<TaskManager<T>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpawnInput {
    agent_id: String,
    task: String,
    #[serde(default)]
    label: String,
}

impl<T: TaskStore> Tool for SpawnTool<T> {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "agent_spawn".to_string(),
            description: "Run a task on another agent in the background. Returns a task id immediately; \
                          check progress with agent_tasks and fetch output with agent_result."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "agentId": {"type": "string", "description": "Agent that runs the task"},
                    "task": {"type": "string", "description": "Full instructions for the agent"},
                    "label": {"type": "string", "description": "Short name for listings"}
                },
                "required": ["agentId", "task"]
            }),
        }
    }

    fn call<'a>(
        &'a self,
        ctx: &'a ToolContext,
        input: serde_json::Value,
    ) -> BoxFuture<'a, Result<String, ToolError>> {
        Box::pin(async move {
            let input: SpawnInput = parse_input(input)?;
            let task = self
                .manager
                .spawn(SpawnRequest {
                    agent_id: input.agent_id,
                    prompt: input.task,
                    label: input.label,
                    spawned_by: Some(ctx.agent_id.clone()),
                })
                .await
                .map_err(task_error)?;
            Ok(format!(
                "Task spawned\n- id: {}\n- agent: {}\n- status: {}",
                task.id, task.agent_id, task.status
            ))
        })
    }
}

struct ListTool<T> {
    manager: Arc<TaskManager<T>>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ListInput {
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default)]
    status: Option<TaskStatus>,
}

impl<T: TaskStore> Tool for ListTool<T> {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "agent_tasks".to_string(),
            description: "List background tasks, newest first.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "agentId": {"type": "string", "description": "Only tasks run by this agent"},
                    "status": {
                        "type": "string",
                        "enum": ["pending", "running", "done", "error", "killed"]
                    }
                }
            }),
        }
    }

    fn call<'a>(
        &'a self,
        _ctx: &'a ToolContext,
        input: serde_json::Value,
    ) -> BoxFuture<'a, Result<String, ToolError>> {
        Box::pin(async move {
            let input: ListInput = if input.is_null() {
                ListInput::default()
            } else {
                parse_input(input)?
            };
            let tasks: Vec<Task> = self
                .manager
                .list(input.agent_id.as_deref())
                .into_iter()
                .filter(|t| input.status.is_none_or(|s| t.status == s))
                .collect();
            if tasks.is_empty() {
                return Ok("No tasks.".to_string());
            }
            let now = now_millis();
            let mut out = String::new();
            for task in &tasks {
                let _ = writeln!(out, "{}", summary_line(task, now));
            }
            Ok(out.trim_end().to_string())
        })
    }
}

fn summary_line(task: &Task, now_ms: i64) -> String {
    let label = if task.label.is_empty() {
        "(no label)"
    } else {
        task.label.as_str()
    };
    let mut preview: String = task.prompt.chars().take(PROMPT_PREVIEW_CHARS).collect();
    if task.prompt.chars().count() > PROMPT_PREVIEW_CHARS {
        preview.push('…');
    }
    format!(
        "• [{}] {} | {} | agent: {} | elapsed: {}\n  task: {}",
        task.status,
        task.id,
        label,
        task.agent_id,
        task.duration_label(now_ms),
        preview
    )
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskIdInput {
    task_id: String,
}

fn task_id_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {"taskId": {"type": "string"}},
        "required": ["taskId"]
    })
}

struct KillTool<T> {
    manager: Arc<TaskManager<T>>,
}

impl<T: TaskStore> Tool for KillTool<T> {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "agent_kill".to_string(),
            description: "Cancel a pending or running background task.".to_string(),
            input_schema: task_id_schema(),
        }
    }

    fn call<'a>(
        &'a self,
        _ctx: &'a ToolContext,
        input: serde_json::Value,
    ) -> BoxFuture<'a, Result<String, ToolError>> {
        Box::pin(async move {
            let input: TaskIdInput = parse_input(input)?;
            let task = self.manager.kill(&input.task_id).await.map_err(task_error)?;
            Ok(format!("Task {} killed", task.id))
        })
    }
}

struct ResultTool<T> {
    manager: Arc<TaskManager<T>>,
}

impl<T: TaskStore> Tool for ResultTool<T> {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "agent_result".to_string(),
            description: "Fetch the status and output of a background task.".to_string(),
            input_schema: task_id_schema(),
        }
    }

    fn call<'a>(
        &'a self,
        _ctx: &'a ToolContext,
        input: serde_json::Value,
    ) -> BoxFuture<'a, Result<String, ToolError>> {
        Box::pin(async move {
            let input: TaskIdInput = parse_input(input)?;
            let task = self
                .manager
                .get(&input.task_id)
                .ok_or_else(|| task_error(TaskError::NotFound(input.task_id.clone())))?;
            Ok(match task.status {
                TaskStatus::Done => task.output,
                TaskStatus::Error => format!(
                    "Task {} failed: {}",
                    task.id,
                    task.error.as_deref().unwrap_or("unknown error")
                ),
                status => format!("Task {} is {status}; no result yet.", task.id),
            })
        })
    }
}
