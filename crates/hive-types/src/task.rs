//! Background task types.
//!
//! A task is a one-shot agent run executed off the caller's request, with
//! its lifecycle persisted so a restart can account for work that was in
//! flight when the process died.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Error,
    Killed,
}

impl TaskStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Error | TaskStatus::Killed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Error => "error",
            TaskStatus::Killed => "killed",
        };
        f.write_str(s)
    }
}

/// A background task, persisted as `{id}.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    /// The prompt the agent runs.
    #[serde(rename = "task")]
    pub prompt: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Isolated session the task runs in.
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spawned_by: Option<String>,
    /// Unix milliseconds.
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
}

impl Task {
    /// Human-readable elapsed time, measured up to `now_ms` for running tasks.
    pub fn duration_label(&self, now_ms: i64) -> String {
        let Some(started) = self.started_at else {
            return "-".to_string();
        };
        let end = self.ended_at.unwrap_or(now_ms);
        let secs = (end - started).max(0) / 1000;
        match secs {
            0 => "< 1s".to_string(),
            s if s < 60 => format!("{s}s"),
            s => format!("{}m{}s", s / 60, s % 60),
        }
    }
}

/// Parameters for spawning a background task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpawnRequest {
    pub agent_id: String,
    pub prompt: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub spawned_by: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task {
            id: "t1".into(),
            agent_id: "main".into(),
            label: String::new(),
            prompt: "summarize the repo".into(),
            status: TaskStatus::Running,
            output: String::new(),
            error: None,
            session_id: "task-t1".into(),
            spawned_by: None,
            created_at: 1_000,
            started_at: Some(1_000),
            ended_at: None,
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Done.is_terminal());
        assert!(TaskStatus::Error.is_terminal());
        assert!(TaskStatus::Killed.is_terminal());
    }

    #[test]
    fn test_task_wire_format() {
        let json = serde_json::to_value(task()).unwrap();
        assert_eq!(json["task"], "summarize the repo");
        assert_eq!(json["status"], "running");
        assert_eq!(json["sessionId"], "task-t1");
        assert!(json.get("label").is_none());
    }

    #[test]
    fn test_duration_label() {
        let mut t = task();
        assert_eq!(t.duration_label(1_500), "< 1s");
        assert_eq!(t.duration_label(43_000), "42s");
        t.ended_at = Some(126_000);
        assert_eq!(t.duration_label(999_999), "2m5s");
        t.started_at = None;
        assert_eq!(t.duration_label(0), "-");
    }
}
