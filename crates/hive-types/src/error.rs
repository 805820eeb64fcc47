use thiserror::Error;

use crate::llm::LlmError;
use crate::task::TaskStatus;

/// Errors from the session store.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session '{0}' not found")]
    NotFound(String),

    #[error("invalid session id: '{0}'")]
    InvalidId(String),

    #[error("session storage error: {0}")]
    Storage(String),

    #[error("session serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Serialization(err.to_string())
    }
}

/// Errors raised by tool handlers.
///
/// None of these abort a turn: the runner renders them as an error
/// tool-result and hands them back to the model.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Execution(String),

    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },
}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        ToolError::Execution(err.to_string())
    }
}

/// Errors that end an agent turn.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("exceeded max iterations ({limit})")]
    MaxIterationsExceeded { limit: usize },

    #[error("run cancelled")]
    Cancelled,
}

/// Errors from the compaction engine. Logged, never surfaced to a turn.
#[derive(Debug, Error)]
pub enum CompactionError {
    #[error("summarizer call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("summarizer returned an empty summary")]
    EmptySummary,

    #[error("summarizer timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Errors from per-session workers.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("session {session_id} worker queue full")]
    QueueFull { session_id: String },

    #[error("session {session_id} worker stopped")]
    Stopped { session_id: String },
}

/// Errors from the synchronous agent pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("agent '{0}' not found")]
    AgentNotFound(String),

    #[error("no API key configured for model: {model}")]
    MissingApiKey { model: String },

    #[error("provider setup failed: {0}")]
    Provider(LlmError),

    #[error(transparent)]
    Run(#[from] RunError),
}

/// Errors from the background task manager.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("agent id is required")]
    MissingAgent,

    #[error("task prompt is required")]
    MissingPrompt,

    #[error("task '{0}' not found")]
    NotFound(String),

    #[error("task '{id}' is not running (status: {status})")]
    NotRunning { id: String, status: TaskStatus },

    #[error("task storage error: {0}")]
    Storage(String),
}
