//! Live events emitted while an agent runs a turn.
//!
//! `RunEvent` is the unit a generation publishes to its broadcaster and the
//! shape channel adapters render (an SSE frame carries the JSON form, with
//! `type` and `text` fields). All variants are `Clone` so a buffered
//! transcript can be replayed to any number of late subscribers.

use serde::{Deserialize, Serialize};

/// One streamed unit of agent output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// Visible assistant text, forwarded as soon as the provider yields it.
    TextDelta { text: String },

    /// Extended-thinking text.
    ThinkingDelta { text: String },

    /// The model requested a tool invocation.
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// Result of a tool invocation, fed back to the model.
    ToolResult {
        tool_use_id: String,
        name: String,
        text: String,
        #[serde(default)]
        is_error: bool,
    },

    /// The turn failed. Terminal.
    Error { error: String },

    /// The turn completed. Terminal.
    Done {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        token_estimate: u64,
    },
}

impl RunEvent {
    /// Whether this event ends a generation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::Error { .. } | RunEvent::Done { .. })
    }

    /// The `type` tag as rendered on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            RunEvent::TextDelta { .. } => "text_delta",
            RunEvent::ThinkingDelta { .. } => "thinking_delta",
            RunEvent::ToolCall { .. } => "tool_call",
            RunEvent::ToolResult { .. } => "tool_result",
            RunEvent::Error { .. } => "error",
            RunEvent::Done { .. } => "done",
        }
    }

    /// The human-readable text carried by the event, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            RunEvent::TextDelta { text }
            | RunEvent::ThinkingDelta { text }
            | RunEvent::ToolResult { text, .. } => Some(text),
            RunEvent::Error { error } => Some(error),
            RunEvent::ToolCall { .. } | RunEvent::Done { .. } => None,
        }
    }
}
