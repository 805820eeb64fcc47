//! A deterministic provider that replays canned turns.
//!
//! `ScriptedProvider` never touches the network. Each call to `stream` pops
//! the next [`ScriptedTurn`]; once the script runs out it keeps replaying
//! the fallback turn, or fails the call when none was set. Every request is
//! recorded so callers can inspect exactly what the loop sent.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

use hive_types::llm::{
    CompletionRequest, CompletionResponse, LlmError, StopReason, StreamEvent, ToolCall, Usage,
};

use super::provider::{LlmProvider, LlmStream};

/// One canned streaming response.
#[derive(Debug, Clone)]
pub struct ScriptedTurn {
    events: Vec<Result<StreamEvent, LlmError>>,
    delay: Option<Duration>,
}

impl ScriptedTurn {
    /// A turn that streams `parts` as consecutive text deltas and ends the turn.
    pub fn text_chunks(parts: &[&str]) -> Self {
        let mut events: Vec<Result<StreamEvent, LlmError>> = vec![Ok(StreamEvent::ContentBlockStart {
            index: 0,
            content_type: "text".to_string(),
        })];
        events.extend(parts.iter().map(|p| {
            Ok(StreamEvent::TextDelta {
                index: 0,
                text: (*p).to_string(),
            })
        }));
        events.push(Ok(StreamEvent::ContentBlockStop { index: 0 }));
        events.push(Ok(StreamEvent::Stop {
            stop_reason: StopReason::EndTurn,
        }));
        events.push(Ok(StreamEvent::Done));
        Self {
            events,
            delay: None,
        }
    }

    /// A turn that answers with a single text block.
    pub fn text(text: &str) -> Self {
        Self::text_chunks(&[text])
    }

    /// A turn that requests one tool call.
    pub fn tool_call(id: &str, name: &str, input: serde_json::Value) -> Self {
        Self {
            events: vec![
                Ok(StreamEvent::ContentBlockStart {
                    index: 0,
                    content_type: "tool_use".to_string(),
                }),
                Ok(StreamEvent::ToolCall(ToolCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    input,
                })),
                Ok(StreamEvent::ContentBlockStop { index: 0 }),
                Ok(StreamEvent::Stop {
                    stop_reason: StopReason::ToolUse,
                }),
                Ok(StreamEvent::Done),
            ],
            delay: None,
        }
    }

    /// A turn that fails after streaming `partial` text.
    pub fn fail_after(partial: &str, error: LlmError) -> Self {
        Self {
            events: vec![
                Ok(StreamEvent::TextDelta {
                    index: 0,
                    text: partial.to_string(),
                }),
                Err(error),
            ],
            delay: None,
        }
    }

    /// Sleep for `delay` before each event.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Default)]
struct ScriptState {
    turns: VecDeque<ScriptedTurn>,
    fallback: Option<ScriptedTurn>,
    completions: VecDeque<Result<String, LlmError>>,
    completion_gate: Option<Arc<Notify>>,
    requests: Vec<CompletionRequest>,
    completion_requests: Vec<CompletionRequest>,
}

/// Provider replaying canned turns. Cheap to clone; clones share the script.
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedProvider {
    pub fn new(turns: impl IntoIterator<Item = ScriptedTurn>) -> Self {
        let provider = Self::default();
        provider.lock().turns.extend(turns);
        provider
    }

    /// Replay `turn` once the scripted turns are used up.
    pub fn with_fallback(self, turn: ScriptedTurn) -> Self {
        self.lock().fallback = Some(turn);
        self
    }

    /// Queue the result of the next `complete` call.
    pub fn push_completion(&self, result: Result<String, LlmError>) {
        self.lock().completions.push_back(result);
    }

    /// Hold every `complete` call until `gate` is notified once per call.
    pub fn with_completion_gate(self, gate: Arc<Notify>) -> Self {
        self.lock().completion_gate = Some(gate);
        self
    }

    /// Requests received by `stream`, in call order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.lock().requests.clone()
    }

    /// Requests received by `complete`, in call order.
    pub fn completion_requests(&self) -> Vec<CompletionRequest> {
        self.lock().completion_requests.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let (next, gate) = {
            let mut state = self.lock();
            state.completion_requests.push(request.clone());
            (state.completions.pop_front(), state.completion_gate.clone())
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let content = next.unwrap_or_else(|| {
            Err(LlmError::InvalidRequest(
                "scripted provider has no completion queued".to_string(),
            ))
        })?;
        Ok(CompletionResponse {
            id: "scripted".to_string(),
            content,
            model: request.model.clone(),
            stop_reason: StopReason::EndTurn,
            usage: Usage::default(),
        })
    }

    fn stream(&self, request: CompletionRequest) -> LlmStream {
        let turn = {
            let mut state = self.lock();
            state.requests.push(request);
            state.turns.pop_front().or_else(|| state.fallback.clone())
        };

        Box::pin(async_stream::stream! {
            let Some(turn) = turn else {
                yield Err(LlmError::InvalidRequest("scripted provider exhausted".to_string()));
                return;
            };
            for event in turn.events {
                if let Some(delay) = turn.delay {
                    tokio::time::sleep(delay).await;
                }
                let failed = event.is_err();
                yield event;
                if failed {
                    return;
                }
            }
        })
    }
}
