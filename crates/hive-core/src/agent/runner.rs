//! The agentic loop.
//!
//! [`AgentRunner::run`] drives one user turn to completion:
//!
//! 1. append the user message (replacing a trailing unanswered one) and
//!    persist it
//! 2. rebuild the system prompt and stream a completion, forwarding text and
//!    thinking deltas to the sink as they arrive
//! 3. append the assistant turn; if the model is done, persist it, emit
//!    `done` and schedule compaction
//! 4. otherwise run every requested tool, append their results as one user
//!    message and go back to 2
//!
//! More than `max_iterations` round-trips fail the turn with
//! [`RunError::MaxIterationsExceeded`]. A provider error fails it
//! immediately; deltas already forwarded stay forwarded.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use futures_util::StreamExt;
use futures_util::future::join_all;
use hive_types::error::RunError;
use hive_types::event::RunEvent;
use hive_types::llm::{
    ChatMessage, CompletionRequest, ContentBlock, MessageRole, StopReason, StreamEvent, ToolCall,
};
use secrecy::SecretString;

use super::history::{self, EMPTY_TEXT_PLACEHOLDER};
use super::input::TurnInput;
use super::prompt::{PromptContext, SystemPromptBuilder};
use super::sink::EventSink;
use crate::llm::box_provider::BoxLlmProvider;
use crate::llm::span::stream_in_span;
use crate::session::compaction::CompactionEngine;
use crate::session::store::SessionStore;
use crate::tool::{ToolContext, ToolRegistry};

/// Default cap on LLM round-trips per turn.
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// Per-agent runner settings.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub agent_id: String,
    /// Model name as the provider expects it.
    pub model: String,
    pub workspace: Option<PathBuf>,
    pub max_iterations: usize,
    pub max_tokens: Option<u32>,
    pub project_context: Option<String>,
    pub extra_context: Option<String>,
    /// Extra `exec` environment; names are listed in the system prompt.
    pub env: BTreeMap<String, SecretString>,
}

impl RunnerConfig {
    pub fn new(agent_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            model: model.into(),
            workspace: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_tokens: None,
            project_context: None,
            extra_context: None,
            env: BTreeMap::new(),
        }
    }
}

/// Ties a runner to a persistent session.
pub struct SessionBinding<S> {
    pub store: Arc<S>,
    pub session_id: String,
    pub compaction: Option<Arc<CompactionEngine>>,
}

/// Summary of a completed turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    /// All visible text streamed during the turn.
    pub text: String,
    pub iterations: usize,
    pub token_estimate: u64,
}

/// Runs turns for one agent, optionally bound to a session.
pub struct AgentRunner<S> {
    config: RunnerConfig,
    provider: Arc<BoxLlmProvider>,
    tools: Arc<ToolRegistry>,
    session: Option<SessionBinding<S>>,
    history: Vec<ChatMessage>,
}

impl<S: SessionStore> AgentRunner<S> {
    /// A runner with no persistence and empty history.
    pub fn new(config: RunnerConfig, provider: Arc<BoxLlmProvider>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            config,
            provider,
            tools,
            session: None,
            history: Vec::new(),
        }
    }

    /// A runner with caller-supplied history and no persistence.
    pub fn with_history(mut self, messages: Vec<ChatMessage>) -> Self {
        self.history = history::sanitize(messages);
        self
    }

    /// A runner bound to a session, its history loaded from the store.
    ///
    /// A compaction summary is folded in as a user/assistant exchange ahead
    /// of the kept messages. Load failures are logged and leave the history
    /// empty.
    pub async fn for_session(
        config: RunnerConfig,
        provider: Arc<BoxLlmProvider>,
        tools: Arc<ToolRegistry>,
        binding: SessionBinding<S>,
    ) -> Self {
        let session_id = binding.session_id.as_str();
        if let Err(e) = binding
            .store
            .get_or_create(Some(session_id), &config.agent_id)
            .await
        {
            tracing::warn!(session_id, "failed to open session: {e}");
        }

        let mut messages = Vec::new();
        match binding.store.read_history(session_id).await {
            Ok(loaded) => {
                if let Some(summary) = loaded.summary {
                    messages.push(ChatMessage::user_text(format!(
                        "[Previous conversation summary]\n{summary}"
                    )));
                    messages.push(ChatMessage::assistant_text(
                        "Understood. I have the context from the previous conversation.",
                    ));
                }
                messages.extend(loaded.messages);
            }
            Err(e) => tracing::warn!(session_id, "failed to load session history: {e}"),
        }

        Self {
            config,
            provider,
            tools,
            history: history::sanitize(messages),
            session: Some(binding),
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.session_id.as_str())
    }

    /// Run one user turn, emitting live events to `sink`.
    pub async fn run(
        &mut self,
        input: impl Into<TurnInput>,
        sink: &dyn EventSink,
    ) -> Result<TurnOutcome, RunError> {
        let user = input.into().to_message();
        match self.history.last_mut() {
            Some(last) if last.role == MessageRole::User => *last = user.clone(),
            _ => self.history.push(user.clone()),
        }
        self.persist(&user).await;

        let mut turn_text = String::new();
        for iteration in 1..=self.config.max_iterations {
            let system = self.system_prompt().await;
            let request = CompletionRequest {
                model: self.config.model.clone(),
                messages: self.history.clone(),
                system: Some(system),
                tools: self.tools.definitions().to_vec(),
                max_tokens: self.config.max_tokens,
            };
            let span = tracing::info_span!(
                "gen_ai.chat",
                gen_ai.system = self.provider.name(),
                gen_ai.request.model = %request.model,
                gen_ai.request.max_tokens = ?request.max_tokens,
                gen_ai.request.stream = true,
                agent_id = %self.config.agent_id,
                iteration,
            );
            let mut stream = stream_in_span(self.provider.stream(request), span);

            let mut text = String::new();
            let mut calls: Vec<ToolCall> = Vec::new();
            let mut stop_reason = None;
            while let Some(event) = stream.next().await {
                match event? {
                    StreamEvent::TextDelta { text: delta, .. } => {
                        text.push_str(&delta);
                        sink.emit(RunEvent::TextDelta { text: delta });
                    }
                    StreamEvent::ThinkingDelta { thinking, .. } => {
                        sink.emit(RunEvent::ThinkingDelta { text: thinking });
                    }
                    StreamEvent::ToolCall(call) => {
                        sink.emit(RunEvent::ToolCall {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            input: call.input.clone(),
                        });
                        calls.push(call);
                    }
                    StreamEvent::Stop { stop_reason: reason } => stop_reason = Some(reason),
                    StreamEvent::Usage(usage) => {
                        tracing::debug!(
                            input_tokens = usage.input_tokens,
                            output_tokens = usage.output_tokens,
                            "llm usage"
                        );
                    }
                    StreamEvent::Done => break,
                    StreamEvent::ContentBlockStart { .. } | StreamEvent::ContentBlockStop { .. } => {}
                }
            }
            turn_text.push_str(&text);

            let assistant = assistant_message(&text, &calls);
            self.history.push(assistant.clone());

            if stop_reason == Some(StopReason::EndTurn) || calls.is_empty() {
                if !text.trim().is_empty() {
                    let stored = history::strip_tool_use(&assistant).unwrap_or(assistant);
                    self.persist(&stored).await;
                }
                let token_estimate = match &self.session {
                    Some(s) => s.store.estimate_tokens(&s.session_id).await,
                    None => 0,
                };
                sink.emit(RunEvent::Done {
                    session_id: self.session_id().map(str::to_string),
                    token_estimate,
                });
                self.schedule_compaction().await;
                return Ok(TurnOutcome {
                    text: turn_text,
                    iterations: iteration,
                    token_estimate,
                });
            }

            let results = self.execute_tools(&calls, sink).await;
            self.history
                .push(ChatMessage::new(MessageRole::User, results));
        }

        tracing::warn!(
            agent_id = %self.config.agent_id,
            limit = self.config.max_iterations,
            "turn exceeded max iterations"
        );
        Err(RunError::MaxIterationsExceeded {
            limit: self.config.max_iterations,
        })
    }

    async fn system_prompt(&self) -> String {
        let env_names: Vec<&str> = self.config.env.keys().map(String::as_str).collect();
        let ctx = PromptContext {
            agent_id: &self.config.agent_id,
            model: &self.config.model,
            workspace: self.config.workspace.as_deref(),
            project_context: self.config.project_context.as_deref(),
            extra_context: self.config.extra_context.as_deref(),
            env_names: &env_names,
        };
        SystemPromptBuilder::build(&ctx, Utc::now()).await
    }

    /// Run all calls concurrently. Results keep call order; failures become
    /// `Error: ...` results flagged `is_error`.
    async fn execute_tools(&self, calls: &[ToolCall], sink: &dyn EventSink) -> Vec<ContentBlock> {
        let mut ctx = ToolContext::new(
            self.config.agent_id.clone(),
            self.config.workspace.clone().unwrap_or_else(|| PathBuf::from(".")),
        );
        ctx.session_id = self.session_id().map(str::to_string);
        ctx.env = self.config.env.clone();

        let outcomes = join_all(calls.iter().map(|call| {
            let ctx = &ctx;
            async move {
                self.tools
                    .execute(ctx, &call.name, call.input.clone())
                    .await
            }
        }))
        .await;

        calls
            .iter()
            .zip(outcomes)
            .map(|(call, outcome)| {
                let (content, is_error) = match outcome {
                    Ok(text) => (text, false),
                    Err(e) => (format!("Error: {e}"), true),
                };
                sink.emit(RunEvent::ToolResult {
                    tool_use_id: call.id.clone(),
                    name: call.name.clone(),
                    text: content.clone(),
                    is_error,
                });
                ContentBlock::ToolResult {
                    tool_use_id: call.id.clone(),
                    content,
                    is_error,
                }
            })
            .collect()
    }

    async fn persist(&self, message: &ChatMessage) {
        if let Some(s) = &self.session {
            if let Err(e) = s.store.append_message(&s.session_id, message).await {
                tracing::warn!(session_id = %s.session_id, "failed to persist message: {e}");
            }
        }
    }

    async fn schedule_compaction(&self) {
        let Some(s) = &self.session else {
            return;
        };
        let Some(engine) = &s.compaction else {
            return;
        };
        // The handle is dropped: compaction runs detached from the turn.
        let _ = engine
            .maybe_compact(
                Arc::clone(&s.store),
                Arc::clone(&self.provider),
                self.config.model.clone(),
                &s.session_id,
            )
            .await;
    }
}

/// Text block (if any) followed by one tool_use block per call, or a lone
/// placeholder when both are empty.
fn assistant_message(text: &str, calls: &[ToolCall]) -> ChatMessage {
    let mut content = Vec::with_capacity(1 + calls.len());
    if !text.trim().is_empty() {
        content.push(ContentBlock::text(text));
    }
    content.extend(calls.iter().map(|c| ContentBlock::ToolUse {
        id: c.id.clone(),
        name: c.name.clone(),
        input: c.input.clone(),
    }));
    if content.is_empty() {
        content.push(ContentBlock::text(EMPTY_TEXT_PLACEHOLDER));
    }
    ChatMessage::new(MessageRole::Assistant, content)
}
