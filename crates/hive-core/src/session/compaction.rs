//! Context compaction.
//!
//! Once a session's cached token estimate reaches the configured threshold,
//! everything except the most recent `keep_turns` messages is summarized
//! with one non-streaming LLM call. The summary is appended to the log as a
//! compaction record followed by the kept messages, so a later
//! `read_history` sees the summary plus the recent tail.
//!
//! Compaction runs in the background and never fails the turn that
//! triggered it. The next turn may append while the summarizer runs, so the
//! record and the kept tail are written in one store step that also carries
//! over anything appended since the snapshot. A per-session in-flight set
//! keeps two compactions of the same session from overlapping.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use hive_types::config::CompactionConfig;
use hive_types::error::CompactionError;
use hive_types::llm::{ChatMessage, CompletionRequest, MessageRole};
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::store::{CompactionCommit, SessionStore};
use crate::llm::box_provider::BoxLlmProvider;

/// Reply meaning "the older messages carry nothing worth keeping".
pub const NOTHING_NEW: &str = "NOTHING_NEW";

const SUMMARIZER_MAX_TOKENS: u32 = 2048;

const SUMMARIZER_SYSTEM_PROMPT: &str = "You are a conversation summarizer.
Produce a concise summary (max 500 words) of the conversation below that captures:
- Key topics discussed
- Important decisions or conclusions
- Code, data, or technical context that would be needed for continuation
- The user's main goals

Be factual and preserve technical details. Reply with just the summary, no preamble.";

/// Result of one compaction attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// Not enough messages to split off an older part.
    Skipped,
    /// Another compaction of this session is in flight.
    AlreadyRunning,
    /// The summarizer answered with [`NOTHING_NEW`]; the log is unchanged.
    NothingNew,
    Compacted { tokens_before: u64, tokens_after: u64 },
}

/// Summarizes long sessions. One engine serves every session.
#[derive(Debug)]
pub struct CompactionEngine {
    config: CompactionConfig,
    in_flight: Arc<DashSet<String>>,
}

/// Removes its session from the in-flight set when dropped.
struct InFlightGuard {
    set: Arc<DashSet<String>>,
    session_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.remove(&self.session_id);
    }
}

impl CompactionEngine {
    pub fn new(config: CompactionConfig) -> Self {
        Self {
            config,
            in_flight: Arc::new(DashSet::new()),
        }
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Whether a compaction of `session_id` is currently running.
    pub fn is_running(&self, session_id: &str) -> bool {
        self.in_flight.contains(session_id)
    }

    fn try_begin(&self, session_id: &str) -> Option<InFlightGuard> {
        self.in_flight.insert(session_id.to_string()).then(|| InFlightGuard {
            set: Arc::clone(&self.in_flight),
            session_id: session_id.to_string(),
        })
    }

    /// Whether the session's estimate has reached the threshold.
    pub async fn needs_compaction<S: SessionStore>(&self, store: &S, session_id: &str) -> bool {
        store.estimate_tokens(session_id).await >= self.config.threshold_tokens
    }

    /// Start a background compaction if the session qualifies and none is
    /// already running. Returns the task handle when one was started.
    pub async fn maybe_compact<S: SessionStore>(
        &self,
        store: Arc<S>,
        provider: Arc<BoxLlmProvider>,
        model: String,
        session_id: &str,
    ) -> Option<JoinHandle<()>> {
        let tokens = store.estimate_tokens(session_id).await;
        if tokens < self.config.threshold_tokens {
            return None;
        }
        let Some(guard) = self.try_begin(session_id) else {
            tracing::debug!(session_id, "compaction already in flight");
            return None;
        };

        tracing::info!(session_id, tokens, "triggering compaction");
        let config = self.config.clone();
        let span = tracing::info_span!("compaction", session_id = %session_id);
        let handle = tokio::spawn(
            async move {
                let session_id = guard.session_id.clone();
                match run_compaction(&config, store.as_ref(), &provider, &model, &session_id).await {
                    Ok(outcome) => tracing::info!(?outcome, "compaction finished"),
                    Err(e) => tracing::warn!("compaction failed: {e}"),
                }
                drop(guard);
            }
            .instrument(span),
        );
        Some(handle)
    }

    /// Compact `session_id` now, regardless of its token estimate.
    #[tracing::instrument(name = "compaction", skip(self, store, provider, session_id), fields(session_id = %session_id))]
    pub async fn compact<S: SessionStore>(
        &self,
        store: &S,
        provider: &BoxLlmProvider,
        model: &str,
        session_id: &str,
    ) -> Result<CompactionOutcome, CompactionError> {
        let Some(_guard) = self.try_begin(session_id) else {
            return Ok(CompactionOutcome::AlreadyRunning);
        };
        run_compaction(&self.config, store, provider, model, session_id).await
    }
}

async fn run_compaction<S: SessionStore>(
    config: &CompactionConfig,
    store: &S,
    provider: &BoxLlmProvider,
    model: &str,
    session_id: &str,
) -> Result<CompactionOutcome, CompactionError> {
    let history = store.read_history(session_id).await?;
    let messages = history.messages;
    if messages.len() <= config.keep_turns {
        return Ok(CompactionOutcome::Skipped);
    }

    let boundary = messages.len() - config.keep_turns;
    let old = &messages[..boundary];

    let mut transcript = String::new();
    if let Some(previous) = history.summary.as_deref() {
        transcript.push_str("Earlier summary: ");
        transcript.push_str(previous);
        transcript.push_str("\n\n");
    }
    transcript.push_str(&render_transcript(old));

    let summary = summarize(provider, model, transcript, config.timeout_secs).await?;
    if summary == NOTHING_NEW {
        tracing::info!("summarizer reported nothing new, leaving log unchanged");
        return Ok(CompactionOutcome::NothingNew);
    }

    let commit = CompactionCommit {
        summary,
        seen: messages.len(),
        keep_from: boundary,
        tokens_before: store.estimate_tokens(session_id).await,
    };
    let Some(record) = store.commit_compaction(session_id, &commit).await? else {
        tracing::warn!("session history shrank while summarizing, dropping summary");
        return Ok(CompactionOutcome::Skipped);
    };

    tracing::info!(
        tokens_before = record.tokens_before,
        tokens_after = record.tokens_after,
        first_kept = %record.first_kept_entry_id,
        "session compacted"
    );
    Ok(CompactionOutcome::Compacted {
        tokens_before: record.tokens_before,
        tokens_after: record.tokens_after,
    })
}

/// "User: ..." / "Assistant: ..." paragraphs for the messages' text blocks.
fn render_transcript(messages: &[ChatMessage]) -> String {
    let mut out = String::new();
    for message in messages {
        let text = message.text();
        if text.is_empty() {
            continue;
        }
        let label = match message.role {
            MessageRole::User => "User",
            MessageRole::Assistant => "Assistant",
        };
        out.push_str(label);
        out.push_str(": ");
        out.push_str(&text);
        out.push_str("\n\n");
    }
    out
}

async fn summarize(
    provider: &BoxLlmProvider,
    model: &str,
    transcript: String,
    timeout_secs: u64,
) -> Result<String, CompactionError> {
    let request = CompletionRequest {
        model: model.to_string(),
        messages: vec![ChatMessage::user_text(transcript)],
        system: Some(SUMMARIZER_SYSTEM_PROMPT.to_string()),
        tools: Vec::new(),
        max_tokens: Some(SUMMARIZER_MAX_TOKENS),
    };
    let span = tracing::info_span!(
        "gen_ai.compaction",
        gen_ai.system = provider.name(),
        gen_ai.request.model = %request.model,
        gen_ai.request.max_tokens = SUMMARIZER_MAX_TOKENS,
        gen_ai.request.stream = false,
    );

    let response = tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        provider.complete(&request).instrument(span),
    )
    .await
    .map_err(|_| CompactionError::Timeout { secs: timeout_secs })??;

    let summary = response.content.trim().to_string();
    if summary.is_empty() {
        return Err(CompactionError::EmptySummary);
    }
    Ok(summary)
}
