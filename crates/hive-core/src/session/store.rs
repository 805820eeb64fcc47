//! SessionStore trait definition.
//!
//! A session is an append-only log of [`SessionEntry`] records plus a small
//! metadata index. The log is the source of truth; the index only caches
//! what listing and token accounting need and can be rebuilt from the logs.
//!
//! Implementations must serialize their own file/index access, but callers
//! guarantee that at most one runner appends to a given session at a time.
//! Background compaction is the exception: it commits through
//! [`SessionStore::commit_compaction`], which must be atomic with respect to
//! `append_message` on the same session.

use std::future::Future;

use hive_types::error::SessionError;
use hive_types::llm::ChatMessage;
use hive_types::session::{CompactionEntry, SessionEntry, SessionHistory, SessionMeta, now_millis};

/// Fixed overhead added to a session's estimate after each compaction.
pub const COMPACTION_OVERHEAD_TOKENS: u64 = 500;

/// A summary ready to be committed over a snapshot of the session history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionCommit {
    pub summary: String,
    /// Number of messages in the history snapshot that was summarized.
    pub seen: usize,
    /// Index of the first snapshot message kept verbatim.
    pub keep_from: usize,
    pub tokens_before: u64,
}

/// Repository trait for durable conversation logs.
///
/// Implementations live in hive-infra (e.g., `JsonlSessionStore`).
pub trait SessionStore: Send + Sync + 'static {
    /// Return the session's metadata, creating the log and index entry if
    /// absent. `None` generates a fresh `ses-{unix_ms}` ID.
    fn get_or_create(
        &self,
        session_id: Option<&str>,
        agent_id: &str,
    ) -> impl Future<Output = Result<SessionMeta, SessionError>> + Send;

    /// Create a session with a known ID. Idempotent.
    fn create(
        &self,
        session_id: &str,
        agent_id: &str,
    ) -> impl Future<Output = Result<SessionMeta, SessionError>> + Send {
        self.get_or_create(Some(session_id), agent_id)
    }

    /// Append a raw entry without touching the index.
    fn append(
        &self,
        session_id: &str,
        entry: &SessionEntry,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Append a message entry and update the index: message count, last
    /// activity, token estimate, and the automatic title.
    fn append_message(
        &self,
        session_id: &str,
        message: &ChatMessage,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Messages after the last compaction record, plus that record's summary.
    ///
    /// Blank, malformed, and partial lines are skipped. A missing session
    /// reads as empty.
    fn read_history(
        &self,
        session_id: &str,
    ) -> impl Future<Output = Result<SessionHistory, SessionError>> + Send;

    /// Append the compaction record followed by every current message from
    /// `keep_from` on, as one step. Messages appended after the snapshot are
    /// carried over behind the kept ones.
    ///
    /// Returns `None` without writing when the history has shrunk below
    /// `seen` since the snapshot.
    fn commit_compaction(
        &self,
        session_id: &str,
        commit: &CompactionCommit,
    ) -> impl Future<Output = Result<Option<CompactionEntry>, SessionError>> + Send;

    /// Rewrite the log as its header, the last compaction record, and the
    /// last `n` messages after that record. Used after memory consolidation.
    fn trim_to_last_n(
        &self,
        session_id: &str,
        n: usize,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Cached token estimate (content length / 4). Zero for unknown sessions.
    fn estimate_tokens(&self, session_id: &str) -> impl Future<Output = u64> + Send;

    /// Overwrite the cached token estimate.
    fn set_token_estimate(
        &self,
        session_id: &str,
        tokens: u64,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    fn get_meta(
        &self,
        session_id: &str,
    ) -> impl Future<Output = Result<Option<SessionMeta>, SessionError>> + Send;

    fn update_title(
        &self,
        session_id: &str,
        title: &str,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Remove the log and its index entry.
    fn delete_session(
        &self,
        session_id: &str,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// All sessions, most recently active first.
    fn list_sessions(&self) -> impl Future<Output = Result<Vec<SessionMeta>, SessionError>> + Send;
}

/// Token estimate for a message: serialized content length / 4.
pub fn estimate_message_tokens(message: &ChatMessage) -> u64 {
    (message.content_len() / 4) as u64
}

/// Estimate a session starts from right after a compaction record, before
/// the kept messages are counted.
pub fn estimate_summary_tokens(summary: &str) -> u64 {
    summary.len() as u64 / 4 + COMPACTION_OVERHEAD_TOKENS
}

/// Build the compaction record for `commit` over the current `messages`.
/// `None` when the history is shorter than the snapshot.
pub fn compaction_record(
    commit: &CompactionCommit,
    messages: &[ChatMessage],
) -> Option<CompactionEntry> {
    if messages.len() < commit.seen || commit.keep_from > commit.seen {
        return None;
    }
    let kept = &messages[commit.keep_from..];
    let tokens_after = estimate_summary_tokens(&commit.summary)
        + kept.iter().map(estimate_message_tokens).sum::<u64>();
    Some(CompactionEntry {
        summary: commit.summary.clone(),
        first_kept_entry_id: format!("turn-{}", commit.keep_from),
        tokens_before: commit.tokens_before,
        tokens_after,
        timestamp: now_millis(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(seen: usize, keep_from: usize) -> CompactionCommit {
        CompactionCommit {
            summary: "x".repeat(40),
            seen,
            keep_from,
            tokens_before: 900,
        }
    }

    #[test]
    fn compaction_record_counts_kept_and_late_messages() {
        let messages: Vec<ChatMessage> = (0..5)
            .map(|i| ChatMessage::user_text(format!("message {i}")))
            .collect();
        let record = compaction_record(&commit(4, 2), &messages).unwrap();
        assert_eq!(record.first_kept_entry_id, "turn-2");
        let kept: u64 = messages[2..].iter().map(estimate_message_tokens).sum();
        assert_eq!(record.tokens_after, 10 + COMPACTION_OVERHEAD_TOKENS + kept);
    }

    #[test]
    fn compaction_record_rejects_shrunken_history() {
        let messages = vec![ChatMessage::user_text("only")];
        assert!(compaction_record(&commit(4, 2), &messages).is_none());
    }

    #[test]
    fn estimate_uses_serialized_length() {
        let msg = ChatMessage::user_text("abcdefgh");
        // [{"type":"text","text":"abcdefgh"}] is 35 bytes
        assert_eq!(estimate_message_tokens(&msg), 8);
    }
}
