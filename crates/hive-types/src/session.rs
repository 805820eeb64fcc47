//! Persisted session types.
//!
//! A session is one append-only JSONL file. Its first record is a
//! [`SessionHeader`]; every following line is a `message` or `compaction`
//! record. All three share a `type` tag so a reader can dispatch per line.
//!
//! The [`SessionIndex`] is a small side file (`sessions.json`) caching the
//! per-session metadata needed for listing. It can always be rebuilt from
//! the logs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::llm::ChatMessage;

/// Current on-disk schema version written into every header.
pub const SESSION_SCHEMA_VERSION: u32 = 3;

/// Maximum characters of the first user message used as an automatic title.
pub const AUTO_TITLE_MAX_CHARS: usize = 60;

/// One line in a session log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEntry {
    #[serde(rename = "session")]
    Header(SessionHeader),
    Message(MessageEntry),
    Compaction(CompactionEntry),
}

impl SessionEntry {
    /// Wrap a message with the current timestamp.
    pub fn message(message: ChatMessage) -> Self {
        SessionEntry::Message(MessageEntry {
            message,
            timestamp: now_millis(),
        })
    }
}

/// First record of every session file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHeader {
    pub version: u32,
    pub agent_id: String,
    /// Unix milliseconds.
    pub created_at: i64,
}

/// A persisted conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEntry {
    pub message: ChatMessage,
    /// Unix milliseconds.
    #[serde(default)]
    pub timestamp: i64,
}

/// Marks that everything logged before it is replaced by `summary`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactionEntry {
    pub summary: String,
    /// Logical marker of the first entry kept verbatim after this record.
    #[serde(default)]
    pub first_kept_entry_id: String,
    #[serde(default)]
    pub tokens_before: u64,
    #[serde(default)]
    pub tokens_after: u64,
    /// Unix milliseconds.
    #[serde(default)]
    pub timestamp: i64,
}

/// History reconstructed from a session log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionHistory {
    /// Messages logged after the last compaction, in append order.
    pub messages: Vec<ChatMessage>,
    /// Summary carried by the last compaction record, if any.
    pub summary: Option<String>,
}

/// Cached metadata for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    pub id: String,
    pub agent_id: String,
    pub file_path: String,
    pub created_at: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub last_at: i64,
    #[serde(default)]
    pub token_estimate: u64,
}

/// Contents of the `sessions.json` index file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionIndex {
    #[serde(default)]
    pub sessions: BTreeMap<String, SessionMeta>,
}

/// Build an automatic title from the first user message.
///
/// Whitespace is trimmed and the result is cut at [`AUTO_TITLE_MAX_CHARS`]
/// characters, with an ellipsis appended when truncated.
pub fn auto_title(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= AUTO_TITLE_MAX_CHARS {
        return trimmed.to_string();
    }
    let mut title: String = trimmed.chars().take(AUTO_TITLE_MAX_CHARS).collect();
    title.push('…');
    title
}

/// Current time as unix milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ContentBlock, MessageRole};

    #[test]
    fn test_header_wire_format() {
        let entry = SessionEntry::Header(SessionHeader {
            version: SESSION_SCHEMA_VERSION,
            agent_id: "main".to_string(),
            created_at: 1_700_000_000_000,
        });
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "session");
        assert_eq!(json["version"], 3);
        assert_eq!(json["agentId"], "main");
        assert_eq!(json["createdAt"], 1_700_000_000_000i64);
    }

    #[test]
    fn test_message_entry_reads_legacy_line() {
        let line = r#"{"type":"message","message":{"role":"user","content":"hi there"},"timestamp":5}"#;
        let entry: SessionEntry = serde_json::from_str(line).unwrap();
        match entry {
            SessionEntry::Message(m) => {
                assert_eq!(m.message.role, MessageRole::User);
                assert_eq!(m.message.content, vec![ContentBlock::text("hi there")]);
                assert_eq!(m.timestamp, 5);
            }
            other => panic!("expected message entry, got {other:?}"),
        }
    }

    #[test]
    fn test_compaction_entry_wire_format() {
        let entry = SessionEntry::Compaction(CompactionEntry {
            summary: "talked about rust".to_string(),
            first_kept_entry_id: "turn-4".to_string(),
            tokens_before: 90_000,
            tokens_after: 0,
            timestamp: 1,
        });
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "compaction");
        assert_eq!(json["firstKeptEntryId"], "turn-4");
        assert_eq!(json["tokensBefore"], 90_000);
    }

    #[test]
    fn test_index_tolerates_missing_optional_fields() {
        let raw = r#"{"sessions":{"ses-1":{"id":"ses-1","agentId":"a","filePath":"ses-1.jsonl","createdAt":1}}}"#;
        let index: SessionIndex = serde_json::from_str(raw).unwrap();
        let meta = &index.sessions["ses-1"];
        assert_eq!(meta.message_count, 0);
        assert!(meta.title.is_empty());
    }

    #[test]
    fn test_auto_title_short_text_kept() {
        assert_eq!(auto_title("  hello world \n"), "hello world");
    }

    #[test]
    fn test_auto_title_truncates_on_char_boundary() {
        let long = "é".repeat(80);
        let title = auto_title(&long);
        assert_eq!(title.chars().count(), AUTO_TITLE_MAX_CHARS + 1);
        assert!(title.ends_with('…'));
    }
}
