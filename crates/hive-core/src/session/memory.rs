//! In-memory `SessionStore` for unit tests.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use hive_types::error::SessionError;
use hive_types::llm::{ChatMessage, MessageRole};
use hive_types::session::{
    CompactionEntry, SESSION_SCHEMA_VERSION, SessionEntry, SessionHeader, SessionHistory, SessionMeta, auto_title,
    now_millis,
};

use super::store::{CompactionCommit, SessionStore, compaction_record, estimate_message_tokens};

#[derive(Default)]
pub(crate) struct MemorySessionStore {
    sessions: Mutex<HashMap<String, (SessionMeta, Vec<SessionEntry>)>>,
}

impl MemorySessionStore {
    fn with<T>(&self, f: impl FnOnce(&mut HashMap<String, (SessionMeta, Vec<SessionEntry>)>) -> T) -> T {
        let mut guard = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// All entries of a session, header included.
    pub(crate) fn entries(&self, session_id: &str) -> Vec<SessionEntry> {
        self.with(|s| s.get(session_id).map(|(_, e)| e.clone()).unwrap_or_default())
    }
}

impl SessionStore for MemorySessionStore {
    async fn get_or_create(
        &self,
        session_id: Option<&str>,
        agent_id: &str,
    ) -> Result<SessionMeta, SessionError> {
        let id = session_id
            .map(str::to_string)
            .unwrap_or_else(|| format!("ses-{}", now_millis()));
        Ok(self.with(|s| {
            s.entry(id.clone())
                .or_insert_with(|| {
                    let now = now_millis();
                    let meta = SessionMeta {
                        id: id.clone(),
                        agent_id: agent_id.to_string(),
                        file_path: format!("{id}.jsonl"),
                        created_at: now,
                        title: String::new(),
                        message_count: 0,
                        last_at: now,
                        token_estimate: 0,
                    };
                    let header = SessionEntry::Header(SessionHeader {
                        version: SESSION_SCHEMA_VERSION,
                        agent_id: agent_id.to_string(),
                        created_at: now,
                    });
                    (meta, vec![header])
                })
                .0
                .clone()
        }))
    }

    async fn append(&self, session_id: &str, entry: &SessionEntry) -> Result<(), SessionError> {
        self.with(|s| {
            let (_, entries) = s
                .get_mut(session_id)
                .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
            entries.push(entry.clone());
            Ok(())
        })
    }

    async fn append_message(
        &self,
        session_id: &str,
        message: &ChatMessage,
    ) -> Result<(), SessionError> {
        self.append(session_id, &SessionEntry::message(message.clone()))
            .await?;
        self.with(|s| {
            if let Some((meta, _)) = s.get_mut(session_id) {
                meta.message_count += 1;
                meta.last_at = now_millis();
                meta.token_estimate += estimate_message_tokens(message);
                if meta.title.is_empty() && message.role == MessageRole::User {
                    meta.title = auto_title(&message.text());
                }
            }
        });
        Ok(())
    }

    async fn read_history(&self, session_id: &str) -> Result<SessionHistory, SessionError> {
        Ok(history_of(&self.entries(session_id)))
    }

    async fn commit_compaction(
        &self,
        session_id: &str,
        commit: &CompactionCommit,
    ) -> Result<Option<CompactionEntry>, SessionError> {
        self.with(|s| {
            let (meta, entries) = s
                .get_mut(session_id)
                .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
            let messages = history_of(entries).messages;
            let Some(record) = compaction_record(commit, &messages) else {
                return Ok(None);
            };
            let kept = &messages[commit.keep_from..];
            entries.push(SessionEntry::Compaction(record.clone()));
            entries.extend(kept.iter().cloned().map(SessionEntry::message));
            meta.message_count += kept.len() as u64;
            meta.token_estimate = record.tokens_after;
            Ok(Some(record))
        })
    }

    async fn trim_to_last_n(&self, session_id: &str, n: usize) -> Result<(), SessionError> {
        self.with(|s| {
            if let Some((_, entries)) = s.get_mut(session_id) {
                let header = entries
                    .iter()
                    .find(|e| matches!(e, SessionEntry::Header(_)))
                    .cloned();
                let start = entries
                    .iter()
                    .rposition(|e| matches!(e, SessionEntry::Compaction(_)))
                    .unwrap_or(0);
                let compaction = entries[start..]
                    .first()
                    .filter(|e| matches!(e, SessionEntry::Compaction(_)))
                    .cloned();
                let messages: Vec<_> = entries[start..]
                    .iter()
                    .filter(|e| matches!(e, SessionEntry::Message(_)))
                    .cloned()
                    .collect();
                let skip = messages.len().saturating_sub(n);
                *entries = header
                    .into_iter()
                    .chain(compaction)
                    .chain(messages.into_iter().skip(skip))
                    .collect();
            }
        });
        Ok(())
    }

    async fn estimate_tokens(&self, session_id: &str) -> u64 {
        self.with(|s| s.get(session_id).map(|(m, _)| m.token_estimate).unwrap_or(0))
    }

    async fn set_token_estimate(&self, session_id: &str, tokens: u64) -> Result<(), SessionError> {
        self.with(|s| {
            if let Some((meta, _)) = s.get_mut(session_id) {
                meta.token_estimate = tokens;
            }
        });
        Ok(())
    }

    async fn get_meta(&self, session_id: &str) -> Result<Option<SessionMeta>, SessionError> {
        Ok(self.with(|s| s.get(session_id).map(|(m, _)| m.clone())))
    }

    async fn update_title(&self, session_id: &str, title: &str) -> Result<(), SessionError> {
        self.with(|s| {
            if let Some((meta, _)) = s.get_mut(session_id) {
                meta.title = title.to_string();
            }
        });
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), SessionError> {
        self.with(|s| s.remove(session_id));
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionMeta>, SessionError> {
        let mut metas: Vec<_> = self.with(|s| s.values().map(|(m, _)| m.clone()).collect());
        metas.sort_by(|a, b| b.last_at.cmp(&a.last_at));
        Ok(metas)
    }
}

fn history_of(entries: &[SessionEntry]) -> SessionHistory {
    let mut history = SessionHistory::default();
    for entry in entries {
        match entry {
            SessionEntry::Header(_) => {}
            SessionEntry::Message(m) => history.messages.push(m.message.clone()),
            SessionEntry::Compaction(c) => {
                history.messages.clear();
                history.summary = Some(c.summary.clone());
            }
        }
    }
    history
}
