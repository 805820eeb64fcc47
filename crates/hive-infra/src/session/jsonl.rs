//! Append-only JSONL session store.
//!
//! Directory layout:
//! ```text
//! {dir}/
//!   sessions.json        index: id -> SessionMeta
//!   ses-1712345678901.jsonl
//!   task-0a1b2c3d4e5f.jsonl
//! ```
//!
//! Every log starts with a `session` header line followed by `message` and
//! `compaction` lines. The index is a cache: [`JsonlSessionStore::rebuild_index`]
//! recreates it from the logs, and a corrupt index file reads as empty.
//!
//! All file and index access goes through one async mutex, so appends and
//! index updates from concurrent sessions never interleave.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use hive_core::session::store::{
    CompactionCommit, SessionStore, compaction_record, estimate_message_tokens,
    estimate_summary_tokens,
};
use hive_types::error::SessionError;
use hive_types::llm::{ChatMessage, MessageRole};
use hive_types::session::{
    CompactionEntry, SESSION_SCHEMA_VERSION, SessionEntry, SessionHeader, SessionHistory, SessionIndex,
    SessionMeta, auto_title, now_millis,
};

const INDEX_FILE: &str = "sessions.json";

/// Filesystem-backed [`SessionStore`].
pub struct JsonlSessionStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl JsonlSessionStore {
    /// Create a store rooted at `dir`. The directory is created lazily.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn log_path(&self, session_id: &str) -> Result<PathBuf, SessionError> {
        validate_id(session_id)?;
        Ok(self.dir.join(format!("{session_id}.jsonl")))
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    async fn load_index(&self) -> Result<SessionIndex, SessionError> {
        match tokio::fs::read_to_string(self.index_path()).await {
            Ok(raw) => Ok(serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!("corrupt {INDEX_FILE}, treating as empty: {e}");
                SessionIndex::default()
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SessionIndex::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_index(&self, index: &SessionIndex) -> Result<(), SessionError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let data = serde_json::to_vec_pretty(index)?;
        write_atomic(&self.index_path(), &data).await
    }

    /// Load the index, apply `f` to it, and save it back.
    async fn update_index<T>(&self, f: impl FnOnce(&mut SessionIndex) -> T) -> Result<T, SessionError> {
        let mut index = self.load_index().await?;
        let out = f(&mut index);
        self.save_index(&index).await?;
        Ok(out)
    }

    async fn read_entries(&self, path: &Path) -> Result<Vec<SessionEntry>, SessionError> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(parse_lines(&raw))
    }

    /// Recreate `sessions.json` from the session logs on disk.
    pub async fn rebuild_index(&self) -> Result<usize, SessionError> {
        let _guard = self.lock.lock().await;
        let mut index = SessionIndex::default();
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let entries = self.read_entries(&path).await?;
            if let Some(meta) = meta_from_entries(id, &entries) {
                index.sessions.insert(id.to_string(), meta);
            }
        }
        let count = index.sessions.len();
        self.save_index(&index).await?;
        tracing::info!(sessions = count, "rebuilt session index");
        Ok(count)
    }
}

impl SessionStore for JsonlSessionStore {
    async fn get_or_create(
        &self,
        session_id: Option<&str>,
        agent_id: &str,
    ) -> Result<SessionMeta, SessionError> {
        let _guard = self.lock.lock().await;
        let id = match session_id {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => format!("ses-{}", now_millis()),
        };
        let path = self.log_path(&id)?;

        let mut index = self.load_index().await?;
        if let Some(meta) = index.sessions.get(&id) {
            return Ok(meta.clone());
        }

        let existing = self.read_entries(&path).await?;
        let meta = match meta_from_entries(&id, &existing) {
            Some(meta) => {
                tracing::debug!(session_id = %id, "re-indexing session log missing from index");
                meta
            }
            None => {
                let now = now_millis();
                let header = SessionEntry::Header(SessionHeader {
                    version: SESSION_SCHEMA_VERSION,
                    agent_id: agent_id.to_string(),
                    created_at: now,
                });
                tokio::fs::create_dir_all(&self.dir).await?;
                append_line(&path, &header).await?;
                tracing::debug!(session_id = %id, agent_id, "created session");
                SessionMeta {
                    id: id.clone(),
                    agent_id: agent_id.to_string(),
                    file_path: format!("{id}.jsonl"),
                    created_at: now,
                    title: String::new(),
                    message_count: 0,
                    last_at: now,
                    token_estimate: 0,
                }
            }
        };
        index.sessions.insert(id, meta.clone());
        self.save_index(&index).await?;
        Ok(meta)
    }

    async fn append(&self, session_id: &str, entry: &SessionEntry) -> Result<(), SessionError> {
        let path = self.log_path(session_id)?;
        let _guard = self.lock.lock().await;
        tokio::fs::create_dir_all(&self.dir).await?;
        append_line(&path, entry).await
    }

    async fn append_message(
        &self,
        session_id: &str,
        message: &ChatMessage,
    ) -> Result<(), SessionError> {
        let path = self.log_path(session_id)?;
        let _guard = self.lock.lock().await;
        tokio::fs::create_dir_all(&self.dir).await?;
        append_line(&path, &SessionEntry::message(message.clone())).await?;

        let tokens = estimate_message_tokens(message);
        self.update_index(|index| {
            if let Some(meta) = index.sessions.get_mut(session_id) {
                meta.message_count += 1;
                meta.last_at = now_millis();
                meta.token_estimate += tokens;
                if meta.title.is_empty() && message.role == MessageRole::User {
                    meta.title = auto_title(&message.text());
                }
            }
        })
        .await
    }

    async fn read_history(&self, session_id: &str) -> Result<SessionHistory, SessionError> {
        let path = self.log_path(session_id)?;
        let entries = self.read_entries(&path).await?;
        Ok(history_from(entries))
    }

    async fn commit_compaction(
        &self,
        session_id: &str,
        commit: &CompactionCommit,
    ) -> Result<Option<CompactionEntry>, SessionError> {
        let path = self.log_path(session_id)?;
        let _guard = self.lock.lock().await;
        let messages = history_from(self.read_entries(&path).await?).messages;
        let Some(record) = compaction_record(commit, &messages) else {
            return Ok(None);
        };
        let kept = &messages[commit.keep_from..];

        let mut out = Vec::new();
        serde_json::to_writer(&mut out, &SessionEntry::Compaction(record.clone()))?;
        out.push(b'\n');
        for message in kept {
            serde_json::to_writer(&mut out, &SessionEntry::message(message.clone()))?;
            out.push(b'\n');
        }
        append_bytes(&path, &out).await?;

        let count = kept.len() as u64;
        let tokens = record.tokens_after;
        let at = record.timestamp;
        self.update_index(|index| {
            if let Some(meta) = index.sessions.get_mut(session_id) {
                meta.message_count += count;
                meta.token_estimate = tokens;
                meta.last_at = meta.last_at.max(at);
            }
        })
        .await?;
        Ok(Some(record))
    }

    async fn trim_to_last_n(&self, session_id: &str, n: usize) -> Result<(), SessionError> {
        let path = self.log_path(session_id)?;
        let _guard = self.lock.lock().await;
        let entries = self.read_entries(&path).await?;
        if entries.is_empty() {
            return Ok(());
        }

        let header = entries
            .iter()
            .find(|e| matches!(e, SessionEntry::Header(_)))
            .cloned();
        let start = entries
            .iter()
            .rposition(|e| matches!(e, SessionEntry::Compaction(_)))
            .unwrap_or(0);
        let compaction = match &entries[start] {
            SessionEntry::Compaction(c) => Some(c.clone()),
            _ => None,
        };
        let messages: Vec<&SessionEntry> = entries[start..]
            .iter()
            .filter(|e| matches!(e, SessionEntry::Message(_)))
            .collect();
        let kept = &messages[messages.len().saturating_sub(n)..];

        let compaction_entry = compaction.clone().map(SessionEntry::Compaction);
        let mut out = Vec::new();
        for entry in header
            .iter()
            .chain(compaction_entry.iter())
            .chain(kept.iter().copied())
        {
            serde_json::to_writer(&mut out, entry)?;
            out.push(b'\n');
        }
        write_atomic(&path, &out).await?;

        let base = compaction
            .as_ref()
            .map(|c| estimate_summary_tokens(&c.summary))
            .unwrap_or(0);
        let tokens: u64 = base
            + kept
                .iter()
                .filter_map(|e| match e {
                    SessionEntry::Message(m) => Some(estimate_message_tokens(&m.message)),
                    _ => None,
                })
                .sum::<u64>();
        let count = kept.len() as u64;
        self.update_index(|index| {
            if let Some(meta) = index.sessions.get_mut(session_id) {
                meta.message_count = count;
                meta.token_estimate = tokens;
            }
        })
        .await?;
        tracing::info!(session_id, kept = count, "trimmed session log");
        Ok(())
    }

    async fn estimate_tokens(&self, session_id: &str) -> u64 {
        let _guard = self.lock.lock().await;
        match self.load_index().await {
            Ok(index) => index
                .sessions
                .get(session_id)
                .map(|m| m.token_estimate)
                .unwrap_or(0),
            Err(e) => {
                tracing::warn!(session_id, "failed to read session index: {e}");
                0
            }
        }
    }

    async fn set_token_estimate(&self, session_id: &str, tokens: u64) -> Result<(), SessionError> {
        let _guard = self.lock.lock().await;
        self.update_index(|index| {
            if let Some(meta) = index.sessions.get_mut(session_id) {
                meta.token_estimate = tokens;
            }
        })
        .await
    }

    async fn get_meta(&self, session_id: &str) -> Result<Option<SessionMeta>, SessionError> {
        let _guard = self.lock.lock().await;
        Ok(self.load_index().await?.sessions.remove(session_id))
    }

    async fn update_title(&self, session_id: &str, title: &str) -> Result<(), SessionError> {
        let _guard = self.lock.lock().await;
        self.update_index(|index| match index.sessions.get_mut(session_id) {
            Some(meta) => {
                meta.title = title.to_string();
                Ok(())
            }
            None => Err(SessionError::NotFound(session_id.to_string())),
        })
        .await?
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), SessionError> {
        let path = self.log_path(session_id)?;
        let _guard = self.lock.lock().await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.update_index(|index| {
            index.sessions.remove(session_id);
        })
        .await
    }

    async fn list_sessions(&self) -> Result<Vec<SessionMeta>, SessionError> {
        let _guard = self.lock.lock().await;
        let mut metas: Vec<SessionMeta> = self.load_index().await?.sessions.into_values().collect();
        metas.sort_by(|a, b| b.last_at.cmp(&a.last_at));
        Ok(metas)
    }
}

/// Session IDs become file names, so path separators and dot-segments are
/// rejected.
fn validate_id(session_id: &str) -> Result<(), SessionError> {
    let ok = !session_id.is_empty()
        && session_id != "."
        && session_id != ".."
        && !session_id.contains(['/', '\\', '\0']);
    if ok {
        Ok(())
    } else {
        Err(SessionError::InvalidId(session_id.to_string()))
    }
}

/// Parse a log, skipping blank, malformed and partially written lines.
fn parse_lines(raw: &str) -> Vec<SessionEntry> {
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(n, line)| match serde_json::from_str(line) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!(line = n + 1, "skipping unreadable session line: {e}");
                None
            }
        })
        .collect()
}

/// Derive index metadata from a parsed log. `None` when the log is empty.
fn meta_from_entries(session_id: &str, entries: &[SessionEntry]) -> Option<SessionMeta> {
    if entries.is_empty() {
        return None;
    }
    let mut meta = SessionMeta {
        id: session_id.to_string(),
        agent_id: String::new(),
        file_path: format!("{session_id}.jsonl"),
        created_at: 0,
        title: String::new(),
        message_count: 0,
        last_at: 0,
        token_estimate: 0,
    };
    for entry in entries {
        match entry {
            SessionEntry::Header(h) => {
                if meta.agent_id.is_empty() {
                    meta.agent_id = h.agent_id.clone();
                    meta.created_at = h.created_at;
                    meta.last_at = meta.last_at.max(h.created_at);
                }
            }
            SessionEntry::Message(m) => {
                meta.message_count += 1;
                meta.last_at = meta.last_at.max(m.timestamp);
                meta.token_estimate += estimate_message_tokens(&m.message);
                if meta.title.is_empty() && m.message.role == MessageRole::User {
                    meta.title = auto_title(&m.message.text());
                }
            }
            SessionEntry::Compaction(c) => {
                meta.token_estimate = estimate_summary_tokens(&c.summary);
                meta.last_at = meta.last_at.max(c.timestamp);
            }
        }
    }
    Some(meta)
}

/// Messages after the last compaction record, plus that record's summary.
fn history_from(entries: Vec<SessionEntry>) -> SessionHistory {
    let mut history = SessionHistory::default();
    for entry in entries {
        match entry {
            SessionEntry::Header(_) => {}
            SessionEntry::Message(m) => history.messages.push(m.message),
            SessionEntry::Compaction(c) => {
                history.messages.clear();
                history.summary = Some(c.summary);
            }
        }
    }
    history
}

async fn append_line(path: &Path, entry: &SessionEntry) -> Result<(), SessionError> {
    let mut line = serde_json::to_vec(entry)?;
    line.push(b'\n');
    append_bytes(path, &line).await
}

async fn append_bytes(path: &Path, data: &[u8]) -> Result<(), SessionError> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(data).await?;
    file.flush().await?;
    Ok(())
}

/// Write via a sibling temp file and rename, so readers never see a
/// half-written file.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), SessionError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_types::session::CompactionEntry;
    use tempfile::TempDir;

    fn store() -> (TempDir, JsonlSessionStore) {
        let tmp = TempDir::new().unwrap();
        let store = JsonlSessionStore::new(tmp.path().join("sessions"));
        (tmp, store)
    }

    #[tokio::test]
    async fn test_create_writes_header_and_index() {
        let (_tmp, store) = store();
        let meta = store.get_or_create(Some("ses-1"), "main").await.unwrap();
        assert_eq!(meta.agent_id, "main");
        assert_eq!(meta.file_path, "ses-1.jsonl");

        let raw = std::fs::read_to_string(store.dir().join("ses-1.jsonl")).unwrap();
        assert_eq!(raw.lines().count(), 1);
        assert!(raw.contains(r#""type":"session""#));

        let again = store.get_or_create(Some("ses-1"), "other").await.unwrap();
        assert_eq!(again, meta);
        let raw = std::fs::read_to_string(store.dir().join("ses-1.jsonl")).unwrap();
        assert_eq!(raw.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_generated_id() {
        let (_tmp, store) = store();
        let meta = store.get_or_create(None, "main").await.unwrap();
        assert!(meta.id.starts_with("ses-"));
    }

    #[tokio::test]
    async fn test_append_updates_meta_and_reads_back_in_order() {
        let (_tmp, store) = store();
        store.create("ses-1", "main").await.unwrap();
        for i in 0..5 {
            let msg = if i % 2 == 0 {
                ChatMessage::user_text(format!("question {i}"))
            } else {
                ChatMessage::assistant_text(format!("answer {i}"))
            };
            store.append_message("ses-1", &msg).await.unwrap();
        }

        let history = store.read_history("ses-1").await.unwrap();
        let texts: Vec<String> = history.messages.iter().map(ChatMessage::text).collect();
        assert_eq!(
            texts,
            vec!["question 0", "answer 1", "question 2", "answer 3", "question 4"]
        );
        let meta = store.get_meta("ses-1").await.unwrap().unwrap();
        assert_eq!(meta.message_count, 5);
        assert_eq!(meta.title, "question 0");
        assert!(meta.token_estimate > 0);
        assert_eq!(store.estimate_tokens("ses-1").await, meta.token_estimate);
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let (_tmp, store) = store();
        store.create("ses-1", "main").await.unwrap();
        store
            .append_message("ses-1", &ChatMessage::user_text("one"))
            .await
            .unwrap();
        let path = store.dir().join("ses-1.jsonl");
        let mut raw = std::fs::read_to_string(&path).unwrap();
        raw.push_str("\nnot json\n{\"type\":\"message\",\"mess");
        std::fs::write(&path, raw).unwrap();

        let history = store.read_history("ses-1").await.unwrap();
        assert_eq!(history.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_compaction_resets_history() {
        let (_tmp, store) = store();
        store.create("ses-1", "main").await.unwrap();
        store
            .append_message("ses-1", &ChatMessage::user_text("old"))
            .await
            .unwrap();
        store
            .append(
                "ses-1",
                &SessionEntry::Compaction(CompactionEntry {
                    summary: "we talked".into(),
                    first_kept_entry_id: "turn-1".into(),
                    tokens_before: 10,
                    tokens_after: 2,
                    timestamp: now_millis(),
                }),
            )
            .await
            .unwrap();
        store
            .append_message("ses-1", &ChatMessage::user_text("new"))
            .await
            .unwrap();

        let history = store.read_history("ses-1").await.unwrap();
        assert_eq!(history.summary.as_deref(), Some("we talked"));
        assert_eq!(history.messages, vec![ChatMessage::user_text("new")]);
    }

    #[tokio::test]
    async fn test_missing_session_reads_empty() {
        let (_tmp, store) = store();
        let history = store.read_history("nope").await.unwrap();
        assert!(history.messages.is_empty());
        assert_eq!(store.estimate_tokens("nope").await, 0);
        assert!(store.get_meta("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_trim_keeps_header_and_last_n() {
        let (_tmp, store) = store();
        store.create("ses-1", "main").await.unwrap();
        for i in 0..6 {
            store
                .append_message("ses-1", &ChatMessage::user_text(format!("m{i}")))
                .await
                .unwrap();
        }
        store.trim_to_last_n("ses-1", 2).await.unwrap();

        let raw = std::fs::read_to_string(store.dir().join("ses-1.jsonl")).unwrap();
        assert_eq!(raw.lines().count(), 3);
        assert!(raw.lines().next().unwrap().contains(r#""type":"session""#));
        let history = store.read_history("ses-1").await.unwrap();
        let texts: Vec<String> = history.messages.iter().map(ChatMessage::text).collect();
        assert_eq!(texts, vec!["m4", "m5"]);
        assert_eq!(store.get_meta("ses-1").await.unwrap().unwrap().message_count, 2);
        assert!(!store.dir().join("ses-1.jsonl.tmp").exists());
    }

    fn compaction(summary: &str) -> SessionEntry {
        SessionEntry::Compaction(CompactionEntry {
            summary: summary.into(),
            first_kept_entry_id: "turn-4".into(),
            tokens_before: 100,
            tokens_after: 10,
            timestamp: now_millis(),
        })
    }

    #[tokio::test]
    async fn test_trim_keeps_compaction_record() {
        let (_tmp, store) = store();
        store.create("ses-1", "main").await.unwrap();
        for i in 0..6 {
            store
                .append_message("ses-1", &ChatMessage::user_text(format!("m{i}")))
                .await
                .unwrap();
        }
        store.append("ses-1", &compaction("sum")).await.unwrap();
        for i in 4..6 {
            store
                .append_message("ses-1", &ChatMessage::user_text(format!("m{i}")))
                .await
                .unwrap();
        }

        store.trim_to_last_n("ses-1", 4).await.unwrap();
        let history = store.read_history("ses-1").await.unwrap();
        assert_eq!(history.summary.as_deref(), Some("sum"));
        let texts: Vec<String> = history.messages.iter().map(ChatMessage::text).collect();
        assert_eq!(texts, vec!["m4", "m5"]);

        store.trim_to_last_n("ses-1", 1).await.unwrap();
        let history = store.read_history("ses-1").await.unwrap();
        assert_eq!(history.summary.as_deref(), Some("sum"));
        assert_eq!(history.messages, vec![ChatMessage::user_text("m5")]);
        let meta = store.get_meta("ses-1").await.unwrap().unwrap();
        assert_eq!(meta.message_count, 1);
        assert_eq!(
            meta.token_estimate,
            estimate_summary_tokens("sum") + estimate_message_tokens(&ChatMessage::user_text("m5"))
        );
    }

    #[tokio::test]
    async fn test_rebuilt_estimate_matches_committed_compaction() {
        let (_tmp, store) = store();
        store.create("ses-1", "main").await.unwrap();
        for i in 0..6 {
            store
                .append_message("ses-1", &ChatMessage::user_text(format!("message {i}")))
                .await
                .unwrap();
        }
        let commit = CompactionCommit {
            summary: "a summary of the first part".into(),
            seen: 6,
            keep_from: 4,
            tokens_before: store.estimate_tokens("ses-1").await,
        };
        let record = store.commit_compaction("ses-1", &commit).await.unwrap().unwrap();
        let committed = store.get_meta("ses-1").await.unwrap().unwrap();
        assert_eq!(committed.token_estimate, record.tokens_after);

        std::fs::remove_file(store.dir().join(INDEX_FILE)).unwrap();
        store.rebuild_index().await.unwrap();
        let rebuilt = store.get_meta("ses-1").await.unwrap().unwrap();
        assert_eq!(rebuilt.token_estimate, committed.token_estimate);
        assert_eq!(rebuilt.message_count, committed.message_count);
    }

    #[tokio::test]
    async fn test_commit_compaction_carries_late_messages() {
        let (_tmp, store) = store();
        store.create("ses-1", "main").await.unwrap();
        for i in 0..4 {
            store
                .append_message("ses-1", &ChatMessage::user_text(format!("m{i}")))
                .await
                .unwrap();
        }
        store
            .append_message("ses-1", &ChatMessage::user_text("late"))
            .await
            .unwrap();
        let commit = CompactionCommit {
            summary: "sum".into(),
            seen: 4,
            keep_from: 2,
            tokens_before: 0,
        };
        store.commit_compaction("ses-1", &commit).await.unwrap().unwrap();

        let history = store.read_history("ses-1").await.unwrap();
        let texts: Vec<String> = history.messages.iter().map(ChatMessage::text).collect();
        assert_eq!(texts, vec!["m2", "m3", "late"]);

        store.trim_to_last_n("ses-1", 0).await.unwrap();
        let shrunk = CompactionCommit {
            seen: 3,
            ..commit
        };
        assert!(store.commit_compaction("ses-1", &shrunk).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_path_like_ids() {
        let (_tmp, store) = store();
        for bad in ["../escape", "a/b", ".."] {
            assert!(matches!(
                store.get_or_create(Some(bad), "main").await,
                Err(SessionError::InvalidId(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_corrupt_index_is_rebuilt_from_logs() {
        let (_tmp, store) = store();
        store.create("ses-1", "main").await.unwrap();
        store
            .append_message("ses-1", &ChatMessage::user_text("hello there"))
            .await
            .unwrap();
        std::fs::write(store.dir().join(INDEX_FILE), "{{{").unwrap();
        assert!(store.list_sessions().await.unwrap().is_empty());

        assert_eq!(store.rebuild_index().await.unwrap(), 1);
        let meta = store.get_meta("ses-1").await.unwrap().unwrap();
        assert_eq!(meta.agent_id, "main");
        assert_eq!(meta.message_count, 1);
        assert_eq!(meta.title, "hello there");
    }

    #[tokio::test]
    async fn test_delete_and_update_title() {
        let (_tmp, store) = store();
        store.create("ses-1", "main").await.unwrap();
        store.update_title("ses-1", "Renamed").await.unwrap();
        assert_eq!(store.get_meta("ses-1").await.unwrap().unwrap().title, "Renamed");
        assert!(matches!(
            store.update_title("ghost", "x").await,
            Err(SessionError::NotFound(_))
        ));

        store.delete_session("ses-1").await.unwrap();
        assert!(!store.dir().join("ses-1.jsonl").exists());
        assert!(store.list_sessions().await.unwrap().is_empty());
    }
}
