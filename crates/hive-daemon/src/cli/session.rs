//! Session inspection and maintenance subcommands.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use hive_core::agent::resolver::{AgentResolver, ProviderFactory};
use hive_core::session::compaction::CompactionOutcome;
use hive_core::session::store::SessionStore;

use crate::state::AppState;

#[derive(Subcommand)]
pub enum SessionCommand {
    /// List sessions, most recently active first.
    #[command(alias = "ls")]
    List,

    /// Print a session's current history.
    Show { id: String },

    /// Set a session's title.
    Rename { id: String, title: String },

    /// Summarize older messages now, regardless of the token threshold.
    Compact { id: String },

    /// Drop all but the last N messages after the latest summary.
    Trim {
        id: String,
        /// Messages to keep.
        #[arg(short = 'n', long, default_value_t = 20)]
        keep: usize,
    },

    /// Delete a session log and its index entry.
    #[command(alias = "rm")]
    Delete { id: String },

    /// Rebuild sessions.json by scanning the session logs.
    Reindex,
}

pub async fn handle(state: &AppState, action: SessionCommand, json: bool) -> Result<()> {
    match action {
        SessionCommand::List => list(state, json).await,
        SessionCommand::Show { id } => show(state, &id, json).await,
        SessionCommand::Rename { id, title } => {
            state
                .store
                .update_title(&id, &title)
                .await
                .with_context(|| format!("failed to rename session '{id}'"))?;
            println!("Renamed {id}");
            Ok(())
        }
        SessionCommand::Compact { id } => compact(state, &id, json).await,
        SessionCommand::Trim { id, keep } => {
            if state.compaction.is_running(&id) {
                return Err(anyhow!("session '{id}' is being compacted, try again later"));
            }
            state
                .store
                .get_meta(&id)
                .await?
                .ok_or_else(|| anyhow!("session '{id}' not found"))?;
            state
                .store
                .trim_to_last_n(&id, keep)
                .await
                .with_context(|| format!("failed to trim session '{id}'"))?;
            println!("Trimmed {id} to the last {keep} message(s)");
            Ok(())
        }
        SessionCommand::Delete { id } => {
            state
                .store
                .delete_session(&id)
                .await
                .with_context(|| format!("failed to delete session '{id}'"))?;
            println!("Deleted {id}");
            Ok(())
        }
        SessionCommand::Reindex => {
            let count = state.store.rebuild_index().await.context("failed to rebuild index")?;
            println!("Indexed {count} session(s)");
            Ok(())
        }
    }
}

async fn list(state: &AppState, json: bool) -> Result<()> {
    let sessions = state.store.list_sessions().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }
    if sessions.is_empty() {
        println!("No sessions.");
        return Ok(());
    }
    for meta in sessions {
        let title = if meta.title.is_empty() { "(untitled)" } else { meta.title.as_str() };
        println!(
            "{}  {}  {} msgs  ~{} tokens  {}  {}",
            meta.id,
            meta.agent_id,
            meta.message_count,
            meta.token_estimate,
            format_millis(meta.last_at),
            title,
        );
    }
    Ok(())
}

async fn show(state: &AppState, id: &str, json: bool) -> Result<()> {
    let history = state
        .store
        .read_history(id)
        .await
        .with_context(|| format!("failed to read session '{id}'"))?;
    if json {
        let value = serde_json::json!({
            "summary": history.summary,
            "messages": history.messages,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }
    if let Some(summary) = &history.summary {
        println!("[summary]\n{summary}\n");
    }
    for message in &history.messages {
        println!("[{}]\n{}\n", message.role, message.text());
    }
    Ok(())
}

async fn compact(state: &AppState, id: &str, json: bool) -> Result<()> {
    let meta = state
        .store
        .get_meta(id)
        .await?
        .ok_or_else(|| anyhow!("session '{id}' not found"))?;
    let agent = state
        .resolver
        .resolve(&meta.agent_id)
        .await
        .ok_or_else(|| anyhow!("agent '{}' not found", meta.agent_id))?;
    let provider = state
        .factory
        .create(&agent)
        .context("failed to build summarizer provider")?;

    let outcome = state
        .compaction
        .compact(state.store.as_ref(), &provider, agent.bare_model(), id)
        .await
        .with_context(|| format!("failed to compact session '{id}'"))?;

    let line = match outcome {
        CompactionOutcome::Skipped => "Nothing to compact.".to_string(),
        CompactionOutcome::AlreadyRunning => "A compaction is already running.".to_string(),
        CompactionOutcome::NothingNew => "Nothing new to summarize; log unchanged.".to_string(),
        CompactionOutcome::Compacted {
            tokens_before,
            tokens_after,
        } => {
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "tokensBefore": tokens_before, "tokensAfter": tokens_after })
                );
                return Ok(());
            }
            format!("Compacted: ~{tokens_before} -> ~{tokens_after} tokens")
        }
    };
    println!("{line}");
    Ok(())
}

pub(crate) fn format_millis(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}
