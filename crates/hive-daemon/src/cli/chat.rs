//! One-shot runs and streamed session turns.

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use hive_core::agent::TurnInput;
use hive_types::event::RunEvent;
use hive_types::session::now_millis;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

/// Subscriber ID the CLI registers on a session broadcaster.
const SUBSCRIBER_ID: &str = "cli";

/// Longest line of a tool result echoed to stderr.
const TOOL_PREVIEW_CHARS: usize = 120;

/// `hive run`: history-free turn, cancelled by Ctrl-C.
pub async fn run(state: &AppState, agent: &str, message: &str, json: bool) -> Result<()> {
    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let result = state.pool.run(&cancel, agent, message).await;
    ctrl_c.abort();
    let text = result.with_context(|| format!("run against agent '{agent}' failed"))?;

    if json {
        println!("{}", serde_json::json!({ "agent": agent, "text": text }));
    } else {
        println!("{text}");
    }
    Ok(())
}

/// `hive chat`: queue a turn on the session's worker and stream its events.
pub async fn chat(
    state: &AppState,
    agent: &str,
    session: Option<String>,
    image: Option<String>,
    message: String,
    json: bool,
) -> Result<()> {
    let session_id = session.unwrap_or_else(|| format!("ses-{}", now_millis()));
    let worker = state.workers.get_or_create(&session_id);
    let mut subscription = worker.broadcaster().subscribe(SUBSCRIBER_ID);

    let mut input = TurnInput::from(message);
    if let Some(image) = image {
        input = input.with_image(image);
    }
    worker
        .enqueue(state.pool.session_request(agent, &session_id, input))
        .context("failed to queue message")?;

    let mut stdout = std::io::stdout();
    let failure = loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                worker.stop();
                bail!("interrupted");
            }
            event = subscription.recv() => event,
        };
        let Some(event) = event else {
            break Some("event stream closed before the turn finished".to_string());
        };
        let terminal = event.is_terminal();
        let failure = render_event(&mut stdout, &event, json)?;
        if terminal {
            break failure;
        }
    };

    wait_for_compaction(state, &session_id).await;
    state.workers.stop_all();

    match failure {
        Some(error) => bail!("turn failed: {error}"),
        None => Ok(()),
    }
}

/// Background compaction is spawned after the turn; give it a chance to
/// land before the process exits.
async fn wait_for_compaction(state: &AppState, session_id: &str) {
    let deadline = Duration::from_secs(state.config.compaction.timeout_secs);
    let waited = tokio::time::timeout(deadline, async {
        while state.compaction.is_running(session_id) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    if waited.is_err() {
        tracing::warn!(session_id, "compaction still running at exit");
    }
}

/// Write one event. Text goes to `out`; tool activity goes to stderr.
///
/// Returns the error message when `event` is a failure.
fn render_event(out: &mut impl Write, event: &RunEvent, json: bool) -> Result<Option<String>> {
    if json {
        writeln!(out, "{}", serde_json::to_string(event)?)?;
        return Ok(match event {
            RunEvent::Error { error } => Some(error.clone()),
            _ => None,
        });
    }

    match event {
        RunEvent::TextDelta { text } => {
            write!(out, "{text}")?;
            out.flush()?;
        }
        RunEvent::ThinkingDelta { .. } => {}
        RunEvent::ToolCall { name, .. } => eprintln!("\n[tool] {name}"),
        RunEvent::ToolResult {
            name,
            text,
            is_error,
            ..
        } => {
            let marker = if *is_error { "failed" } else { "ok" };
            eprintln!("[tool] {name} {marker}: {}", preview(text));
        }
        RunEvent::Error { error } => {
            writeln!(out)?;
            return Ok(Some(error.clone()));
        }
        RunEvent::Done {
            session_id,
            token_estimate,
        } => {
            writeln!(out)?;
            if let Some(id) = session_id {
                eprintln!("[session {id}, ~{token_estimate} tokens]");
            }
        }
    }
    Ok(None)
}

fn preview(text: &str) -> String {
    let first = text.lines().next().unwrap_or_default();
    if first.chars().count() > TOOL_PREVIEW_CHARS {
        let cut: String = first.chars().take(TOOL_PREVIEW_CHARS).collect();
        format!("{cut}…")
    } else {
        first.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_events_render_inline() {
        let mut out = Vec::new();
        for text in ["hel", "lo"] {
            let failure = render_event(&mut out, &RunEvent::TextDelta { text: text.into() }, false).unwrap();
            assert!(failure.is_none());
        }
        render_event(
            &mut out,
            &RunEvent::Done {
                session_id: None,
                token_estimate: 3,
            },
            false,
        )
        .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "hello\n");
    }

    #[test]
    fn test_json_mode_writes_one_object_per_line() {
        let mut out = Vec::new();
        let failure = render_event(
            &mut out,
            &RunEvent::Error {
                error: "boom".into(),
            },
            true,
        )
        .unwrap();
        assert_eq!(failure.as_deref(), Some("boom"));
        let line = String::from_utf8(out).unwrap();
        let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["type"], "error");
    }

    #[test]
    fn test_preview_keeps_first_line() {
        assert_eq!(preview("one\ntwo"), "one");
        let long = "x".repeat(200);
        assert_eq!(preview(&long).chars().count(), TOOL_PREVIEW_CHARS + 1);
    }
}
