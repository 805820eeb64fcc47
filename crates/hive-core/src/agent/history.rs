//! History repair.
//!
//! Logs can contain sequences the provider rejects: two user turns in a row
//! after a failed request, empty text blocks, or tool calls whose results
//! were never written. [`sanitize`] rewrites a loaded history into a shape
//! where roles alternate and every tool_use/tool_result pair is complete.

use std::collections::HashSet;

use hive_types::llm::{ChatMessage, ContentBlock, MessageRole};

/// Placeholder for text blocks that would otherwise be empty.
pub const EMPTY_TEXT_PLACEHOLDER: &str = ".";

/// Repair `messages` for sending to the provider.
///
/// - consecutive same-role messages collapse (latest user wins, first
///   assistant wins)
/// - blank text blocks become [`EMPTY_TEXT_PLACEHOLDER`]
/// - tool_use blocks without a result in the next user message, and
///   tool_result blocks without a call in the previous assistant message,
///   are removed; a message left with no blocks is dropped
///
/// Passes repeat until nothing changes, since dropping a message can put
/// two same-role messages next to each other again.
pub fn sanitize(messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    let mut current: Vec<ChatMessage> = messages.into_iter().map(fill_empty_text).collect();
    loop {
        let next = strip_orphans(collapse_roles(current.clone()));
        if next == current {
            return next;
        }
        current = next;
    }
}

fn collapse_roles(messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    let mut out: Vec<ChatMessage> = Vec::with_capacity(messages.len());
    for message in messages {
        match out.last_mut() {
            Some(last) if last.role == message.role => {
                if message.role == MessageRole::User {
                    *last = message;
                }
            }
            _ => out.push(message),
        }
    }
    out
}

fn fill_empty_text(mut message: ChatMessage) -> ChatMessage {
    for block in &mut message.content {
        if let ContentBlock::Text { text } = block {
            if text.trim().is_empty() {
                *text = EMPTY_TEXT_PLACEHOLDER.to_string();
            }
        }
    }
    if message.content.is_empty() {
        message.content.push(ContentBlock::text(EMPTY_TEXT_PLACEHOLDER));
    }
    message
}

fn strip_orphans(messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    let mut out: Vec<ChatMessage> = Vec::with_capacity(messages.len());
    for (i, message) in messages.iter().enumerate() {
        match message.role {
            MessageRole::Assistant => {
                let calls: HashSet<&str> = message.tool_use_ids().into_iter().collect();
                if calls.is_empty() {
                    out.push(message.clone());
                    continue;
                }
                let answered = messages
                    .get(i + 1)
                    .filter(|next| next.role == MessageRole::User)
                    .map(|next| next.tool_result_ids().iter().any(|id| calls.contains(id)))
                    .unwrap_or(false);
                if answered {
                    out.push(message.clone());
                } else if let Some(kept) =
                    retain_blocks(message, |b| !matches!(b, ContentBlock::ToolUse { .. }))
                {
                    out.push(kept);
                }
            }
            MessageRole::User => {
                let results: Vec<&str> = message.tool_result_ids();
                if results.is_empty() {
                    out.push(message.clone());
                    continue;
                }
                let matched = out
                    .last()
                    .filter(|prev| prev.role == MessageRole::Assistant)
                    .map(|prev| {
                        let calls = prev.tool_use_ids();
                        results.iter().any(|id| calls.contains(id))
                    })
                    .unwrap_or(false);
                if matched {
                    out.push(message.clone());
                } else if let Some(kept) =
                    retain_blocks(message, |b| !matches!(b, ContentBlock::ToolResult { .. }))
                {
                    out.push(kept);
                }
            }
        }
    }
    out
}

fn retain_blocks(
    message: &ChatMessage,
    keep: impl Fn(&ContentBlock) -> bool,
) -> Option<ChatMessage> {
    let content: Vec<ContentBlock> = message.content.iter().filter(|b| keep(b)).cloned().collect();
    (!content.is_empty()).then(|| ChatMessage::new(message.role, content))
}

/// Remove tool_use blocks, keeping the rest. `None` if nothing remains.
pub fn strip_tool_use(message: &ChatMessage) -> Option<ChatMessage> {
    retain_blocks(message, |b| !matches!(b, ContentBlock::ToolUse { .. }))
}
