//! SSE stream creation and state machine for the Anthropic Messages API.
//!
//! Implements the streaming protocol:
//! 1. `message_start` -- Message object with initial usage
//! 2. Per block: `content_block_start` -> N x `content_block_delta` -> `content_block_stop`
//! 3. `message_delta` -- stop_reason and cumulative usage
//! 4. `message_stop` -- final event
//! 5. `ping` events may appear anywhere (keepalive)
//! 6. `error` events may appear mid-stream
//!
//! Tool use input arrives as partial JSON fragments via `input_json_delta`.
//! These are accumulated per content block index and parsed only after
//! `content_block_stop`, which yields a single [`StreamEvent::ToolCall`].

use std::collections::HashMap;
use std::fmt;

use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use hive_core::llm::provider::LlmStream;
use hive_types::llm::{LlmError, StreamEvent, ToolCall};

use super::client::{API_VERSION, BETA_FEATURES, error_from_response};
use super::types::{
    AnthropicContentBlock, AnthropicDelta, AnthropicRequest, ContentBlockDeltaPayload,
    ContentBlockStartPayload, ContentBlockStopPayload, ErrorPayload, MessageDeltaPayload,
    MessageStartPayload, parse_stop_reason,
};

/// Accumulates partial JSON fragments for tool use input within a content block.
struct ToolUseAccumulator {
    id: String,
    name: String,
    json_buffer: String,
}

/// Converts Anthropic SSE events into provider-agnostic [`StreamEvent`]s.
#[derive(Default)]
pub struct AnthropicStreamParser {
    tool_input_buffers: HashMap<u32, ToolUseAccumulator>,
    finished: bool,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

impl AnthropicStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `message_stop` has been seen.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Process one SSE event into zero or more `StreamEvent`s.
    ///
    /// `event_type` is the SSE `event:` name. When it is empty or the
    /// generic `message`, the type is read from the JSON `type` field.
    ///
    /// Payloads that fail to decode are logged and skipped. Only an `error`
    /// event returns `Err`.
    pub fn process(&mut self, event_type: &str, json_data: &str) -> Result<Vec<StreamEvent>, LlmError> {
        let owned;
        let event_type = if event_type.is_empty() || event_type == "message" {
            let Some(envelope) = decode::<Envelope>("envelope", json_data) else {
                return Ok(Vec::new());
            };
            owned = envelope.kind;
            owned.as_str()
        } else {
            event_type
        };

        let mut events = Vec::new();
        match event_type {
            "message_start" => {
                if let Some(payload) = decode::<MessageStartPayload>(event_type, json_data) {
                    tracing::trace!(message_id = %payload.message.id, model = %payload.message.model, "message_start");
                    if let Some(usage) = payload.message.usage {
                        events.push(StreamEvent::Usage(usage.into()));
                    }
                }
            }

            "content_block_start" => {
                if let Some(payload) = decode::<ContentBlockStartPayload>(event_type, json_data) {
                    if let AnthropicContentBlock::ToolUse { ref id, ref name, .. } = payload.content_block {
                        self.tool_input_buffers.insert(
                            payload.index,
                            ToolUseAccumulator {
                                id: id.clone(),
                                name: name.clone(),
                                json_buffer: String::new(),
                            },
                        );
                    }
                    events.push(StreamEvent::ContentBlockStart {
                        index: payload.index,
                        content_type: payload.content_block.type_name().to_string(),
                    });
                }
            }

            "content_block_delta" => {
                if let Some(payload) = decode::<ContentBlockDeltaPayload>(event_type, json_data) {
                    match payload.delta {
                        AnthropicDelta::TextDelta { text } => {
                            events.push(StreamEvent::TextDelta {
                                index: payload.index,
                                text,
                            });
                        }
                        AnthropicDelta::ThinkingDelta { thinking } => {
                            events.push(StreamEvent::ThinkingDelta {
                                index: payload.index,
                                thinking,
                            });
                        }
                        AnthropicDelta::InputJsonDelta { partial_json } => {
                            if let Some(acc) = self.tool_input_buffers.get_mut(&payload.index) {
                                acc.json_buffer.push_str(&partial_json);
                            }
                        }
                        AnthropicDelta::SignatureDelta { .. } => {}
                    }
                }
            }

            "content_block_stop" => {
                if let Some(payload) = decode::<ContentBlockStopPayload>(event_type, json_data) {
                    if let Some(acc) = self.tool_input_buffers.remove(&payload.index) {
                        events.push(StreamEvent::ToolCall(ToolCall {
                            input: tool_input(&acc.name, &acc.json_buffer),
                            id: acc.id,
                            name: acc.name,
                        }));
                    }
                    events.push(StreamEvent::ContentBlockStop {
                        index: payload.index,
                    });
                }
            }

            "message_delta" => {
                if let Some(payload) = decode::<MessageDeltaPayload>(event_type, json_data) {
                    events.push(StreamEvent::Usage(payload.usage.into()));
                    events.push(StreamEvent::Stop {
                        stop_reason: parse_stop_reason(payload.delta.stop_reason.as_deref()),
                    });
                }
            }

            "message_stop" => {
                self.finished = true;
                events.push(StreamEvent::Done);
            }

            "ping" => {}

            "error" => {
                return Err(match serde_json::from_str::<ErrorPayload>(json_data) {
                    Ok(payload) => error_from_payload(payload),
                    Err(_) => LlmError::Provider {
                        message: format!("malformed error event: {json_data}"),
                    },
                });
            }

            unknown => {
                tracing::warn!(event_type = unknown, "unknown Anthropic event type, skipping");
            }
        }

        Ok(events)
    }
}

/// Decode one event payload, or log and skip it.
fn decode<'a, T: Deserialize<'a>>(event_type: &str, json_data: &'a str) -> Option<T> {
    match serde_json::from_str(json_data) {
        Ok(payload) => Some(payload),
        Err(e) => {
            tracing::warn!(event_type, "skipping malformed Anthropic event: {e}");
            None
        }
    }
}

/// Parse accumulated tool input. An empty buffer is `{}`; unparseable input
/// is passed through as a string so the tool reports it back to the model.
fn tool_input(tool: &str, buffer: &str) -> serde_json::Value {
    if buffer.trim().is_empty() {
        return serde_json::Value::Object(Default::default());
    }
    serde_json::from_str(buffer).unwrap_or_else(|e| {
        tracing::warn!(tool, "tool input is not valid JSON: {e}");
        serde_json::Value::String(buffer.to_string())
    })
}

/// Map an API error object to an [`LlmError`].
pub(crate) fn error_from_payload(payload: ErrorPayload) -> LlmError {
    let message = if payload.error.message.is_empty() {
        payload.error.error_type.clone()
    } else {
        payload.error.message
    };
    match payload.error.error_type.as_str() {
        "overloaded_error" => LlmError::Overloaded(message),
        "rate_limit_error" => LlmError::RateLimited {
            retry_after_ms: None,
        },
        "authentication_error" => LlmError::AuthenticationFailed,
        "invalid_request_error" => LlmError::InvalidRequest(message),
        _ => LlmError::Provider { message },
    }
}

/// Parse a raw SSE byte stream into [`StreamEvent`]s.
///
/// Ends after [`StreamEvent::Done`] or the first error. A body that closes
/// before `message_stop` just ends the stream; whatever was already yielded
/// stands.
pub fn parse_event_stream<S, B, E>(bytes: S) -> LlmStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut sse = Box::pin(bytes.eventsource());
        let mut parser = AnthropicStreamParser::new();
        while let Some(item) = sse.next().await {
            let event = match item {
                Ok(event) => event,
                Err(e) => {
                    yield Err(LlmError::Stream(e.to_string()));
                    return;
                }
            };
            if event.data.is_empty() {
                continue;
            }
            match parser.process(&event.event, &event.data) {
                Ok(events) => {
                    for ev in events {
                        yield Ok(ev);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
            if parser.is_finished() {
                return;
            }
        }
        tracing::warn!("Anthropic stream closed before message_stop");
    })
}

/// Create a streaming SSE connection to the Anthropic Messages API.
///
/// Returns a `Stream` of [`StreamEvent`]s that maps Anthropic-specific
/// SSE events to the provider-agnostic stream event enum. HTTP errors are
/// yielded as the stream's only item.
pub fn create_anthropic_stream(
    client: &reqwest::Client,
    url: &str,
    body: AnthropicRequest,
    api_key: &SecretString,
) -> LlmStream {
    let client = client.clone();
    let url = url.to_string();
    let api_key = api_key.expose_secret().to_string();

    Box::pin(async_stream::stream! {
        let response = client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .header("anthropic-beta", BETA_FEATURES)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await;
        let response = match response {
            Ok(r) => r,
            Err(e) => {
                yield Err(LlmError::Provider {
                    message: format!("HTTP request failed: {e}"),
                });
                return;
            }
        };
        if !response.status().is_success() {
            yield Err(error_from_response(response).await);
            return;
        }

        let mut events = parse_event_stream(response.bytes_stream());
        while let Some(event) = events.next().await {
            yield event;
        }
    })
}
