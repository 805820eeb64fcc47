//! Keeps a `gen_ai.*` span entered while a provider stream is polled.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use hive_types::llm::{LlmError, StreamEvent};

use super::provider::LlmStream;

/// Wrap `inner` so every poll runs inside `span`.
///
/// Without this the span would close as soon as the stream was created,
/// missing the time actually spent streaming.
pub fn stream_in_span(inner: LlmStream, span: tracing::Span) -> LlmStream {
    Box::pin(StreamInSpan { inner, span })
}

struct StreamInSpan {
    inner: LlmStream,
    span: tracing::Span,
}

impl Stream for StreamInSpan {
    type Item = Result<StreamEvent, LlmError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let _enter = this.span.enter();
        this.inner.as_mut().poll_next(cx)
    }
}
