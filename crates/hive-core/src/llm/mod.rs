//! LLM provider abstractions.
//!
//! - `LlmProvider`: RPITIT trait for concrete provider implementations
//! - `BoxLlmProvider`: object-safe wrapper for dynamic dispatch
//! - `ScriptedProvider`: deterministic provider replaying canned turns

pub mod box_provider;
pub mod provider;
pub mod scripted;
pub mod span;

pub use box_provider::BoxLlmProvider;
pub use provider::{LlmProvider, LlmStream};
pub use span::stream_in_span;
