//! Field names used on `gen_ai.*` spans.
//!
//! The LLM call sites record these as literal span fields; the constants
//! exist so exporters and log queries can refer to the same names.

/// Span wrapping one streamed agent round-trip.
pub const SPAN_CHAT: &str = "gen_ai.chat";

/// Span wrapping one summarizer call.
pub const SPAN_COMPACTION: &str = "gen_ai.compaction";

/// Provider name as reported by `LlmProvider::name` (e.g., "anthropic").
pub const GEN_AI_SYSTEM: &str = "gen_ai.system";

/// The model ID sent to the provider, without the provider prefix.
pub const GEN_AI_REQUEST_MODEL: &str = "gen_ai.request.model";

pub const GEN_AI_REQUEST_MAX_TOKENS: &str = "gen_ai.request.max_tokens";

/// Whether the call used the streaming endpoint.
pub const GEN_AI_REQUEST_STREAM: &str = "gen_ai.request.stream";

pub const GEN_AI_USAGE_INPUT_TOKENS: &str = "gen_ai.usage.input_tokens";

pub const GEN_AI_USAGE_OUTPUT_TOKENS: &str = "gen_ai.usage.output_tokens";

// --- Hive-specific fields ---

pub const AGENT_ID: &str = "agent_id";

pub const SESSION_ID: &str = "session_id";

/// 1-based LLM round-trip within a turn.
pub const ITERATION: &str = "iteration";

/// Provider name values.
pub const PROVIDER_ANTHROPIC: &str = "anthropic";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gen_ai_names_share_prefix() {
        for name in [
            SPAN_CHAT,
            SPAN_COMPACTION,
            GEN_AI_SYSTEM,
            GEN_AI_REQUEST_MODEL,
            GEN_AI_REQUEST_MAX_TOKENS,
            GEN_AI_REQUEST_STREAM,
            GEN_AI_USAGE_INPUT_TOKENS,
            GEN_AI_USAGE_OUTPUT_TOKENS,
        ] {
            assert!(name.starts_with("gen_ai."), "{name}");
        }
    }
}
