//! The agentic loop and the pieces it is assembled from.
//!
//! - [`runner::AgentRunner`]: one conversation turn, tool round-trips included
//! - [`history`]: repairs loaded history into a provider-valid shape
//! - [`prompt::SystemPromptBuilder`]: workspace files into a system prompt
//! - [`pool::Pool`]: resolves agents and runs them synchronously or per session
//! - [`sink::EventSink`]: where a runner sends its live events

pub mod history;
pub mod input;
pub mod pool;
pub mod prompt;
pub mod resolver;
pub mod runner;
pub mod sink;

pub use input::TurnInput;
pub use pool::Pool;
pub use runner::{AgentRunner, RunnerConfig};
pub use sink::EventSink;
