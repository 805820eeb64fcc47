//! Agent resolution and provider construction backed by the config file.

pub mod resolver;

pub use resolver::{AnthropicProviderFactory, ConfigAgentResolver};
