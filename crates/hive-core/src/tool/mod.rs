//! Tool invocation surface.
//!
//! A [`registry::ToolRegistry`] maps tool names to handlers and advertises
//! their JSON schemas to the model. It is built once at startup and shared
//! read-only by every runner.

pub mod builtin;
pub mod registry;

pub use registry::{Tool, ToolContext, ToolRegistry};
