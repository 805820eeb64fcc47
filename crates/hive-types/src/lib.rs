//! Shared domain types for Hive.
//!
//! This crate contains the data shapes used across the agent runtime:
//! LLM wire types, persisted session entries, live run events, background
//! tasks, configuration, and the error enums for each component.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod llm;
pub mod session;
pub mod task;
