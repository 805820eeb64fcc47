//! Infrastructure layer for Hive.
//!
//! Contains implementations of the ports defined in `hive-core`: the
//! JSONL session store, the JSON-file task store, the Anthropic streaming
//! client, and the config-backed agent resolver.

pub mod agent;
pub mod config;
pub mod llm;
pub mod session;
pub mod task;
