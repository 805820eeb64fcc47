//! Agent execution core for Hive.
//!
//! This crate holds the agentic loop and everything that drives it: the
//! LLM provider port, the tool registry, per-session workers with live
//! broadcast, context compaction, and the synchronous agent pool. Storage
//! is expressed as traits ([`session::store::SessionStore`],
//! [`task::store::TaskStore`]) implemented in `hive-infra`.

pub mod agent;
pub mod llm;
pub mod session;
pub mod task;
pub mod tool;
