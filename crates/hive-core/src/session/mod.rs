//! Session persistence, live fan-out, and per-session execution.
//!
//! - [`store::SessionStore`]: durable append-only conversation log (port)
//! - [`broadcaster::Broadcaster`]: per-generation event fan-out with replay
//! - [`worker::WorkerPool`]: one sequential worker per session
//! - [`compaction::CompactionEngine`]: summarizes old history past a threshold

pub mod broadcaster;
pub mod compaction;
pub mod store;
pub mod worker;

#[cfg(test)]
pub(crate) mod memory;
