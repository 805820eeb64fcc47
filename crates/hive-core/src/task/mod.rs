//! Background agent tasks.
//!
//! A task is a one-shot agent run started on behalf of a user or another
//! agent and executed off the caller's path. Task state is persisted after
//! every transition so that a restart can mark interrupted work as failed
//! instead of silently forgetting it.

pub mod manager;
pub mod store;
pub mod tools;

pub use manager::{TaskManager, TaskRunner};
pub use store::TaskStore;
