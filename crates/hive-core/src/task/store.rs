//! TaskStore trait definition.

use std::future::Future;

use hive_types::error::TaskError;
use hive_types::task::Task;

/// Durable task records, one per task ID.
///
/// Implementations live in hive-infra (e.g., `JsonTaskStore`).
pub trait TaskStore: Send + Sync + 'static {
    /// Insert or overwrite the record for `task.id`.
    fn save(&self, task: &Task) -> impl Future<Output = Result<(), TaskError>> + Send;

    /// Every stored task. Unreadable records are skipped.
    fn load_all(&self) -> impl Future<Output = Result<Vec<Task>, TaskError>> + Send;
}
