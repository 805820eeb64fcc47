//! One JSON file per background task: `{dir}/{id}.json`.

use std::path::PathBuf;

use hive_core::task::store::TaskStore;
use hive_types::error::TaskError;
use hive_types::task::Task;

/// Filesystem-backed [`TaskStore`].
pub struct JsonTaskStore {
    dir: PathBuf,
}

impl JsonTaskStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

fn storage(err: impl std::fmt::Display) -> TaskError {
    TaskError::Storage(err.to_string())
}

impl TaskStore for JsonTaskStore {
    async fn save(&self, task: &Task) -> Result<(), TaskError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(storage)?;
        let data = serde_json::to_vec_pretty(task).map_err(storage)?;
        let path = self.dir.join(format!("{}.json", task.id));
        let tmp = self.dir.join(format!("{}.json.tmp", task.id));
        tokio::fs::write(&tmp, data).await.map_err(storage)?;
        tokio::fs::rename(&tmp, &path).await.map_err(storage)
    }

    async fn load_all(&self) -> Result<Vec<Task>, TaskError> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage(e)),
        };
        let mut tasks = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(storage)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = match tokio::fs::read(&path).await {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "failed to read task file: {e}");
                    continue;
                }
            };
            match serde_json::from_slice::<Task>(&raw) {
                Ok(task) => tasks.push(task),
                Err(e) => tracing::warn!(path = %path.display(), "skipping unreadable task file: {e}"),
            }
        }
        Ok(tasks)
    }
}
