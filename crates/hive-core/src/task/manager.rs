//! Background task lifecycle.
//!
//! ```text
//! pending ──▶ running ──▶ done
//!    │           ├──────▶ error
//!    └───────────┴──────▶ killed
//! ```
//!
//! Every transition is persisted through the [`TaskStore`]. Saves are
//! serialized and always write the task's latest in-memory state, so a slow
//! `running` save cannot overwrite a later `killed` one. On load, tasks
//! still pending or running belonged to a process that no longer exists;
//! they are marked `error` ("server restarted") rather than resumed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

use futures_util::future::BoxFuture;
use hive_types::error::{PoolError, TaskError};
use hive_types::session::now_millis;
use hive_types::task::{SpawnRequest, Task, TaskStatus};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::store::TaskStore;

/// Error recorded on tasks interrupted by a restart.
pub const RESTART_ERROR: &str = "server restarted";

const NO_RUNNER_ERROR: &str = "no task runner attached";

/// Executes a task's prompt as a one-shot agent run.
///
/// Object-safe so the manager can hold a weak reference to the pool that
/// also owns the task tools.
pub trait TaskRunner: Send + Sync {
    fn run_task<'a>(
        &'a self,
        cancel: CancellationToken,
        agent_id: &'a str,
        session_id: &'a str,
        prompt: &'a str,
    ) -> BoxFuture<'a, Result<String, PoolError>>;
}

struct Entry {
    task: Task,
    cancel: Option<CancellationToken>,
}

/// Owns every background task and its cancellation handle.
pub struct TaskManager<T> {
    store: Arc<T>,
    entries: Mutex<HashMap<String, Entry>>,
    persist_lock: tokio::sync::Mutex<()>,
    runner: OnceLock<Weak<dyn TaskRunner>>,
}

impl<T: TaskStore> TaskManager<T> {
    /// Load persisted tasks, failing any that were interrupted.
    pub async fn load(store: Arc<T>) -> Result<Arc<Self>, TaskError> {
        let mut tasks = store.load_all().await?;
        let now = now_millis();
        let mut recovered = 0usize;
        for task in &mut tasks {
            if !task.status.is_terminal() {
                task.status = TaskStatus::Error;
                task.error = Some(RESTART_ERROR.to_string());
                task.ended_at = Some(now);
                if let Err(e) = store.save(task).await {
                    tracing::warn!(task_id = %task.id, "failed to persist recovered task: {e}");
                }
                recovered += 1;
            }
        }
        if !tasks.is_empty() {
            tracing::info!(loaded = tasks.len(), recovered, "loaded background tasks");
        }

        let entries = tasks
            .into_iter()
            .map(|task| (task.id.clone(), Entry { task, cancel: None }))
            .collect();
        Ok(Arc::new(Self {
            store,
            entries: Mutex::new(entries),
            persist_lock: tokio::sync::Mutex::new(()),
            runner: OnceLock::new(),
        }))
    }

    /// Set the runner tasks execute on. Only the first call has effect.
    pub fn attach_runner(&self, runner: Weak<dyn TaskRunner>) -> bool {
        self.runner.set(runner).is_ok()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a task and start it in the background. Returns immediately
    /// with the task as persisted (`pending`).
    pub async fn spawn(self: &Arc<Self>, request: SpawnRequest) -> Result<Task, TaskError> {
        if request.agent_id.trim().is_empty() {
            return Err(TaskError::MissingAgent);
        }
        if request.prompt.trim().is_empty() {
            return Err(TaskError::MissingPrompt);
        }

        let simple = Uuid::now_v7().simple().to_string();
        let id = simple[simple.len() - 12..].to_string();
        let task = Task {
            session_id: format!("task-{id}"),
            id: id.clone(),
            agent_id: request.agent_id,
            label: request.label,
            prompt: request.prompt,
            status: TaskStatus::Pending,
            output: String::new(),
            error: None,
            spawned_by: request.spawned_by,
            created_at: now_millis(),
            started_at: None,
            ended_at: None,
        };
        let cancel = CancellationToken::new();
        self.lock().insert(
            id.clone(),
            Entry {
                task: task.clone(),
                cancel: Some(cancel.clone()),
            },
        );
        self.persist(&id).await;

        tracing::info!(task_id = %id, agent_id = %task.agent_id, label = %task.label, "task spawned");
        tokio::spawn(Arc::clone(self).execute(id, cancel));
        Ok(task)
    }

    async fn execute(self: Arc<Self>, id: String, cancel: CancellationToken) {
        let Some(task) = self.update(&id, |t| {
            if t.status == TaskStatus::Pending {
                t.status = TaskStatus::Running;
                t.started_at = Some(now_millis());
            }
        }) else {
            return;
        };
        if task.status != TaskStatus::Running {
            return;
        }
        self.persist(&id).await;

        let runner = self.runner.get().and_then(Weak::upgrade);
        let result = match runner {
            Some(runner) => {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    r = runner.run_task(cancel.clone(), &task.agent_id, &task.session_id, &task.prompt) => {
                        r.map_err(|e| e.to_string())
                    }
                }
            }
            None => Err(NO_RUNNER_ERROR.to_string()),
        };

        let finished = self.update(&id, |t| {
            if t.status != TaskStatus::Running {
                return;
            }
            t.ended_at = Some(now_millis());
            match &result {
                Ok(output) => {
                    t.status = TaskStatus::Done;
                    t.output = output.clone();
                }
                Err(e) => {
                    t.status = TaskStatus::Error;
                    t.error = Some(e.clone());
                }
            }
        });
        if let Some(task) = finished {
            if let Some(entry) = self.lock().get_mut(&id) {
                entry.cancel = None;
            }
            tracing::info!(
                task_id = %id,
                status = %task.status,
                duration = %task.duration_label(now_millis()),
                "task finished"
            );
            self.persist(&id).await;
        }
    }

    /// Cancel a pending or running task.
    pub async fn kill(&self, id: &str) -> Result<Task, TaskError> {
        let (task, cancel) = {
            let mut entries = self.lock();
            let entry = entries
                .get_mut(id)
                .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
            if entry.task.status.is_terminal() {
                return Err(TaskError::NotRunning {
                    id: id.to_string(),
                    status: entry.task.status,
                });
            }
            entry.task.status = TaskStatus::Killed;
            entry.task.ended_at = Some(now_millis());
            (entry.task.clone(), entry.cancel.take())
        };
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        tracing::info!(task_id = %id, "task killed");
        self.persist(id).await;
        Ok(task)
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.lock().get(id).map(|e| e.task.clone())
    }

    /// Tasks newest first, optionally only one agent's.
    pub fn list(&self, agent_id: Option<&str>) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .lock()
            .values()
            .filter(|e| agent_id.is_none_or(|a| e.task.agent_id == a))
            .map(|e| e.task.clone())
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        tasks
    }

    fn update(&self, id: &str, f: impl FnOnce(&mut Task)) -> Option<Task> {
        let mut entries = self.lock();
        let entry = entries.get_mut(id)?;
        f(&mut entry.task);
        Some(entry.task.clone())
    }

    async fn persist(&self, id: &str) {
        let _guard = self.persist_lock.lock().await;
        let Some(task) = self.get(id) else {
            return;
        };
        if let Err(e) = self.store.save(&task).await {
            tracing::warn!(task_id = %id, "failed to persist task: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::store::memory::MemoryTaskStore;
    use std::time::Duration;

    /// Echoes the prompt, or fails / hangs on request.
    struct EchoRunner;

    impl TaskRunner for EchoRunner {
        fn run_task<'a>(
            &'a self,
            _cancel: CancellationToken,
            agent_id: &'a str,
            _session_id: &'a str,
            prompt: &'a str,
        ) -> BoxFuture<'a, Result<String, PoolError>> {
            Box::pin(async move {
                match prompt {
                    "fail" => Err(PoolError::AgentNotFound(agent_id.to_string())),
                    "hang" => {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Ok(String::new())
                    }
                    other => Ok(format!("{agent_id} did: {other}")),
                }
            })
        }
    }

    fn request(prompt: &str) -> SpawnRequest {
        SpawnRequest {
            agent_id: "worker".into(),
            prompt: prompt.into(),
            label: "job".into(),
            spawned_by: Some("main".into()),
        }
    }

    async fn manager() -> (Arc<TaskManager<MemoryTaskStore>>, Arc<EchoRunner>) {
        let manager = TaskManager::load(Arc::new(MemoryTaskStore::default()))
            .await
            .unwrap();
        let runner = Arc::new(EchoRunner);
        let weak: Weak<dyn TaskRunner> = Arc::downgrade(&runner) as Weak<dyn TaskRunner>;
        assert!(manager.attach_runner(weak));
        (manager, runner)
    }

    async fn wait_terminal<T: TaskStore>(manager: &TaskManager<T>, id: &str) -> Task {
        for _ in 0..200 {
            let task = manager.get(id).unwrap();
            if task.status.is_terminal() {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("task {id} did not finish");
    }

    #[tokio::test]
    async fn spawned_task_runs_to_done() {
        let (manager, _runner) = manager().await;
        let task = manager.spawn(request("write a haiku")).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.session_id, format!("task-{}", task.id));

        let done = wait_terminal(&manager, &task.id).await;
        assert_eq!(done.status, TaskStatus::Done);
        assert_eq!(done.output, "worker did: write a haiku");
        assert!(done.started_at.is_some() && done.ended_at.is_some());
        assert_eq!(manager.store.get(&task.id).unwrap().status, TaskStatus::Done);
    }

    #[tokio::test]
    async fn failing_task_records_error() {
        let (manager, _runner) = manager().await;
        let task = manager.spawn(request("fail")).await.unwrap();
        let failed = wait_terminal(&manager, &task.id).await;
        assert_eq!(failed.status, TaskStatus::Error);
        assert_eq!(failed.error.as_deref(), Some("agent 'worker' not found"));
    }

    #[tokio::test]
    async fn kill_cancels_running_task() {
        let (manager, _runner) = manager().await;
        let task = manager.spawn(request("hang")).await.unwrap();
        let killed = manager.kill(&task.id).await.unwrap();
        assert_eq!(killed.status, TaskStatus::Killed);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.get(&task.id).unwrap().status, TaskStatus::Killed);

        let err = manager.kill(&task.id).await.unwrap_err();
        assert!(matches!(err, TaskError::NotRunning { status: TaskStatus::Killed, .. }));
        assert!(matches!(manager.kill("missing").await, Err(TaskError::NotFound(_))));
    }

    /// Holds every `running` save until released.
    #[derive(Default)]
    struct SlowRunningStore {
        inner: MemoryTaskStore,
        release: tokio::sync::Notify,
        running_saves: std::sync::atomic::AtomicUsize,
    }

    impl TaskStore for SlowRunningStore {
        async fn save(&self, task: &Task) -> Result<(), TaskError> {
            if task.status == TaskStatus::Running {
                self.running_saves
                    .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                self.release.notified().await;
            }
            self.inner.save(task).await
        }

        async fn load_all(&self) -> Result<Vec<Task>, TaskError> {
            self.inner.load_all().await
        }
    }

    #[tokio::test]
    async fn slow_running_save_does_not_override_kill() {
        let store = Arc::new(SlowRunningStore::default());
        let manager = TaskManager::load(Arc::clone(&store)).await.unwrap();
        let runner = Arc::new(EchoRunner);
        manager.attach_runner(Arc::downgrade(&runner) as Weak<dyn TaskRunner>);

        let task = manager.spawn(request("hang")).await.unwrap();
        while store.running_saves.load(std::sync::atomic::Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let kill = tokio::spawn({
            let manager = Arc::clone(&manager);
            let id = task.id.clone();
            async move { manager.kill(&id).await }
        });
        while manager.get(&task.id).unwrap().status != TaskStatus::Killed {
            tokio::task::yield_now().await;
        }
        store.release.notify_one();
        kill.await.unwrap().unwrap();

        assert_eq!(store.inner.get(&task.id).unwrap().status, TaskStatus::Killed);
    }

    #[tokio::test]
    async fn spawn_validates_input() {
        let (manager, _runner) = manager().await;
        let mut req = request("x");
        req.agent_id.clear();
        assert!(matches!(manager.spawn(req).await, Err(TaskError::MissingAgent)));
        assert!(matches!(
            manager.spawn(request("  ")).await,
            Err(TaskError::MissingPrompt)
        ));
    }

    #[tokio::test]
    async fn interrupted_tasks_fail_on_load() {
        let stale = |id: &str, status: TaskStatus| Task {
            id: id.into(),
            agent_id: "worker".into(),
            label: String::new(),
            prompt: "p".into(),
            status,
            output: String::new(),
            error: None,
            session_id: format!("task-{id}"),
            spawned_by: None,
            created_at: 1,
            started_at: None,
            ended_at: None,
        };
        let store = Arc::new(MemoryTaskStore::with_tasks(vec![
            stale("a", TaskStatus::Running),
            stale("b", TaskStatus::Pending),
            stale("c", TaskStatus::Done),
        ]));
        let manager = TaskManager::load(Arc::clone(&store)).await.unwrap();

        for id in ["a", "b"] {
            let task = manager.get(id).unwrap();
            assert_eq!(task.status, TaskStatus::Error);
            assert_eq!(task.error.as_deref(), Some(RESTART_ERROR));
            assert_eq!(store.get(id).unwrap().status, TaskStatus::Error);
        }
        assert_eq!(manager.get("c").unwrap().status, TaskStatus::Done);
    }

    #[tokio::test]
    async fn list_filters_and_orders_newest_first() {
        let (manager, _runner) = manager().await;
        let first = manager.spawn(request("one")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(3)).await;
        let second = manager.spawn(request("two")).await.unwrap();
        let mut other = request("three");
        other.agent_id = "other".into();
        manager.spawn(other).await.unwrap();

        let mine: Vec<_> = manager.list(Some("worker")).into_iter().map(|t| t.id).collect();
        assert_eq!(mine, vec![second.id, first.id]);
        assert_eq!(manager.list(None).len(), 3);
    }

    #[tokio::test]
    async fn missing_runner_fails_task() {
        let manager = TaskManager::load(Arc::new(MemoryTaskStore::default()))
            .await
            .unwrap();
        let task = manager.spawn(request("x")).await.unwrap();
        let failed = wait_terminal(&manager, &task.id).await;
        assert_eq!(failed.status, TaskStatus::Error);
        assert_eq!(failed.error.as_deref(), Some(NO_RUNNER_ERROR));
    }
}
