//! Application state wiring all services together.
//!
//! The core types are generic over their store and resolver ports; AppState
//! pins them to the file-backed infra implementations.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use anyhow::Context;
use hive_core::agent::Pool;
use hive_core::session::compaction::CompactionEngine;
use hive_core::session::worker::{WorkerConfig, WorkerPool};
use hive_core::task::{TaskManager, TaskRunner};
use hive_core::task::tools::register_task_tools;
use hive_core::tool::ToolRegistry;
use hive_core::tool::builtin::register_workspace_tools;
use hive_infra::agent::{AnthropicProviderFactory, ConfigAgentResolver};
use hive_infra::config::{load_config, resolve_data_dir, sessions_dir, tasks_dir};
use hive_infra::session::JsonlSessionStore;
use hive_infra::task::JsonTaskStore;
use hive_types::config::HiveConfig;

pub type ConcretePool = Pool<ConfigAgentResolver, JsonlSessionStore>;
pub type ConcreteTaskManager = TaskManager<JsonTaskStore>;

/// Shared application state.
pub struct AppState {
    pub config: HiveConfig,
    pub data_dir: PathBuf,
    pub resolver: Arc<ConfigAgentResolver>,
    pub factory: Arc<AnthropicProviderFactory>,
    pub store: Arc<JsonlSessionStore>,
    pub compaction: Arc<CompactionEngine>,
    pub pool: Arc<ConcretePool>,
    pub workers: WorkerPool,
    pub tasks: Arc<ConcreteTaskManager>,
}

impl AppState {
    /// Resolve the data directory (`--data-dir`, then `HIVE_DATA_DIR`, then
    /// `~/.hive`), load `config.toml` from it and wire the services.
    pub async fn init(data_dir: Option<PathBuf>) -> anyhow::Result<Self> {
        let base = match data_dir {
            Some(dir) => dir,
            None => resolve_data_dir()?,
        };
        let config = load_config(&base).await;
        let data_dir = config.data_dir.clone().unwrap_or(base);
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;
        Self::from_config(config, &data_dir).await
    }

    pub async fn from_config(config: HiveConfig, data_dir: &Path) -> anyhow::Result<Self> {
        let resolver = Arc::new(ConfigAgentResolver::from_config(&config, data_dir));
        let factory = Arc::new(AnthropicProviderFactory::new(config.anthropic.clone()));
        let store = Arc::new(JsonlSessionStore::new(sessions_dir(data_dir)));
        let compaction = Arc::new(CompactionEngine::new(config.compaction.clone()));

        let tasks = TaskManager::load(Arc::new(JsonTaskStore::new(tasks_dir(data_dir))))
            .await
            .context("failed to load background tasks")?;

        let mut tools = ToolRegistry::new();
        register_workspace_tools(&mut tools);
        register_task_tools(&mut tools, Arc::clone(&tasks));

        let pool = Arc::new(
            Pool::new(
                Arc::clone(&resolver),
                factory.clone(),
                Arc::new(tools),
                Arc::clone(&store),
                Arc::clone(&compaction),
            )
            .with_runtime(config.runtime.clone())
            .with_max_tokens(config.anthropic.max_tokens),
        );

        // The manager only holds a weak handle, so the pool owns the cycle.
        let runner: Weak<dyn TaskRunner> = Arc::downgrade(&pool) as Weak<dyn TaskRunner>;
        tasks.attach_runner(runner);

        let workers = WorkerPool::new(WorkerConfig::from(&config.runtime));

        tracing::debug!(data_dir = %data_dir.display(), agents = config.agents.len(), "app state ready");
        Ok(Self {
            config,
            data_dir: data_dir.to_path_buf(),
            resolver,
            factory,
            store,
            compaction,
            pool,
            workers,
            tasks,
        })
    }
}
