//! Agent pool: resolves an agent and runs it.
//!
//! Two entry points share the same setup:
//!
//! - [`Pool::run`] / [`Pool::run_in_session`]: synchronous, one answer back.
//!   Used by cron jobs, agent-to-agent messaging and background tasks. The
//!   run is bound to the caller's cancellation token.
//! - [`Pool::session_request`]: builds the request a [`SessionWorker`]
//!   executes, streaming every event to the session's broadcaster.
//!
//! [`SessionWorker`]: crate::session::worker::SessionWorker

use std::sync::Arc;

use futures_util::future::BoxFuture;
use hive_types::config::RuntimeConfig;
use hive_types::error::{PoolError, RunError};
use tokio_util::sync::CancellationToken;

use super::input::TurnInput;
use super::resolver::{AgentResolver, ProviderFactory, ResolvedAgent};
use super::runner::{AgentRunner, RunnerConfig, SessionBinding};
use super::sink::CollectingSink;
use crate::llm::box_provider::BoxLlmProvider;
use crate::session::compaction::CompactionEngine;
use crate::session::store::SessionStore;
use crate::session::worker::RunRequest;
use crate::task::manager::TaskRunner;
use crate::tool::ToolRegistry;

/// Shared dependencies for running any configured agent.
pub struct Pool<R, S> {
    resolver: Arc<R>,
    factory: Arc<dyn ProviderFactory>,
    tools: Arc<ToolRegistry>,
    store: Arc<S>,
    compaction: Arc<CompactionEngine>,
    runtime: RuntimeConfig,
    max_tokens: Option<u32>,
}

impl<R: AgentResolver, S: SessionStore> Pool<R, S> {
    pub fn new(
        resolver: Arc<R>,
        factory: Arc<dyn ProviderFactory>,
        tools: Arc<ToolRegistry>,
        store: Arc<S>,
        compaction: Arc<CompactionEngine>,
    ) -> Self {
        Self {
            resolver,
            factory,
            tools,
            store,
            compaction,
            runtime: RuntimeConfig::default(),
            max_tokens: None,
        }
    }

    pub fn with_runtime(mut self, runtime: RuntimeConfig) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Resolve `agent_id` into a runner config and a ready provider.
    async fn prepare(&self, agent_id: &str) -> Result<(RunnerConfig, Arc<BoxLlmProvider>), PoolError> {
        let agent = self
            .resolver
            .resolve(agent_id)
            .await
            .ok_or_else(|| PoolError::AgentNotFound(agent_id.to_string()))?;
        if agent.api_key.is_none() {
            return Err(PoolError::MissingApiKey {
                model: agent.model.clone(),
            });
        }
        let provider = self.factory.create(&agent).map_err(PoolError::Provider)?;
        Ok((self.runner_config(&agent), Arc::new(provider)))
    }

    fn runner_config(&self, agent: &ResolvedAgent) -> RunnerConfig {
        let mut config = RunnerConfig::new(agent.id.clone(), agent.bare_model());
        config.workspace = agent.workspace.clone();
        config.extra_context = agent.extra_context.clone();
        config.env = agent.env.clone();
        config.max_iterations = self.runtime.max_iterations;
        config.max_tokens = self.max_tokens;
        config
    }

    /// Run one message against `agent_id` with no history and return the
    /// full reply text.
    #[tracing::instrument(name = "pool.run", skip(self, cancel, message))]
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        agent_id: &str,
        message: &str,
    ) -> Result<String, PoolError> {
        let (config, provider) = self.prepare(agent_id).await?;
        let mut runner: AgentRunner<S> = AgentRunner::new(config, provider, Arc::clone(&self.tools));
        drive(cancel, &mut runner, message).await
    }

    /// Like [`run`](Self::run), but the turn is appended to `session_id`'s
    /// history and loaded with it.
    #[tracing::instrument(name = "pool.run", skip(self, cancel, message))]
    pub async fn run_in_session(
        &self,
        cancel: &CancellationToken,
        agent_id: &str,
        session_id: &str,
        message: &str,
    ) -> Result<String, PoolError> {
        let (config, provider) = self.prepare(agent_id).await?;
        let mut runner = AgentRunner::for_session(
            config,
            provider,
            Arc::clone(&self.tools),
            self.binding(session_id),
        )
        .await;
        drive(cancel, &mut runner, message).await
    }

    fn binding(&self, session_id: &str) -> SessionBinding<S> {
        SessionBinding {
            store: Arc::clone(&self.store),
            session_id: session_id.to_string(),
            compaction: Some(Arc::clone(&self.compaction)),
        }
    }

    /// Build the worker request for one streaming turn.
    ///
    /// Setup failures surface through the worker as the generation's error
    /// event, like any other turn failure.
    pub fn session_request(
        self: &Arc<Self>,
        agent_id: &str,
        session_id: &str,
        input: TurnInput,
    ) -> RunRequest {
        let pool = Arc::clone(self);
        let agent = agent_id.to_string();
        let session = session_id.to_string();
        let message = input.text.clone();
        RunRequest::new(agent_id, session_id, message, move |broadcaster| async move {
            let (config, provider) = pool.prepare(&agent).await?;
            let mut runner = AgentRunner::for_session(
                config,
                provider,
                Arc::clone(&pool.tools),
                pool.binding(&session),
            )
            .await;
            runner.run(input, broadcaster.as_ref()).await?;
            anyhow::Ok(())
        })
    }
}

/// Run a turn to completion unless `cancel` fires first.
async fn drive<S: SessionStore>(
    cancel: &CancellationToken,
    runner: &mut AgentRunner<S>,
    message: &str,
) -> Result<String, PoolError> {
    let sink = CollectingSink::new();
    tokio::select! {
        _ = cancel.cancelled() => Err(RunError::Cancelled.into()),
        outcome = runner.run(message, &sink) => Ok(outcome?.text),
    }
}

impl<R: AgentResolver, S: SessionStore> TaskRunner for Pool<R, S> {
    fn run_task<'a>(
        &'a self,
        cancel: CancellationToken,
        agent_id: &'a str,
        session_id: &'a str,
        prompt: &'a str,
    ) -> BoxFuture<'a, Result<String, PoolError>> {
        Box::pin(async move { self.run_in_session(&cancel, agent_id, session_id, prompt).await })
    }
}
