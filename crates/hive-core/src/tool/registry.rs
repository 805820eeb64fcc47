//! Tool trait and name-keyed registry.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use hive_types::error::ToolError;
use hive_types::llm::ToolDefinition;
use secrecy::SecretString;
use serde::de::DeserializeOwned;

/// Who is calling a tool, and where relative paths resolve.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub agent_id: String,
    pub session_id: Option<String>,
    pub workspace: PathBuf,
    /// Agent-configured variables layered over the sanitized process env.
    pub env: BTreeMap<String, SecretString>,
}

impl ToolContext {
    pub fn new(agent_id: impl Into<String>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            agent_id: agent_id.into(),
            session_id: None,
            workspace: workspace.into(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Resolve `path` against the workspace. Absolute paths pass through.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.workspace.join(p)
        }
    }
}

/// A callable tool.
///
/// Object-safe so heterogeneous tools can live in one registry; handlers
/// return a boxed future borrowing the tool and context.
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    fn call<'a>(
        &'a self,
        ctx: &'a ToolContext,
        input: serde_json::Value,
    ) -> BoxFuture<'a, Result<String, ToolError>>;
}

/// Deserialize tool input, mapping failures to [`ToolError::InvalidInput`].
pub fn parse_input<T: DeserializeOwned>(input: serde_json::Value) -> Result<T, ToolError> {
    serde_json::from_value(input).map_err(|e| ToolError::InvalidInput(e.to_string()))
}

/// Adapts an async closure into a [`Tool`].
struct FnTool<F> {
    definition: ToolDefinition,
    handler: F,
}

impl<F, Fut> Tool for FnTool<F>
where
    F: Fn(ToolContext, serde_json::Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, ToolError>> + Send + 'static,
{
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    fn call<'a>(
        &'a self,
        ctx: &'a ToolContext,
        input: serde_json::Value,
    ) -> BoxFuture<'a, Result<String, ToolError>> {
        Box::pin((self.handler)(ctx.clone(), input))
    }
}

/// Name-keyed tool collection. Definitions keep registration order.
#[derive(Default)]
pub struct ToolRegistry {
    definitions: Vec<ToolDefinition>,
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `tool`. A tool with the same name is replaced in place.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        let definition = tool.definition();
        match self
            .definitions
            .iter_mut()
            .find(|d| d.name == definition.name)
        {
            Some(existing) => *existing = definition.clone(),
            None => self.definitions.push(definition.clone()),
        }
        self.tools.insert(definition.name, Arc::new(tool));
    }

    /// Register an async closure as a tool.
    pub fn register_fn<F, Fut>(&mut self, definition: ToolDefinition, handler: F)
    where
        F: Fn(ToolContext, serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, ToolError>> + Send + 'static,
    {
        self.register(FnTool {
            definition,
            handler,
        });
    }

    /// Definitions advertised to the model.
    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run the named tool.
    #[tracing::instrument(name = "tool.execute", skip(self, ctx, input), fields(agent_id = %ctx.agent_id))]
    pub async fn execute(
        &self,
        ctx: &ToolContext,
        tool: &str,
        input: serde_json::Value,
    ) -> Result<String, ToolError> {
        let Some(handler) = self.tools.get(tool) else {
            return Err(ToolError::UnknownTool(tool.to_string()));
        };
        let result = handler.call(ctx, input).await;
        if let Err(e) = &result {
            tracing::debug!("tool failed: {e}");
        }
        result
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field(
                "tools",
                &self.definitions.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
