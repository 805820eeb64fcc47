//! Agent lookup and provider construction ports.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;

use hive_types::llm::LlmError;
use secrecy::SecretString;

use crate::llm::box_provider::BoxLlmProvider;

/// Everything needed to run one agent.
#[derive(Debug, Clone)]
pub struct ResolvedAgent {
    pub id: String,
    pub name: String,
    /// Model identifier, possibly provider-prefixed (`anthropic/...`).
    pub model: String,
    pub api_key: Option<SecretString>,
    /// Directory holding the agent's identity and memory files.
    pub workspace: Option<PathBuf>,
    pub extra_context: Option<String>,
    /// Extra environment for `exec`.
    pub env: BTreeMap<String, SecretString>,
}

impl ResolvedAgent {
    /// The model name with any `provider/` prefix removed.
    pub fn bare_model(&self) -> &str {
        self.model
            .split_once('/')
            .map(|(_, m)| m)
            .unwrap_or(&self.model)
    }
}

/// Resolves agent IDs to their configuration.
///
/// Implementations live in hive-infra (e.g., `ConfigAgentResolver`).
pub trait AgentResolver: Send + Sync + 'static {
    fn resolve(&self, agent_id: &str) -> impl Future<Output = Option<ResolvedAgent>> + Send;

    /// All known agents.
    fn list(&self) -> impl Future<Output = Vec<ResolvedAgent>> + Send;
}

/// Builds the provider an agent's turns are sent to.
pub trait ProviderFactory: Send + Sync + 'static {
    fn create(&self, agent: &ResolvedAgent) -> Result<BoxLlmProvider, LlmError>;
}
