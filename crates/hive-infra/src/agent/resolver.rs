//! Config-backed [`AgentResolver`] and the Anthropic [`ProviderFactory`].

use std::path::Path;

use secrecy::{ExposeSecret, SecretString};

use hive_core::agent::resolver::{AgentResolver, ProviderFactory, ResolvedAgent};
use hive_core::llm::box_provider::BoxLlmProvider;
use hive_types::config::{AgentConfig, AnthropicConfig, HiveConfig};
use hive_types::llm::LlmError;

use crate::llm::anthropic::AnthropicProvider;

/// Environment variable consulted when an Anthropic agent names no key.
pub const DEFAULT_ANTHROPIC_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Resolves agents from the `[[agents]]` tables of `config.toml`.
///
/// Keys are read once at construction. Relative workspaces resolve
/// against the data directory.
#[derive(Debug, Clone, Default)]
pub struct ConfigAgentResolver {
    agents: Vec<ResolvedAgent>,
}

impl ConfigAgentResolver {
    pub fn from_config(config: &HiveConfig, data_dir: &Path) -> Self {
        Self::with_env(config, data_dir, |name| std::env::var(name).ok())
    }

    /// Like [`from_config`](Self::from_config), reading environment
    /// variables through `env`.
    pub fn with_env(config: &HiveConfig, data_dir: &Path, env: impl Fn(&str) -> Option<String>) -> Self {
        let agents = config
            .agents
            .iter()
            .map(|agent| resolve_agent(agent, data_dir, &env))
            .collect();
        Self { agents }
    }
}

fn resolve_agent(agent: &AgentConfig, data_dir: &Path, env: &impl Fn(&str) -> Option<String>) -> ResolvedAgent {
    let api_key = agent
        .api_key
        .clone()
        .filter(|k| !k.is_empty())
        .or_else(|| agent.api_key_env.as_deref().and_then(env))
        .or_else(|| {
            let anthropic = agent.model.starts_with("anthropic/") || !agent.model.contains('/');
            anthropic.then(|| env(DEFAULT_ANTHROPIC_KEY_ENV)).flatten()
        })
        .filter(|k| !k.trim().is_empty())
        .map(SecretString::from);
    if api_key.is_none() {
        tracing::debug!(agent_id = %agent.id, "no API key configured");
    }

    ResolvedAgent {
        id: agent.id.clone(),
        name: if agent.name.is_empty() {
            agent.id.clone()
        } else {
            agent.name.clone()
        },
        model: agent.model.clone(),
        api_key,
        workspace: agent.workspace.as_ref().map(|w| {
            if w.is_absolute() {
                w.clone()
            } else {
                data_dir.join(w)
            }
        }),
        extra_context: agent.extra_context.clone(),
        env: agent
            .env
            .iter()
            .map(|(k, v)| (k.clone(), SecretString::from(v.clone())))
            .collect(),
    }
}

impl AgentResolver for ConfigAgentResolver {
    async fn resolve(&self, agent_id: &str) -> Option<ResolvedAgent> {
        self.agents.iter().find(|a| a.id == agent_id).cloned()
    }

    async fn list(&self) -> Vec<ResolvedAgent> {
        self.agents.clone()
    }
}

/// Builds an [`AnthropicProvider`] per agent.
#[derive(Debug, Clone, Default)]
pub struct AnthropicProviderFactory {
    config: AnthropicConfig,
}

impl AnthropicProviderFactory {
    pub fn new(config: AnthropicConfig) -> Self {
        Self { config }
    }
}

impl ProviderFactory for AnthropicProviderFactory {
    fn create(&self, agent: &ResolvedAgent) -> Result<BoxLlmProvider, LlmError> {
        if let Some((provider, _)) = agent.model.split_once('/') {
            if provider != "anthropic" {
                return Err(LlmError::InvalidRequest(format!(
                    "unsupported provider '{provider}' for model {}",
                    agent.model
                )));
            }
        }
        let key = agent.api_key.as_ref().ok_or(LlmError::AuthenticationFailed)?;
        let provider = AnthropicProvider::new(SecretString::from(key.expose_secret().to_string()))?
            .with_base_url(self.config.base_url.clone())
            .with_default_max_tokens(self.config.max_tokens);
        Ok(BoxLlmProvider::new(provider))
    }
}
