//! Configuration types for the Hive runtime.
//!
//! `HiveConfig` represents the top-level `config.toml`. Every section has
//! defaults, so an empty or missing file yields a working (agent-less)
//! configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HiveConfig {
    /// Overrides the resolved data directory when set.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub compaction: CompactionConfig,

    #[serde(default)]
    pub anthropic: AnthropicConfig,

    #[serde(default)]
    pub agents: Vec<AgentConfig>,
}

impl HiveConfig {
    /// Look up an agent by ID.
    pub fn agent(&self, id: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.id == id)
    }
}

/// Agent loop and worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// LLM round-trips allowed per turn before the turn fails.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Pending requests a session worker will hold before rejecting.
    #[serde(default = "default_worker_queue_capacity")]
    pub worker_queue_capacity: usize,

    /// Seconds a session worker may sit idle before stopping itself.
    #[serde(default = "default_worker_idle_timeout_secs")]
    pub worker_idle_timeout_secs: u64,
}

fn default_max_iterations() -> usize {
    10
}

fn default_worker_queue_capacity() -> usize {
    8
}

fn default_worker_idle_timeout_secs() -> u64 {
    30 * 60
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            worker_queue_capacity: default_worker_queue_capacity(),
            worker_idle_timeout_secs: default_worker_idle_timeout_secs(),
        }
    }
}

/// Context compaction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Token estimate at or above which a session is compacted.
    #[serde(default = "default_threshold_tokens")]
    pub threshold_tokens: u64,

    /// Most recent message entries kept verbatim.
    #[serde(default = "default_keep_turns")]
    pub keep_turns: usize,

    /// Upper bound on the summarizer call.
    #[serde(default = "default_compaction_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_threshold_tokens() -> u64 {
    80_000
}

fn default_keep_turns() -> usize {
    20
}

fn default_compaction_timeout_secs() -> u64 {
    90
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            threshold_tokens: default_threshold_tokens(),
            keep_turns: default_keep_turns(),
            timeout_secs: default_compaction_timeout_secs(),
        }
    }
}

/// Anthropic provider settings shared by all agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_max_tokens() -> u32 {
    8096
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            base_url: default_anthropic_base_url(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// One configured agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,

    #[serde(default)]
    pub name: String,

    pub model: String,

    /// Directory holding IDENTITY.md, SOUL.md and the agent's memory files.
    /// Relative paths resolve against the data directory.
    #[serde(default)]
    pub workspace: Option<PathBuf>,

    /// Inline API key. Prefer `api_key_env`.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Name of the environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Additional text appended to the system prompt.
    #[serde(default)]
    pub extra_context: Option<String>,

    /// Variables injected into `exec` tool runs. Their names, never their
    /// values, are listed in the system prompt.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}
