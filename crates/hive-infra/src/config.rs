//! Configuration loader for Hive.
//!
//! Reads `config.toml` from the data directory (`~/.hive/` in production)
//! and deserializes it into [`HiveConfig`]. Falls back to defaults when the
//! file is missing or malformed.

use std::path::{Path, PathBuf};

use anyhow::Context;
use hive_types::config::HiveConfig;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "HIVE_DATA_DIR";

/// Load configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`HiveConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - If the file exists and parses successfully, returns the parsed config.
pub async fn load_config(data_dir: &Path) -> HiveConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return HiveConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return HiveConfig::default();
        }
    };

    match toml::from_str::<HiveConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            HiveConfig::default()
        }
    }
}

/// Resolve the data directory: `$HIVE_DATA_DIR`, else `~/.hive`.
pub fn resolve_data_dir() -> anyhow::Result<PathBuf> {
    data_dir_from(std::env::var_os(DATA_DIR_ENV).map(PathBuf::from), dirs::home_dir())
}

fn data_dir_from(env: Option<PathBuf>, home: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(dir) = env.filter(|d| !d.as_os_str().is_empty()) {
        return Ok(dir);
    }
    let home = home.context("could not determine home directory; set HIVE_DATA_DIR")?;
    Ok(home.join(".hive"))
}

/// Sessions directory under the data directory.
pub fn sessions_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("sessions")
}

/// Background task directory under the data directory.
pub fn tasks_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("tasks")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(tmp.path()).await;
        assert_eq!(config.runtime.max_iterations, 10);
        assert!(config.agents.is_empty());
    }

    #[tokio::test]
    async fn load_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
[compaction]
threshold_tokens = 1000

[[agents]]
id = "main"
model = "anthropic/claude-sonnet-4-20250514"
"#,
        )
        .await
        .unwrap();

        let config = load_config(tmp.path()).await;
        assert_eq!(config.compaction.threshold_tokens, 1000);
        assert_eq!(config.compaction.keep_turns, 20);
        assert_eq!(config.agents.len(), 1);
    }

    #[tokio::test]
    async fn load_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "this is not { valid toml !!!")
            .await
            .unwrap();
        let config = load_config(tmp.path()).await;
        assert_eq!(config.compaction.threshold_tokens, 80_000);
    }

    #[test]
    fn data_dir_prefers_env_then_home() {
        let dir = data_dir_from(Some("/srv/hive".into()), Some("/home/u".into())).unwrap();
        assert_eq!(dir, PathBuf::from("/srv/hive"));
        let dir = data_dir_from(Some(PathBuf::new()), Some("/home/u".into())).unwrap();
        assert_eq!(dir, PathBuf::from("/home/u/.hive"));
        assert!(data_dir_from(None, None).is_err());
    }
}
