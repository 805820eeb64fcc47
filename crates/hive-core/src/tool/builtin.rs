//! Workspace-scoped built-in tools: `read`, `write`, `edit` and `exec`.
//!
//! Relative paths resolve against the calling agent's workspace. `exec`
//! runs `bash -c` inside the workspace with credentials removed from the
//! inherited environment.

use std::process::Stdio;
use std::time::Duration;

use futures_util::future::BoxFuture;
use hive_types::error::ToolError;
use hive_types::llm::ToolDefinition;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;

use super::registry::{Tool, ToolContext, ToolRegistry, parse_input};

/// Upper bound (and default) for `exec` timeouts.
pub const EXEC_MAX_TIMEOUT_SECS: u64 = 120;

/// Environment variable name fragments that mark a variable as a secret.
const SECRET_ENV_MARKERS: &[&str] = &[
    "_API_KEY",
    "_SECRET",
    "_TOKEN",
    "_PASSWORD",
    "_PASSWD",
    "_PRIVATE_KEY",
    "_ACCESS_KEY",
    "_AUTH_KEY",
    "ANTHROPIC_",
    "OPENAI_",
    "DEEPSEEK_",
    "OPENROUTER_",
];

/// Register `read`, `write`, `edit` and `exec`.
pub fn register_workspace_tools(registry: &mut ToolRegistry) {
    registry.register(ReadTool);
    registry.register(WriteTool);
    registry.register(EditTool);
    registry.register(ExecTool);
}

/// Read a file, optionally a window of lines.
pub struct ReadTool;

#[derive(Deserialize)]
struct ReadInput {
    file_path: String,
    #[serde(default)]
    offset: usize,
    #[serde(default)]
    limit: usize,
}

impl Tool for ReadTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "read".to_string(),
            description: "Read a file. Use offset (1-based line) and limit (line count) for large files."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "file_path": {"type": "string"},
                    "offset": {"type": "integer", "description": "First line to read, 1-based"},
                    "limit": {"type": "integer", "description": "Maximum number of lines"}
                },
                "required": ["file_path"]
            }),
        }
    }

    fn call<'a>(
        &'a self,
        ctx: &'a ToolContext,
        input: serde_json::Value,
    ) -> BoxFuture<'a, Result<String, ToolError>> {
        Box::pin(async move {
            let input: ReadInput = parse_input(input)?;
            let path = ctx.resolve_path(&input.file_path);
            let data = tokio::fs::read_to_string(&path).await?;
            slice_lines(&data, input.offset, input.limit)
        })
    }
}

fn slice_lines(data: &str, offset: usize, limit: usize) -> Result<String, ToolError> {
    let lines: Vec<&str> = data.split('\n').collect();
    let start = offset.saturating_sub(1);
    if start > lines.len() {
        return Err(ToolError::InvalidInput(format!(
            "offset {offset} exceeds file length {}",
            lines.len()
        )));
    }
    let end = if limit > 0 {
        (start + limit).min(lines.len())
    } else {
        lines.len()
    };
    Ok(lines[start..end].join("\n"))
}

/// Create or overwrite a file.
pub struct WriteTool;

#[derive(Deserialize)]
struct WriteInput {
    file_path: String,
    content: String,
}

impl Tool for WriteTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "write".to_string(),
            description: "Write content to a file, creating parent directories as needed.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "file_path": {"type": "string"},
                    "content": {"type": "string"}
                },
                "required": ["file_path", "content"]
            }),
        }
    }

    fn call<'a>(
        &'a self,
        ctx: &'a ToolContext,
        input: serde_json::Value,
    ) -> BoxFuture<'a, Result<String, ToolError>> {
        Box::pin(async move {
            let input: WriteInput = parse_input(input)?;
            let path = ctx.resolve_path(&input.file_path);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, input.content.as_bytes()).await?;
            Ok(format!(
                "Written {} bytes to {}",
                input.content.len(),
                path.display()
            ))
        })
    }
}

/// Replace one exact occurrence of a string in a file.
pub struct EditTool;

#[derive(Deserialize)]
struct EditInput {
    file_path: String,
    old_string: String,
    new_string: String,
}

impl Tool for EditTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "edit".to_string(),
            description: "Edit a file by replacing exact text. old_string must match exactly, whitespace included."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "file_path": {"type": "string"},
                    "old_string": {"type": "string"},
                    "new_string": {"type": "string"}
                },
                "required": ["file_path", "old_string", "new_string"]
            }),
        }
    }

    fn call<'a>(
        &'a self,
        ctx: &'a ToolContext,
        input: serde_json::Value,
    ) -> BoxFuture<'a, Result<String, ToolError>> {
        Box::pin(async move {
            let input: EditInput = parse_input(input)?;
            if input.old_string.is_empty() {
                return Err(ToolError::InvalidInput("old_string must not be empty".into()));
            }
            let path = ctx.resolve_path(&input.file_path);
            let source = tokio::fs::read_to_string(&path).await?;
            if !source.contains(&input.old_string) {
                return Err(ToolError::Execution(format!(
                    "old_string not found in {}",
                    path.display()
                )));
            }
            let updated = source.replacen(&input.old_string, &input.new_string, 1);
            tokio::fs::write(&path, updated).await?;
            Ok(format!("Replaced 1 occurrence in {}", path.display()))
        })
    }
}

/// Run a shell command in the workspace.
pub struct ExecTool;

#[derive(Deserialize)]
struct ExecInput {
    command: String,
    #[serde(default)]
    timeout: Option<f64>,
}

/// Fractional timeouts round up to whole seconds; anything outside
/// `1..=EXEC_MAX_TIMEOUT_SECS` falls back to the maximum.
fn exec_timeout_secs(requested: Option<f64>) -> u64 {
    requested
        .filter(|t| t.is_finite() && *t > 0.0)
        .map(|t| t.ceil() as u64)
        .filter(|t| *t <= EXEC_MAX_TIMEOUT_SECS)
        .unwrap_or(EXEC_MAX_TIMEOUT_SECS)
}

impl Tool for ExecTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "exec".to_string(),
            description: format!(
                "Execute a shell command in the workspace. Times out after {EXEC_MAX_TIMEOUT_SECS} seconds."
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "Shell command to execute"},
                    "timeout": {"type": "number", "description": "Timeout in seconds (max 120)"}
                },
                "required": ["command"]
            }),
        }
    }

    fn call<'a>(
        &'a self,
        ctx: &'a ToolContext,
        input: serde_json::Value,
    ) -> BoxFuture<'a, Result<String, ToolError>> {
        Box::pin(async move {
            let input: ExecInput = parse_input(input)?;
            let secs = exec_timeout_secs(input.timeout);

            let mut command = tokio::process::Command::new("bash");
            command
                .arg("-c")
                .arg(&input.command)
                .env_clear()
                .envs(sanitized_env(std::env::vars()))
                .envs(ctx.env.iter().map(|(k, v)| (k, v.expose_secret())))
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);
            if ctx.workspace.is_dir() {
                command.current_dir(&ctx.workspace);
            }

            let child = command.spawn()?;
            let output = tokio::time::timeout(Duration::from_secs(secs), child.wait_with_output())
                .await
                .map_err(|_| ToolError::Timeout { secs })??;

            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            if !output.status.success() {
                return Err(ToolError::Execution(format!(
                    "command failed: {}\n{}",
                    output.status,
                    text.trim_end()
                )));
            }
            Ok(text)
        })
    }
}

/// Drop variables whose names look like credentials.
pub fn sanitized_env(
    vars: impl IntoIterator<Item = (String, String)>,
) -> Vec<(String, String)> {
    vars.into_iter()
        .filter(|(key, _)| {
            let upper = key.to_uppercase();
            !SECRET_ENV_MARKERS.iter().any(|m| upper.contains(m))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        register_workspace_tools(&mut registry);
        registry
    }

    #[tokio::test]
    async fn write_then_read_window() {
        let dir = TempDir::new().unwrap();
        let ctx = ToolContext::new("main", dir.path());
        let registry = registry();

        registry
            .execute(
                &ctx,
                "write",
                json!({"file_path": "notes/a.txt", "content": "one\ntwo\nthree\nfour"}),
            )
            .await
            .unwrap();
        assert!(dir.path().join("notes/a.txt").exists());

        let window = registry
            .execute(&ctx, "read", json!({"file_path": "notes/a.txt", "offset": 2, "limit": 2}))
            .await
            .unwrap();
        assert_eq!(window, "two\nthree");

        let all = registry
            .execute(&ctx, "read", json!({"file_path": "notes/a.txt"}))
            .await
            .unwrap();
        assert_eq!(all, "one\ntwo\nthree\nfour");
    }

    #[test]
    fn offset_past_end_is_rejected() {
        assert!(slice_lines("a\nb", 5, 0).is_err());
        assert_eq!(slice_lines("a\nb", 3, 0).unwrap(), "");
    }

    #[tokio::test]
    async fn edit_replaces_first_occurrence_only() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("f.txt"), "x x x").unwrap();
        let ctx = ToolContext::new("main", dir.path());

        registry()
            .execute(
                &ctx,
                "edit",
                json!({"file_path": "f.txt", "old_string": "x", "new_string": "y"}),
            )
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("f.txt")).unwrap(), "y x x");

        let err = registry()
            .execute(
                &ctx,
                "edit",
                json!({"file_path": "f.txt", "old_string": "zzz", "new_string": "y"}),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("old_string not found"));
    }

    #[tokio::test]
    async fn missing_required_field_is_invalid_input() {
        let dir = TempDir::new().unwrap();
        let err = registry()
            .execute(&ToolContext::new("main", dir.path()), "write", json!({"file_path": "a"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn exec_runs_in_workspace() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();
        let out = registry()
            .execute(&ToolContext::new("main", dir.path()), "exec", json!({"command": "ls"}))
            .await
            .unwrap();
        assert!(out.contains("marker.txt"));
    }

    #[tokio::test]
    async fn exec_failure_carries_output() {
        let dir = TempDir::new().unwrap();
        let err = registry()
            .execute(
                &ToolContext::new("main", dir.path()),
                "exec",
                json!({"command": "echo oops >&2; exit 3"}),
            )
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("command failed"));
        assert!(msg.contains("oops"));
    }

    #[tokio::test]
    async fn exec_times_out() {
        let dir = TempDir::new().unwrap();
        let err = registry()
            .execute(
                &ToolContext::new("main", dir.path()),
                "exec",
                json!({"command": "sleep 5", "timeout": 1}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout { secs: 1 }));
    }

    #[tokio::test]
    async fn exec_accepts_fractional_timeout() {
        let dir = TempDir::new().unwrap();
        let err = registry()
            .execute(
                &ToolContext::new("main", dir.path()),
                "exec",
                json!({"command": "sleep 5", "timeout": 1.5}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout { secs: 2 }));
    }

    #[tokio::test]
    async fn exec_sees_agent_env() {
        let dir = TempDir::new().unwrap();
        let mut ctx = ToolContext::new("main", dir.path());
        ctx.env.insert("HIVE_GREETING".into(), secrecy::SecretString::from("hello".to_string()));
        ctx.env.insert("GITHUB_TOKEN".into(), secrecy::SecretString::from("ghp_x".to_string()));
        let out = registry()
            .execute(&ctx, "exec", json!({"command": "echo $HIVE_GREETING $GITHUB_TOKEN"}))
            .await
            .unwrap();
        assert_eq!(out.trim(), "hello ghp_x");
    }

    #[test]
    fn exec_timeout_is_clamped() {
        assert_eq!(exec_timeout_secs(None), EXEC_MAX_TIMEOUT_SECS);
        assert_eq!(exec_timeout_secs(Some(0.0)), EXEC_MAX_TIMEOUT_SECS);
        assert_eq!(exec_timeout_secs(Some(-3.0)), EXEC_MAX_TIMEOUT_SECS);
        assert_eq!(exec_timeout_secs(Some(500.0)), EXEC_MAX_TIMEOUT_SECS);
        assert_eq!(exec_timeout_secs(Some(0.2)), 1);
        assert_eq!(exec_timeout_secs(Some(30.0)), 30);
    }

    #[test]
    fn secrets_are_stripped_from_env() {
        let env = sanitized_env(vec![
            ("PATH".to_string(), "/bin".to_string()),
            ("ANTHROPIC_API_KEY".to_string(), "sk".to_string()),
            ("github_token".to_string(), "t".to_string()),
            ("HOME".to_string(), "/root".to_string()),
        ]);
        let keys: Vec<_> = env.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["PATH", "HOME"]);
    }
}
