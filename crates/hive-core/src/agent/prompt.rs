//! System prompt assembly from an agent's workspace.
//!
//! Layout, with absent or blank sources skipped:
//! ```text
//! Current date and time: 2026-01-01 12:00:00 UTC
//!
//! --- IDENTITY.md ---
//! --- SOUL.md ---
//! --- memory/INDEX.md ---        (or legacy MEMORY.md)
//! --- RELATIONS.md ---
//! --- AGENTS.md ---
//! --- <each file AGENTS.md lists> ---
//!
//! <project context>
//!
//! ---
//! <extra context>
//!
//! ## Environment
//! - <each configured exec variable name>
//!
//! ## Runtime
//! Model: ... | Agent: ... | Workspace: ...
//! ```
//!
//! Files are re-read on every LLM call so edits made by tools during a turn
//! are visible to the next iteration.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

/// Inputs that vary per agent and per call.
#[derive(Debug, Clone, Default)]
pub struct PromptContext<'a> {
    pub agent_id: &'a str,
    pub model: &'a str,
    pub workspace: Option<&'a Path>,
    pub project_context: Option<&'a str>,
    pub extra_context: Option<&'a str>,
    /// Names of the agent's configured `exec` variables, already sorted.
    pub env_names: &'a [&'a str],
}

pub struct SystemPromptBuilder;

impl SystemPromptBuilder {
    /// Build the full system prompt as of `now`.
    pub async fn build(ctx: &PromptContext<'_>, now: DateTime<Utc>) -> String {
        let mut prompt = format!(
            "Current date and time: {}\n\n",
            now.format("%Y-%m-%d %H:%M:%S UTC")
        );

        if let Some(workspace) = ctx.workspace {
            prompt.push_str(&Self::workspace_sections(workspace).await);
        }

        if let Some(project) = ctx.project_context.filter(|s| !s.trim().is_empty()) {
            prompt.push_str("\n\n");
            prompt.push_str(project);
        }
        if let Some(extra) = ctx.extra_context.filter(|s| !s.trim().is_empty()) {
            prompt.push_str("\n\n---\n");
            prompt.push_str(extra);
        }
        if !ctx.env_names.is_empty() {
            prompt.push_str(
                "\n\n## Environment\nThese variables are set for every exec call, no export needed:",
            );
            for name in ctx.env_names {
                prompt.push_str("\n- ");
                prompt.push_str(name);
            }
        }

        let workspace = ctx
            .workspace
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        prompt.push_str(&format!(
            "\n\n## Runtime\nModel: {} | Agent: {} | Workspace: {}",
            ctx.model, ctx.agent_id, workspace
        ));
        prompt
    }

    /// The `--- FILE ---` sections for a workspace directory.
    pub async fn workspace_sections(workspace: &Path) -> String {
        let mut out = String::new();

        for name in ["IDENTITY.md", "SOUL.md"] {
            push_section(&mut out, name, read_trimmed(&workspace.join(name)).await);
        }

        match read_trimmed(&workspace.join("memory").join("INDEX.md")).await {
            Some(index) => push_section(&mut out, "memory/INDEX.md", Some(index)),
            None => push_section(
                &mut out,
                "MEMORY.md",
                read_trimmed(&workspace.join("MEMORY.md")).await,
            ),
        }

        push_section(
            &mut out,
            "RELATIONS.md",
            read_trimmed(&workspace.join("RELATIONS.md")).await,
        );

        if let Some(agents) = read_trimmed(&workspace.join("AGENTS.md")).await {
            let references = referenced_files(&agents);
            push_section(&mut out, "AGENTS.md", Some(agents));
            for reference in references {
                let path = resolve(workspace, &reference);
                push_section(&mut out, &reference, read_trimmed(&path).await);
            }
        }

        out
    }
}

fn push_section(out: &mut String, name: &str, content: Option<String>) {
    if let Some(content) = content {
        out.push_str(&format!("--- {name} ---\n{content}\n\n"));
    }
}

/// File contents, trimmed. `None` for missing, unreadable or blank files.
async fn read_trimmed(path: &Path) -> Option<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => {
            let trimmed = content.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(path = %path.display(), "skipping unreadable prompt file: {e}");
            }
            None
        }
    }
}

/// Lines of AGENTS.md naming further files: anything not blank, not a
/// heading and not a list item.
fn referenced_files(agents_md: &str) -> Vec<String> {
    agents_md
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with('-'))
        .map(str::to_string)
        .collect()
}

fn resolve(workspace: &Path, reference: &str) -> PathBuf {
    let p = Path::new(reference);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        workspace.join(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap()
    }

    #[tokio::test]
    async fn sections_follow_fixed_order() {
        let dir = TempDir::new().unwrap();
        let ws = dir.path();
        std::fs::write(ws.join("SOUL.md"), "calm").unwrap();
        std::fs::write(ws.join("IDENTITY.md"), "  I am Ada  ").unwrap();
        std::fs::write(ws.join("MEMORY.md"), "legacy memory").unwrap();
        std::fs::write(ws.join("RELATIONS.md"), "knows Bob").unwrap();
        std::fs::write(ws.join("AGENTS.md"), "# Agents\n- a list item\nextra.md\nmissing.md\n").unwrap();
        std::fs::write(ws.join("extra.md"), "extra notes").unwrap();

        let ctx = PromptContext {
            agent_id: "ada",
            model: "claude-test",
            workspace: Some(ws),
            project_context: Some("Projects: none"),
            extra_context: Some("be brief"),
            env_names: &["GITHUB_TOKEN", "GIT_AUTHOR_NAME"],
        };
        let prompt = SystemPromptBuilder::build(&ctx, fixed_now()).await;

        assert!(prompt.starts_with("Current date and time: 2026-03-01 09:30:00 UTC\n\n"));
        let order = [
            "--- IDENTITY.md ---\nI am Ada\n",
            "--- SOUL.md ---\ncalm",
            "--- MEMORY.md ---\nlegacy memory",
            "--- RELATIONS.md ---",
            "--- AGENTS.md ---",
            "--- extra.md ---\nextra notes",
            "Projects: none",
            "\n\n---\nbe brief",
            "## Environment\n",
            "- GITHUB_TOKEN\n- GIT_AUTHOR_NAME\n\n## Runtime",
            "## Runtime\nModel: claude-test | Agent: ada | Workspace: ",
        ];
        let mut last = 0;
        for needle in order {
            let pos = prompt[last..]
                .find(needle)
                .unwrap_or_else(|| panic!("missing or out of order: {needle:?}\n{prompt}"));
            last += pos;
        }
        assert!(!prompt.contains("--- missing.md ---"));
    }

    #[tokio::test]
    async fn memory_index_takes_precedence_over_legacy_file() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("memory")).unwrap();
        std::fs::write(dir.path().join("memory/INDEX.md"), "index").unwrap();
        std::fs::write(dir.path().join("MEMORY.md"), "legacy").unwrap();

        let sections = SystemPromptBuilder::workspace_sections(dir.path()).await;
        assert!(sections.contains("--- memory/INDEX.md ---\nindex"));
        assert!(!sections.contains("legacy"));
    }

    #[tokio::test]
    async fn no_workspace_still_has_runtime_line() {
        let ctx = PromptContext {
            agent_id: "main",
            model: "m",
            ..PromptContext::default()
        };
        let prompt = SystemPromptBuilder::build(&ctx, fixed_now()).await;
        assert!(prompt.ends_with("## Runtime\nModel: m | Agent: main | Workspace: "));
        assert!(!prompt.contains("---"));
        assert!(!prompt.contains("## Environment"));
    }
}
