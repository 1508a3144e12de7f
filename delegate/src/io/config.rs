//! Delegation configuration stored under `.delegate/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::branch::DEFAULT_BRANCH_PREFIX;
use crate::core::state::DEFAULT_MAX_RETRIES;
use crate::orchestrator::DEFAULT_MODEL;

/// Environment variable overriding [`DelegateConfig::model`].
pub const MODEL_ENV: &str = "DELEGATE_MODEL";

/// Delegation configuration (TOML).
///
/// Missing fields default to the values below, so an empty file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DelegateConfig {
    /// Retry ceiling of the circuit breaker.
    pub max_retries: u32,

    /// Model identifier handed to the completion engine.
    pub model: String,

    /// Prefix for isolated working branches.
    pub branch_prefix: String,

    pub command: CommandConfig,
    pub completer: CompleterConfig,
    pub agent: AgentConfig,
    pub pull_request: PullRequestConfig,
}

/// Limits for the bounded command runner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommandConfig {
    pub timeout_secs: u64,
    /// Bytes kept per stream before line truncation.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CompleterConfig {
    /// Command reading a conversation on stdin and printing the completion.
    /// `{model}` in any argument is replaced by the configured model.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

/// Which execution agent runs the Execute state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AgentKind {
    /// External agent process (`agent.command`).
    Command,
    /// Completion-driven `FILE:`/`CONTENT:`/`END` blocks applied in the sandbox.
    FileBlocks,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    pub kind: AgentKind,
    /// Agent process for `kind = "command"`; receives the task on stdin.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
    /// Shell command run after file blocks are applied (e.g. `python -m pytest`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_command: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PullRequestConfig {
    /// Base branch for draft pull requests.
    pub base: String,
}

impl Default for DelegateConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            model: DEFAULT_MODEL.to_string(),
            branch_prefix: DEFAULT_BRANCH_PREFIX.to_string(),
            command: CommandConfig::default(),
            completer: CompleterConfig::default(),
            agent: AgentConfig::default(),
            pull_request: PullRequestConfig::default(),
        }
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Default for CompleterConfig {
    fn default() -> Self {
        Self {
            command: vec!["codex".to_string(), "exec".to_string(), "-".to_string()],
            timeout_secs: 10 * 60,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            kind: AgentKind::Command,
            command: vec![
                "codex".to_string(),
                "exec".to_string(),
                "--skip-git-repo-check".to_string(),
                "-".to_string(),
            ],
            timeout_secs: 30 * 60,
            output_limit_bytes: 1_000_000,
            check_command: None,
        }
    }
}

impl Default for PullRequestConfig {
    fn default() -> Self {
        Self {
            base: "main".to_string(),
        }
    }
}

impl DelegateConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(anyhow!("model must not be empty"));
        }
        if self.branch_prefix.contains("..") || self.branch_prefix.starts_with('/') {
            return Err(anyhow!(
                "branch_prefix must be a relative ref prefix (got '{}')",
                self.branch_prefix
            ));
        }
        if self.command.timeout_secs == 0 {
            return Err(anyhow!("command.timeout_secs must be > 0"));
        }
        if self.command.output_limit_bytes == 0 {
            return Err(anyhow!("command.output_limit_bytes must be > 0"));
        }
        if self.completer.timeout_secs == 0 {
            return Err(anyhow!("completer.timeout_secs must be > 0"));
        }
        if is_blank_command(&self.completer.command) {
            return Err(anyhow!("completer.command must be a non-empty array"));
        }
        if self.agent.timeout_secs == 0 {
            return Err(anyhow!("agent.timeout_secs must be > 0"));
        }
        if self.agent.output_limit_bytes == 0 {
            return Err(anyhow!("agent.output_limit_bytes must be > 0"));
        }
        if self.agent.kind == AgentKind::Command && is_blank_command(&self.agent.command) {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        Ok(())
    }

    /// Apply `DELEGATE_MODEL` if set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(model) = std::env::var(MODEL_ENV)
            && !model.trim().is_empty()
        {
            debug!(model = %model, "model overridden from environment");
            self.model = model;
        }
        self
    }
}

fn is_blank_command(command: &[String]) -> bool {
    command.first().is_none_or(|program| program.trim().is_empty())
}

/// Default config location inside a target repository.
pub fn default_config_path(target_dir: &Path) -> PathBuf {
    target_dir.join(".delegate").join("config.toml")
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `DelegateConfig::default()`.
pub fn load_config(path: &Path) -> Result<DelegateConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing, using defaults");
        let cfg = DelegateConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: DelegateConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &DelegateConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, DelegateConfig::default());
        assert_eq!(cfg.max_retries, 3);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = default_config_path(temp.path());
        let cfg = DelegateConfig {
            max_retries: 5,
            agent: AgentConfig {
                kind: AgentKind::FileBlocks,
                check_command: Some("python -m pytest".to_string()),
                ..AgentConfig::default()
            },
            ..DelegateConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_retries = 1\n[agent]\nkind = \"file-blocks\"\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_retries, 1);
        assert_eq!(cfg.agent.kind, AgentKind::FileBlocks);
        assert_eq!(cfg.command, CommandConfig::default());
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let cfg = DelegateConfig {
            command: CommandConfig {
                timeout_secs: 0,
                ..CommandConfig::default()
            },
            ..DelegateConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("command.timeout_secs"));
    }

    #[test]
    fn validate_rejects_empty_agent_command() {
        let cfg = DelegateConfig {
            agent: AgentConfig {
                command: Vec::new(),
                ..AgentConfig::default()
            },
            ..DelegateConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
