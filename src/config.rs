//! Runtime configuration.
//!
//! Sources, lowest precedence first: built-in defaults, an optional YAML file,
//! environment variables. The CLI applies its flags on top.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::lua::SandboxLimits;

pub const ENV_RULESETS_DIR: &str = "RULEWEAVE_RULESETS_DIR";
pub const ENV_EVAL_TIMEOUT_MS: &str = "RULEWEAVE_EVAL_TIMEOUT_MS";
pub const ENV_EVAL_MEMORY_LIMIT: &str = "RULEWEAVE_EVAL_MEMORY_LIMIT";
pub const ENV_DEFAULT_RULESET: &str = "RULEWEAVE_DEFAULT_RULESET";

/// Limits applied to each rule expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub timeout_ms: u64,
    pub memory_limit: usize,
    pub instruction_interval: u32,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        let limits = SandboxLimits::default();
        Self {
            timeout_ms: limits.timeout.as_millis() as u64,
            memory_limit: limits.memory_limit,
            instruction_interval: limits.instruction_interval,
        }
    }
}

impl EvaluationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn limits(&self) -> SandboxLimits {
        SandboxLimits {
            timeout: self.timeout(),
            memory_limit: self.memory_limit,
            instruction_interval: self.instruction_interval,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Directory scanned for ruleset documents.
    pub rulesets_dir: Option<PathBuf>,
    /// Ruleset activated at startup, `id` or `id@version`.
    pub default_ruleset: Option<String>,
    pub evaluation: EvaluationConfig,
}

impl RuntimeConfig {
    /// Per-user config file location, e.g. `~/.config/ruleweave/config.yaml`.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "ruleweave").map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Read a YAML config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    /// Defaults, then `path` (or the per-user file if it exists), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => Self::from_file(path)?,
                None => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_RULESETS_DIR) {
            self.rulesets_dir = Some(PathBuf::from(dir));
        }
        if let Some(id) = lookup(ENV_DEFAULT_RULESET) {
            self.default_ruleset = Some(id);
        }
        if let Some(ms) = lookup(ENV_EVAL_TIMEOUT_MS) {
            self.evaluation.timeout_ms = ms
                .trim()
                .parse()
                .with_context(|| format!("{} must be a number of milliseconds", ENV_EVAL_TIMEOUT_MS))?;
        }
        if let Some(bytes) = lookup(ENV_EVAL_MEMORY_LIMIT) {
            self.evaluation.memory_limit = bytes
                .trim()
                .parse()
                .with_context(|| format!("{} must be a number of bytes", ENV_EVAL_MEMORY_LIMIT))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.evaluation.timeout(), Duration::from_millis(250));
        assert_eq!(config.evaluation.memory_limit, 8 * 1024 * 1024);
        assert!(config.rulesets_dir.is_none());
    }

    #[test]
    fn test_from_file_partial() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(&path, "rulesets_dir: /srv/rules\nevaluation:\n  timeout_ms: 100\n").unwrap();

        let config = RuntimeConfig::from_file(&path).unwrap();
        assert_eq!(config.rulesets_dir, Some(PathBuf::from("/srv/rules")));
        assert_eq!(config.evaluation.timeout_ms, 100);
        assert_eq!(config.evaluation.memory_limit, 8 * 1024 * 1024);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_RULESETS_DIR, "/tmp/rules"),
            (ENV_EVAL_TIMEOUT_MS, "75"),
            (ENV_DEFAULT_RULESET, "dnd5e@1.0"),
        ]
        .into_iter()
        .collect();

        let mut config = RuntimeConfig::default();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.rulesets_dir, Some(PathBuf::from("/tmp/rules")));
        assert_eq!(config.evaluation.limits().timeout, Duration::from_millis(75));
        assert_eq!(config.default_ruleset.as_deref(), Some("dnd5e@1.0"));
    }

    #[test]
    fn test_bad_env_value() {
        let mut config = RuntimeConfig::default();
        let err = config
            .apply_env(|key| (key == ENV_EVAL_MEMORY_LIMIT).then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_EVAL_MEMORY_LIMIT));
    }
}
