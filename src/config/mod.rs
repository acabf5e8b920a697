//! Application configuration (`config/interview.toml`) with env overrides.

pub mod evaluator;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::rule_engine::DEFAULT_DURATION_THRESHOLD_MONTHS;
use evaluator::EvaluatorConfig;

// --- env defaults & names ---
pub const DEFAULT_CONFIG_PATH: &str = "config/interview.toml";
pub const DEFAULT_MAX_CLARIFICATIONS: u8 = 2;
pub const DEFAULT_IDLE_TIMEOUT_MINS: u64 = 60;

pub const ENV_CONFIG_PATH: &str = "INTERVIEW_CONFIG_PATH";
pub const ENV_MAX_CLARIFICATIONS: &str = "INTERVIEW_MAX_CLARIFICATIONS";
pub const ENV_RESULTS_DIR: &str = "INTERVIEW_RESULTS_DIR";

fn default_max_clarifications() -> u8 {
    DEFAULT_MAX_CLARIFICATIONS
}
fn default_idle_timeout_mins() -> u64 {
    DEFAULT_IDLE_TIMEOUT_MINS
}
fn default_threshold() -> u32 {
    DEFAULT_DURATION_THRESHOLD_MONTHS
}
fn default_results_dir() -> PathBuf {
    PathBuf::from("data/results")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewSettings {
    /// Clarification prompts per question before falling back to unknown.
    #[serde(default = "default_max_clarifications")]
    pub max_clarifications: u8,
    #[serde(default = "default_threshold")]
    pub duration_threshold_months: u32,
    #[serde(default)]
    pub questions_path: Option<PathBuf>,
    /// Unfinished sessions untouched this long are dropped; 0 keeps them.
    #[serde(default = "default_idle_timeout_mins")]
    pub idle_timeout_mins: u64,
}

impl Default for InterviewSettings {
    fn default() -> Self {
        Self {
            max_clarifications: default_max_clarifications(),
            duration_threshold_months: default_threshold(),
            questions_path: None,
            idle_timeout_mins: default_idle_timeout_mins(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            results_dir: default_results_dir(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub interview: InterviewSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub evaluator: EvaluatorConfig,
}

impl AppConfig {
    /// Load from `$INTERVIEW_CONFIG_PATH` or `config/interview.toml`.
    /// A missing file yields defaults; a broken file is an error.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let mut cfg = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("reading interview config at {}", path.display()))?;
            Self::from_toml_str(&content)
                .with_context(|| format!("parsing interview config at {}", path.display()))?
        } else {
            tracing::info!(path = %path.display(), "no interview config file, using defaults");
            Self::default()
        };
        cfg.apply_env_overrides();
        cfg.evaluator = cfg.evaluator.resolve()?;
        Ok(cfg)
    }

    pub fn from_toml_str(toml_str: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(n) = std::env::var(ENV_MAX_CLARIFICATIONS)
            .ok()
            .and_then(|s| s.trim().parse::<u8>().ok())
        {
            self.interview.max_clarifications = n;
        }
        if let Ok(dir) = std::env::var(ENV_RESULTS_DIR) {
            if !dir.trim().is_empty() {
                self.storage.results_dir = PathBuf::from(dir);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg = AppConfig::from_toml_str(
            r#"
[interview]
max_clarifications = 1

[evaluator]
enabled = true
model = "gpt-4o-mini"
"#,
        )
        .unwrap();
        assert_eq!(cfg.interview.max_clarifications, 1);
        assert_eq!(cfg.interview.duration_threshold_months, 3);
        assert_eq!(cfg.interview.idle_timeout_mins, 60);
        assert_eq!(cfg.storage.results_dir, PathBuf::from("data/results"));
        assert!(cfg.evaluator.enabled);
        assert_eq!(cfg.evaluator.provider, "openai");
        assert_eq!(cfg.evaluator.daily_limit, 500);
    }

    #[test]
    fn broken_toml_is_an_error() {
        assert!(AppConfig::from_toml_str("[interview\nmax = ").is_err());
    }

    #[serial_test::serial]
    #[test]
    fn missing_file_uses_defaults_and_env_overrides() {
        let tmp = tempfile::tempdir().unwrap();
        env::set_var(ENV_MAX_CLARIFICATIONS, "4");
        env::set_var(ENV_RESULTS_DIR, tmp.path().join("out").display().to_string());

        let cfg = AppConfig::load_from(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.interview.max_clarifications, 4);
        assert_eq!(cfg.storage.results_dir, tmp.path().join("out"));

        env::remove_var(ENV_MAX_CLARIFICATIONS);
        env::remove_var(ENV_RESULTS_DIR);
    }
}
