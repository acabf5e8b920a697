// src/config/evaluator.rs
use serde::{Deserialize, Serialize};
use std::{env, path::PathBuf};

fn default_provider() -> String {
    "openai".to_string()
}
fn default_daily_limit() -> u32 {
    500
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_state_dir() -> PathBuf {
    PathBuf::from("data/evaluator")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Only "openai" is supported (case-insensitive).
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// "ENV" means: read from OPENAI_API_KEY.
    #[serde(default)]
    pub api_key: String,
    /// Real provider calls allowed per UTC day.
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Where the daily counter is persisted.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_provider(),
            model: None,
            api_key: String::new(),
            daily_limit: default_daily_limit(),
            timeout_secs: default_timeout_secs(),
            state_dir: default_state_dir(),
        }
    }
}

impl EvaluatorConfig {
    /// Normalize the provider name and resolve an "ENV" api key.
    ///
    /// A disabled evaluator never needs a key, so the env lookup only runs
    /// when `enabled` is set.
    pub fn resolve(mut self) -> anyhow::Result<Self> {
        self.provider = self.provider.trim().to_lowercase();

        if self.enabled && self.api_key.trim().eq_ignore_ascii_case("env") {
            self.api_key = match self.provider.as_str() {
                "openai" => env::var("OPENAI_API_KEY")
                    .map_err(|_| anyhow::anyhow!("Missing OPENAI_API_KEY env var"))?,
                other => anyhow::bail!("Unsupported provider in config: {other}"),
            };
        }

        if self.timeout_secs == 0 {
            self.timeout_secs = default_timeout_secs();
        }

        Ok(self)
    }
}
