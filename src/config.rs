//! Project-level configuration (ambient stack; grounded in the teacher's
//! `config::load`, generalized to the orchestrator's own defaults).

use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

const CONFIG_PATH: &str = ".raymond/config.toml";

/// Project-level configuration from `.raymond/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Filename (relative to the scope directory) of the first state run
    /// when a workflow starts.
    #[serde(default = "default_entry_state")]
    pub entry_state: String,

    /// Total USD budget for a workflow run before the scheduler forces
    /// termination.
    #[serde(default = "default_budget")]
    pub budget: f64,

    /// Model passed to the agent binary when a state doesn't override it.
    #[serde(default = "default_model")]
    pub model: String,

    /// Effort level passed to the agent binary when a state doesn't
    /// override it.
    #[serde(default = "default_effort")]
    pub effort: String,

    /// Idle timeout (seconds) between stream-json chunks before a step is
    /// treated as stalled.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Wall-clock timeout (seconds) for a single script-state invocation.
    #[serde(default = "default_script_timeout_secs")]
    pub script_timeout_secs: u64,
}

fn default_entry_state() -> String {
    "main.md".to_string()
}

fn default_budget() -> f64 {
    5.0
}

fn default_model() -> String {
    "sonnet".to_string()
}

fn default_effort() -> String {
    "medium".to_string()
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_script_timeout_secs() -> u64 {
    300
}

impl Default for Config {
    fn default() -> Self {
        Self {
            entry_state: default_entry_state(),
            budget: default_budget(),
            model: default_model(),
            effort: default_effort(),
            idle_timeout_secs: default_idle_timeout_secs(),
            script_timeout_secs: default_script_timeout_secs(),
        }
    }
}

/// Load configuration from `.raymond/config.toml` under `scope_dir`.
///
/// Falls back to defaults if the file is missing.
pub fn load(scope_dir: &Path) -> Result<Config> {
    let path = scope_dir.join(CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = std::fs::read_to_string(&path)?;
    let config: Config = toml::from_str(&contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load(dir.path()).unwrap();
        assert_eq!(config.entry_state, "main.md");
        assert_eq!(config.budget, 5.0);
    }

    #[test]
    fn loads_overrides_from_toml() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".raymond")).unwrap();
        std::fs::write(
            dir.path().join(".raymond/config.toml"),
            "entry_state = \"start.md\"\nbudget = 12.5\n",
        )
        .unwrap();
        let config = load(dir.path()).unwrap();
        assert_eq!(config.entry_state, "start.md");
        assert_eq!(config.budget, 12.5);
        assert_eq!(config.model, "sonnet");
    }
}
