mod context;
mod models;
mod tasks;
mod tools;

pub use context::*;
pub use models::*;
pub use tasks::*;
pub use tools::*;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub compressor: CompressorConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub tasks: TasksConfig,
    #[serde(default)]
    pub checkpoints: CheckpointsConfig,
    #[serde(default)]
    pub emitter: EmitterConfig,
}

impl Config {
    /// Startup validation: every `free_rotation` alias must exist in the
    /// catalog, and every catalog entry needs a usable context window.
    pub fn validate(&self) -> Result<(), crate::Error> {
        for alias in &self.models.free_rotation {
            if !self.models.catalog.iter().any(|m| &m.alias == alias) {
                return Err(crate::Error::Config(format!(
                    "free_rotation references unknown model alias '{alias}'"
                )));
            }
        }
        for entry in &self.models.catalog {
            if entry.max_context == 0 {
                return Err(crate::Error::Config(format!(
                    "model '{}' has max_context = 0",
                    entry.alias
                )));
            }
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Checkpoints
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointsConfig {
    /// Root directory for persisted task state.
    #[serde(default = "d_state_dir")]
    pub state_dir: String,
}

impl Default for CheckpointsConfig {
    fn default() -> Self {
        Self {
            state_dir: d_state_dir(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Progress emitter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EmitterConfig {
    /// Base URL of the front-end message webhook. When unset, progress is
    /// logged instead of sent.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_port() -> u16 {
    8520
}
fn d_state_dir() -> String {
    "./data/state".into()
}

#[cfg(test)]
mod config_tests {
    use super::*;

    #[test]
    fn defaults_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8520);
        assert_eq!(config.tasks.max_iterations, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_unknown_rotation_alias() {
        let config: Config = toml::from_str(
            r#"
            [models]
            free_rotation = ["ghost"]
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_context() {
        let config: Config = toml::from_str(
            r#"
            [[models.catalog]]
            alias = "tiny"
            model = "tiny-1"
            base_url = "https://api.example.com/v1"
            max_context = 0
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }
}
