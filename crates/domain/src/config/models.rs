use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model catalog
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Registered models (data-driven: adding a model = adding config).
    #[serde(default)]
    pub catalog: Vec<ModelEntry>,
    /// Ordered aliases the processor rotates through when a free model
    /// fails or is sunset. All entries must be free, tool-capable models.
    #[serde(default)]
    pub free_rotation: Vec<String>,
    /// Whole-call timeout for one model request.
    #[serde(default = "d_180")]
    pub request_timeout_secs: u64,
    /// Bounded retries for transient failures before the recovery path.
    #[serde(default = "d_3")]
    pub max_retries: u32,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            catalog: Vec::new(),
            free_rotation: Vec::new(),
            request_timeout_secs: d_180(),
            max_retries: d_3(),
        }
    }
}

/// One model the orchestrator may drive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Stable alias used by task requests (e.g. "sonnet", "qwen-free").
    pub alias: String,
    /// Wire model name sent to the endpoint.
    pub model: String,
    /// OpenAI-compatible endpoint base URL.
    pub base_url: String,
    /// Context window in tokens.
    #[serde(default = "d_ctx")]
    pub max_context: usize,
    /// Free-tier models participate in rotation and get the higher
    /// auto-resume cap.
    #[serde(default)]
    pub free: bool,
    /// Whether the endpoint accepts parallel tool calls in one response.
    #[serde(default = "d_true")]
    pub supports_parallel_tools: bool,
    /// Whether the endpoint supports SSE streaming.
    #[serde(default = "d_true")]
    pub supports_streaming: bool,
    /// Env var holding the API key for this endpoint.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_180() -> u64 {
    180
}
fn d_3() -> u32 {
    3
}
fn d_ctx() -> usize {
    131_072
}
fn d_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_defaults() {
        let toml = r#"
            alias = "sonnet"
            model = "claude-sonnet"
            base_url = "https://api.example.com/v1"
        "#;
        let entry: ModelEntry = toml::from_str(toml).unwrap();
        assert_eq!(entry.max_context, 131_072);
        assert!(entry.supports_parallel_tools);
        assert!(!entry.free);
    }
}
