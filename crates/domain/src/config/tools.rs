use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// The closed set of tools that are read-only and idempotent. Any tool
    /// not listed here is treated as mutating: never speculated, never
    /// cached, never dispatched in parallel.
    #[serde(default = "d_safe_tools")]
    pub safe: Vec<String>,
    /// Maximum speculative executions in flight during one model stream.
    #[serde(default = "d_5")]
    pub speculative_max_concurrent: usize,
    /// Timeout for a speculative tool execution.
    #[serde(default = "d_30")]
    pub speculative_timeout_secs: u64,
    /// Timeout for a regular (dispatcher-initiated) tool execution.
    #[serde(default = "d_180")]
    pub execution_timeout_secs: u64,
    /// Fraction of the model context window reserved for tool results in
    /// one batch; drives per-result truncation.
    #[serde(default = "d_result_fraction")]
    pub result_context_fraction: f64,
    /// Absolute per-result character ceiling.
    #[serde(default = "d_8000")]
    pub result_char_ceiling: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            safe: d_safe_tools(),
            speculative_max_concurrent: d_5(),
            speculative_timeout_secs: d_30(),
            execution_timeout_secs: d_180(),
            result_context_fraction: d_result_fraction(),
            result_char_ceiling: d_8000(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_safe_tools() -> Vec<String> {
    [
        "fetch_url",
        "web_search",
        "get_weather",
        "get_crypto",
        "get_currency",
        "get_news",
        "geolocate",
        "github_read_file",
        "github_list_dir",
        "lookup_metadata",
        "render_chart",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn d_5() -> usize {
    5
}
fn d_30() -> u64 {
    30
}
fn d_180() -> u64 {
    180
}
fn d_result_fraction() -> f64 {
    0.20
}
fn d_8000() -> usize {
    8_000
}
