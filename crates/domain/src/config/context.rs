use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context compressor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The compressor reduces an oversize history to fit the model's context
/// window while keeping tool-call pairs and the recent tail intact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressorConfig {
    /// Fraction of the model context window given to the conversation.
    #[serde(default = "d_budget_fraction")]
    pub budget_fraction: f64,
    /// Minimum contiguous tail of recent messages that is never evicted.
    #[serde(default = "d_6")]
    pub min_tail: usize,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            budget_fraction: d_budget_fraction(),
            min_tail: d_6(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Structured planner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Extensions treated as code/config when extracting file paths.
    #[serde(default = "d_code_exts")]
    pub code_extensions: Vec<String>,
    /// Extensions excluded as media/binary artifacts.
    #[serde(default = "d_media_exts")]
    pub media_extensions: Vec<String>,
    /// Per-file character cap before a truncation marker is appended.
    #[serde(default = "d_8000")]
    pub per_file_char_cap: usize,
    /// Total character budget for the injected file block.
    #[serde(default = "d_50000")]
    pub total_injection_cap: usize,
    /// Control-character ratio (over the first 512 bytes) above which a
    /// pre-fetched file is classified binary and skipped.
    #[serde(default = "d_binary_ratio")]
    pub binary_control_ratio: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            code_extensions: d_code_exts(),
            media_extensions: d_media_exts(),
            per_file_char_cap: d_8000(),
            total_injection_cap: d_50000(),
            binary_control_ratio: d_binary_ratio(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_budget_fraction() -> f64 {
    0.75
}
fn d_6() -> usize {
    6
}
fn d_8000() -> usize {
    8_000
}
fn d_50000() -> usize {
    50_000
}
fn d_binary_ratio() -> f64 {
    0.10
}

fn d_code_exts() -> Vec<String> {
    [
        "ts", "tsx", "js", "jsx", "py", "rs", "go", "java", "rb", "php", "md", "json", "yaml",
        "yml", "toml", "sql", "sh", "html", "css", "c", "h", "cpp", "hpp", "cs", "swift", "kt",
        "scala", "vue", "svelte", "txt", "cfg", "ini", "env", "xml", "proto",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn d_media_exts() -> Vec<String> {
    [
        "png", "jpg", "jpeg", "gif", "svg", "ico", "pdf", "zip", "tar", "gz", "woff", "woff2",
        "ttf", "eot", "mp3", "mp4", "webm", "webp", "avif",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
