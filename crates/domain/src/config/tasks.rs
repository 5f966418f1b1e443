use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task processor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    /// Hard cap on processor iterations per task.
    #[serde(default = "d_100")]
    pub max_iterations: u32,
    /// Retries inside empty-response recovery before rotation/fallback.
    #[serde(default = "d_2")]
    pub empty_response_retries: u32,
    /// Retries on a sunset (404) endpoint before rotating away from it.
    #[serde(default = "d_3")]
    pub sunset_retries: u32,
    /// Auto-resume cap for paid models.
    #[serde(default = "d_10")]
    pub resume_cap_paid: u32,
    /// Auto-resume cap for free models.
    #[serde(default = "d_15")]
    pub resume_cap_free: u32,
    /// Minimum interval between progress edits on the front-end.
    #[serde(default = "d_15s")]
    pub progress_throttle_secs: u64,
    /// Whole-call timeout for one model invocation.
    #[serde(default = "d_180")]
    pub model_call_timeout_secs: u64,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            max_iterations: d_100(),
            empty_response_retries: d_2(),
            sunset_retries: d_3(),
            resume_cap_paid: d_10(),
            resume_cap_free: d_15(),
            progress_throttle_secs: d_15s(),
            model_call_timeout_secs: d_180(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_100() -> u32 {
    100
}
fn d_2() -> u32 {
    2
}
fn d_3() -> u32 {
    3
}
fn d_10() -> u32 {
    10
}
fn d_15() -> u32 {
    15
}
fn d_15s() -> u64 {
    15
}
fn d_180() -> u64 {
    180
}
