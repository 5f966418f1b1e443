use serde::Serialize;

/// Structured trace events emitted across all Drover crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    ModelRequest {
        model: String,
        streaming: bool,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    ModelRotation {
        from_model: String,
        to_model: String,
        reason: String,
    },
    CompressionApplied {
        before_messages: usize,
        after_messages: usize,
        before_tokens: usize,
        budget: usize,
        summarized: bool,
    },
    SpeculativeStarted {
        tool_name: String,
        call_id: String,
    },
    ToolCacheHit {
        tool_name: String,
    },
    ToolDispatched {
        tool_name: String,
        parallel: bool,
        duration_ms: u64,
        is_error: bool,
    },
    PlanParsed {
        steps: usize,
        files: usize,
        fallback: bool,
    },
    FilesInjected {
        loaded: usize,
        skipped: usize,
        total_chars: usize,
    },
    CheckpointSaved {
        user_id: String,
        slot: String,
        iterations: u32,
    },
    TaskFinished {
        task_id: String,
        status: String,
        iterations: u32,
        tools_used: usize,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "dr_event");
    }
}
