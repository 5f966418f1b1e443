use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dr_domain::{Message, Role, StructuredPlan};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status / phase
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPhase {
    Plan,
    Work,
    Review,
}

impl TaskPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Work => "work",
            Self::Review => "review",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The whole durable state of one task. Serialized as a single JSON object
/// on every checkpoint write; unknown fields survive a round trip so newer
/// checkpoints load on older builds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    pub task_id: String,
    pub user_id: String,
    pub chat_id: String,
    /// Current model selection; changes mid-task on rotation.
    pub model_alias: String,
    /// Full history visible to the model.
    pub messages: Vec<Message>,
    pub status: TaskStatus,
    pub phase: TaskPhase,
    #[serde(default)]
    pub iterations: u32,
    #[serde(default)]
    pub work_phase_start_iteration: u32,
    /// Tool names in invocation order, repeats included.
    #[serde(default)]
    pub tools_used: Vec<String>,
    /// `toolName:normalized-arguments` fingerprints.
    #[serde(default)]
    pub tool_signatures: BTreeSet<String>,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    /// Front-end handle for the live status message.
    #[serde(default)]
    pub status_message_id: Option<i64>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub structured_plan: Option<StructuredPlan>,
    /// User instructions to inject before the next iteration.
    #[serde(default)]
    pub steering_queue: Vec<String>,
    #[serde(default)]
    pub auto_resume: bool,
    #[serde(default)]
    pub resume_count: u32,
    /// Aliases already tried for this task (rotation never revisits one).
    #[serde(default)]
    pub models_tried: BTreeSet<String>,
    /// Fields written by newer builds, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TaskState {
    pub fn new(
        task_id: impl Into<String>,
        user_id: impl Into<String>,
        chat_id: impl Into<String>,
        model_alias: impl Into<String>,
        messages: Vec<Message>,
    ) -> Self {
        let now = Utc::now();
        let model_alias = model_alias.into();
        let mut models_tried = BTreeSet::new();
        models_tried.insert(model_alias.clone());
        Self {
            task_id: task_id.into(),
            user_id: user_id.into(),
            chat_id: chat_id.into(),
            model_alias,
            messages,
            status: TaskStatus::Processing,
            phase: TaskPhase::Plan,
            iterations: 0,
            work_phase_start_iteration: 0,
            tools_used: Vec::new(),
            tool_signatures: BTreeSet::new(),
            start_time: now,
            last_update: now,
            status_message_id: None,
            result: None,
            error: None,
            structured_plan: None,
            steering_queue: Vec::new(),
            auto_resume: false,
            resume_count: 0,
            models_tried,
            extra: serde_json::Map::new(),
        }
    }

    /// Record one tool invocation for dedup tracking and the progress UI.
    pub fn record_tool(&mut self, name: &str, signature: String) {
        self.tools_used.push(name.to_string());
        self.tool_signatures.insert(signature);
    }

    /// The original user request, for checkpoint listings.
    pub fn task_prompt(&self) -> Option<String> {
        self.messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| {
                let text = m.content.extract_all_text();
                let clipped: String = text.chars().take(80).collect();
                clipped
            })
    }

    pub fn touch(&mut self) {
        self.last_update = Utc::now();
    }
}

/// One row of a checkpoint listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub slot: String,
    pub saved_at: DateTime<Utc>,
    pub iterations: u32,
    pub tools_used: usize,
    pub completed: bool,
    pub task_prompt: Option<String>,
    pub model_alias: String,
}
