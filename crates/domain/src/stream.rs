use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for model streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events emitted during model streaming (provider-agnostic).
///
/// The speculative executor listens for `ToolCallFinished` to start safe
/// tools before the model has finished the whole response.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    /// A text token chunk.
    #[serde(rename = "token")]
    Token { text: String },

    /// A tool call has started streaming (name known, arguments pending).
    #[serde(rename = "tool_call_started")]
    ToolCallStarted { index: u32, id: String, name: String },

    /// Incremental tool-call argument data, addressed by stream index.
    #[serde(rename = "tool_call_delta")]
    ToolCallDelta { index: u32, delta: String },

    /// A tool call is complete with its full argument string.
    #[serde(rename = "tool_call_finished")]
    ToolCallFinished {
        id: String,
        name: String,
        arguments: String,
    },

    /// Stream is finished.
    #[serde(rename = "done")]
    Done {
        usage: Option<Usage>,
        finish_reason: Option<String>,
    },

    /// An error occurred during streaming.
    #[serde(rename = "error")]
    Error { message: String },
}

/// Token usage for one model call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}
