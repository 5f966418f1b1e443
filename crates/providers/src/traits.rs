use serde::{Deserialize, Serialize};

use dr_domain::error::Result;
use dr_domain::stream::{BoxStream, StreamEvent, Usage};
use dr_domain::{Message, ToolCall, ToolSchema};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Wire model name for the endpoint.
    pub model: String,
    /// The conversation messages to send.
    pub messages: Vec<Message>,
    /// Tool schemas the model may invoke. Empty during the review phase.
    pub tools: Vec<ToolSchema>,
    /// Tool-choice directive ("auto", "none", or a tool name).
    pub tool_choice: Option<String>,
    /// Sampling temperature. `None` lets the endpoint choose.
    pub temperature: Option<f32>,
    /// Maximum tokens in the response. `None` lets the endpoint choose.
    pub max_tokens: Option<u32>,
    /// Reasoning effort hint for endpoints that support it.
    pub reasoning_level: Option<ReasoningLevel>,
    /// Response format constraint.
    pub response_format: Option<ResponseFormat>,
    /// When set, mark the last system and last user message as cache
    /// anchors. Endpoints that don't support prompt caching ignore it.
    pub cache_anchors: bool,
}

/// A provider-agnostic chat completion response.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    /// Textual content of the response.
    pub content: String,
    /// Hidden reasoning payload, when the endpoint exposes one.
    pub reasoning_content: Option<String>,
    /// Tool calls emitted by the model.
    pub tool_calls: Vec<ToolCall>,
    /// Token usage information.
    pub usage: Option<Usage>,
    /// The model that actually produced the response.
    pub model: String,
    /// Why the model stopped (e.g. "stop", "tool_calls").
    pub finish_reason: Option<String>,
}

impl ChatResponse {
    /// True when the model produced neither text nor tool calls — the
    /// trigger for empty-response recovery.
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.tool_calls.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    Text,
    JsonObject,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core client trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every model adapter implements.
///
/// Both call paths must be supported: the processor prefers streaming (so
/// the speculative executor can start safe tools early) and falls back to
/// [`ModelClient::chat`] when the endpoint can't stream.
#[async_trait::async_trait]
pub trait ModelClient: Send + Sync {
    /// Send a chat completion request and wait for the full response.
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse>;

    /// Send a chat completion request and return a stream of events.
    ///
    /// The stream always terminates with a `Done` event, and every tool
    /// call is surfaced as a `ToolCallFinished` once its arguments are
    /// fully received.
    async fn chat_stream(&self, req: &ChatRequest)
        -> Result<BoxStream<'static, Result<StreamEvent>>>;

    fn supports_streaming(&self) -> bool {
        true
    }
}

/// Collect a finished stream back into a [`ChatResponse`].
///
/// Used by the processor after draining: the stream is the source of truth
/// during the call, the response is what goes into history.
pub fn response_from_stream_parts(
    text: String,
    tool_calls: Vec<ToolCall>,
    usage: Option<Usage>,
    model: &str,
    finish_reason: Option<String>,
) -> ChatResponse {
    ChatResponse {
        content: text,
        reasoning_content: None,
        tool_calls,
        usage,
        model: model.to_string(),
        finish_reason,
    }
}
