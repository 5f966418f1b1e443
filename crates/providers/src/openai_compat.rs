//! OpenAI-compatible adapter.
//!
//! Works with any endpoint following the OpenAI chat completions contract,
//! which covers every catalog entry Drover drives today. Tool-call argument
//! strings are passed through opaquely in both directions.

use serde_json::Value;

use dr_domain::config::ModelEntry;
use dr_domain::error::{Error, Result};
use dr_domain::stream::{BoxStream, StreamEvent, Usage};
use dr_domain::{Message, MessageContent, Role, ToolCall};

use crate::traits::{ChatRequest, ChatResponse, ModelClient, ReasoningLevel, ResponseFormat};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatClient {
    base_url: String,
    api_key: Option<String>,
    streaming: bool,
    http: reqwest::Client,
}

impl OpenAiCompatClient {
    /// Build a client for one catalog entry. The API key is read from the
    /// entry's env var; a missing key means an unauthenticated endpoint
    /// (local inference servers).
    pub fn from_entry(entry: &ModelEntry, request_timeout_secs: u64) -> Result<Self> {
        let api_key = entry
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok());

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(request_timeout_secs))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            base_url: entry.base_url.trim_end_matches('/').to_string(),
            api_key,
            streaming: entry.supports_streaming,
            http,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.post(url).header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        builder
    }

    fn build_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let messages = encode_messages(&req.messages, req.cache_anchors);

        let mut body = serde_json::json!({
            "model": req.model,
            "messages": messages,
            "stream": stream,
        });

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
            if let Some(choice) = &req.tool_choice {
                body["tool_choice"] = Value::String(choice.clone());
            }
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        if let Some(level) = req.reasoning_level {
            body["reasoning_effort"] = serde_json::json!(match level {
                ReasoningLevel::Low => "low",
                ReasoningLevel::Medium => "medium",
                ReasoningLevel::High => "high",
            });
        }
        if matches!(req.response_format, Some(ResponseFormat::JsonObject)) {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }
        if stream {
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        body
    }

    /// Map a non-success HTTP status to the error taxonomy. A 404 whose
    /// body mentions a sunset endpoint drives model rotation upstream.
    fn classify_failure(model: &str, status: u16, body: &str) -> Error {
        if status == 404 && body.to_ascii_lowercase().contains("sunset") {
            return Error::ModelSunset {
                model: model.to_string(),
            };
        }
        if status == 429 {
            return Error::RateLimited;
        }
        if status >= 500 {
            return Error::Http(format!("HTTP {status} - {body}"));
        }
        Error::Model {
            model: model.to_string(),
            message: format!("HTTP {status} - {body}"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message encoding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn encode_messages(messages: &[Message], cache_anchors: bool) -> Vec<Value> {
    let mut encoded: Vec<Value> = messages.iter().map(encode_message).collect();

    if cache_anchors {
        // Mark the last system and last user message; endpoints without
        // prompt caching drop the unknown field.
        for role in ["system", "user"] {
            if let Some(m) = encoded.iter_mut().rev().find(|m| m["role"] == role) {
                m["cache_control"] = serde_json::json!({"type": "ephemeral"});
            }
        }
    }

    encoded
}

fn encode_message(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => serde_json::json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.as_deref().unwrap_or(""),
            "content": msg.content.extract_all_text(),
        }),
        Role::Assistant => {
            let mut obj = serde_json::json!({"role": "assistant"});
            obj["content"] = match &msg.content {
                MessageContent::Empty => Value::Null,
                other => Value::String(other.extract_all_text()),
            };
            if !msg.tool_calls.is_empty() {
                obj["tool_calls"] = Value::Array(
                    msg.tool_calls
                        .iter()
                        .map(|tc| {
                            serde_json::json!({
                                "id": tc.id,
                                "type": "function",
                                "function": { "name": tc.name, "arguments": tc.arguments },
                            })
                        })
                        .collect(),
                );
            }
            obj
        }
        _ => {
            // User messages with image parts keep the part structure.
            match &msg.content {
                MessageContent::Parts(parts) if msg.content.image_count() > 0 => {
                    let parts: Vec<Value> = parts
                        .iter()
                        .map(|p| match p {
                            dr_domain::ContentPart::Text { text } => {
                                serde_json::json!({"type": "text", "text": text})
                            }
                            dr_domain::ContentPart::Image { url, .. } => {
                                serde_json::json!({"type": "image_url", "image_url": {"url": url}})
                            }
                        })
                        .collect();
                    serde_json::json!({"role": role_str(msg.role), "content": parts})
                }
                other => serde_json::json!({
                    "role": role_str(msg.role),
                    "content": other.extract_all_text(),
                }),
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response decoding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn decode_response(model: &str, body: &Value) -> Result<ChatResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Model {
            model: model.to_string(),
            message: "no choices in response".into(),
        })?;

    let message = choice.get("message").ok_or_else(|| Error::Model {
        model: model.to_string(),
        message: "no message in choice".into(),
    })?;

    Ok(ChatResponse {
        content: message
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        reasoning_content: message
            .get("reasoning_content")
            .and_then(|v| v.as_str())
            .map(String::from),
        tool_calls: decode_tool_calls(message),
        usage: body.get("usage").and_then(decode_usage),
        model: body
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or(model)
            .to_string(),
        finish_reason: choice
            .get("finish_reason")
            .and_then(|v| v.as_str())
            .map(String::from),
    })
}

fn decode_tool_calls(message: &Value) -> Vec<ToolCall> {
    let Some(arr) = message.get("tool_calls").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    arr.iter()
        .filter_map(|tc| {
            let func = tc.get("function")?;
            Some(ToolCall {
                id: tc.get("id")?.as_str()?.to_string(),
                name: func.get("name")?.as_str()?.to_string(),
                arguments: func
                    .get("arguments")
                    .and_then(|v| v.as_str())
                    .unwrap_or("{}")
                    .to_string(),
            })
        })
        .collect()
}

fn decode_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-call assembly state for one streamed response.
///
/// OpenAI deltas address tool calls by index; a call's arguments are
/// complete when a later index opens or the stream finishes. The assembler
/// emits `ToolCallFinished` at that moment so speculative execution can
/// start before the response ends.
#[derive(Default)]
struct ToolCallAssembler {
    // (index, id, name, args) in arrival order.
    open: Vec<(u32, String, String, String)>,
}

impl ToolCallAssembler {
    fn start(&mut self, index: u32, id: String, name: String) -> Vec<StreamEvent> {
        let mut out = self.flush_before(index);
        self.open.push((index, id.clone(), name.clone(), String::new()));
        out.push(StreamEvent::ToolCallStarted { index, id, name });
        out
    }

    fn delta(&mut self, index: u32, delta: &str) -> Vec<StreamEvent> {
        if let Some((_, _, _, args)) = self.open.iter_mut().find(|(i, ..)| *i == index) {
            args.push_str(delta);
        }
        vec![StreamEvent::ToolCallDelta {
            index,
            delta: delta.to_string(),
        }]
    }

    /// Calls at indexes before `index` can no longer grow; finish them.
    fn flush_before(&mut self, index: u32) -> Vec<StreamEvent> {
        let (done, open): (Vec<_>, Vec<_>) = std::mem::take(&mut self.open)
            .into_iter()
            .partition(|(i, ..)| *i < index);
        self.open = open;
        done
            .into_iter()
            .map(|(_, id, name, arguments)| StreamEvent::ToolCallFinished { id, name, arguments })
            .collect()
    }

    fn flush_all(&mut self) -> Vec<StreamEvent> {
        self.flush_before(u32::MAX)
    }
}

fn parse_stream_payload(
    assembler: &mut ToolCallAssembler,
    payload: &str,
) -> Vec<Result<StreamEvent>> {
    if payload.trim() == "[DONE]" {
        let mut events: Vec<Result<StreamEvent>> =
            assembler.flush_all().into_iter().map(Ok).collect();
        events.push(Ok(StreamEvent::Done {
            usage: None,
            finish_reason: Some("stop".into()),
        }));
        return events;
    }

    let v: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    let choice = v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first());

    // Usage-only chunk (stream_options.include_usage).
    let Some(choice) = choice else {
        if let Some(usage) = v.get("usage").and_then(decode_usage) {
            let mut events: Vec<Result<StreamEvent>> =
                assembler.flush_all().into_iter().map(Ok).collect();
            events.push(Ok(StreamEvent::Done {
                usage: Some(usage),
                finish_reason: None,
            }));
            return events;
        }
        return Vec::new();
    };

    if let Some(reason) = choice.get("finish_reason").and_then(|f| f.as_str()) {
        let mut events: Vec<Result<StreamEvent>> =
            assembler.flush_all().into_iter().map(Ok).collect();
        events.push(Ok(StreamEvent::Done {
            usage: v.get("usage").and_then(decode_usage),
            finish_reason: Some(reason.to_string()),
        }));
        return events;
    }

    let delta = choice.get("delta").unwrap_or(&Value::Null);
    let mut events = Vec::new();

    if let Some(calls) = delta.get("tool_calls").and_then(|v| v.as_array()) {
        for tc in calls {
            let index = tc.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as u32;

            if let Some(id) = tc.get("id").and_then(|v| v.as_str()) {
                let name = tc
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                events.extend(
                    assembler
                        .start(index, id.to_string(), name.to_string())
                        .into_iter()
                        .map(Ok),
                );
            }

            if let Some(args) = tc
                .get("function")
                .and_then(|f| f.get("arguments"))
                .and_then(|v| v.as_str())
            {
                if !args.is_empty() {
                    events.extend(assembler.delta(index, args).into_iter().map(Ok));
                }
            }
        }
        return events;
    }

    if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
        if !text.is_empty() {
            events.push(Ok(StreamEvent::Token {
                text: text.to_string(),
            }));
        }
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ModelClient for OpenAiCompatClient {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let url = self.completions_url();
        let body = self.build_body(req, false);

        tracing::debug!(model = %req.model, url = %url, "chat request");

        let resp = self
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(Self::classify_failure(&req.model, status.as_u16(), &text));
        }

        let json: Value = serde_json::from_str(&text)?;
        decode_response(&req.model, &json)
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = self.completions_url();
        let body = self.build_body(req, true);

        tracing::debug!(model = %req.model, url = %url, "stream request");

        let resp = self
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
            return Err(Self::classify_failure(&req.model, status.as_u16(), &text));
        }

        let mut assembler = ToolCallAssembler::default();
        Ok(crate::sse::event_stream(resp, move |payload| {
            parse_stream_payload(&mut assembler, payload)
        }))
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }
}
