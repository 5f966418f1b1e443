use serde::{Deserialize, Serialize};

/// A tool invocation emitted by the model.
///
/// `arguments` is kept as the opaque JSON-encoded string the model produced;
/// it is only parsed at the dispatch boundary so malformed arguments become
/// a tool error instead of a dropped call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCall {
    /// Opaque id, unique within the conversation. Preserved verbatim in the
    /// paired tool result's `tool_call_id`.
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Tool definition exposed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

/// A message in the conversation (provider-agnostic).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    /// Missing content on the wire is the same as `null`.
    #[serde(default)]
    pub content: MessageContent,
    /// Tool calls carried by an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Links a tool-role message back to the assistant call that spawned it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Hidden reasoning payload. Never sent back to the model; only counted
    /// by the token accountant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Message content: plain text, an ordered part sequence, or nothing at all
/// (assistant messages that only invoke tools serialize content as `null`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
    #[default]
    Empty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
}

// ── Convenience constructors ───────────────────────────────────────

impl Message {
    fn bare(role: Role, content: MessageContent) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            reasoning_content: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::bare(Role::System, MessageContent::Text(text.into()))
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::bare(Role::User, MessageContent::Text(text.into()))
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::bare(Role::Assistant, MessageContent::Text(text.into()))
    }

    /// Assistant message carrying tool calls. `text` may be empty; content
    /// is then serialized as `null` per the wire contract.
    pub fn assistant_with_tools(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let text = text.into();
        let content = if text.is_empty() {
            MessageContent::Empty
        } else {
            MessageContent::Text(text)
        };
        Self {
            tool_calls,
            ..Self::bare(Role::Assistant, content)
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::bare(Role::Tool, MessageContent::Text(content.into()))
        }
    }

    /// True for assistant messages that invoke at least one tool.
    pub fn has_tool_calls(&self) -> bool {
        self.role == Role::Assistant && !self.tool_calls.is_empty()
    }

    /// True when there is no visible content and no tool calls.
    pub fn is_empty(&self) -> bool {
        self.content.extract_all_text().trim().is_empty() && self.tool_calls.is_empty()
    }
}

impl MessageContent {
    /// Extract the plain-text content (first text part, or the full text).
    pub fn text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(t) => Some(t.as_str()),
            MessageContent::Parts(parts) => parts.iter().find_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            }),
            MessageContent::Empty => None,
        }
    }

    /// Extract and join all text content, returning an owned String.
    /// Image parts are skipped; `Empty` yields an empty string.
    pub fn extract_all_text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
            MessageContent::Empty => String::new(),
        }
    }

    /// Number of image parts (each carries a flat token charge).
    pub fn image_count(&self) -> usize {
        match self {
            MessageContent::Parts(parts) => parts
                .iter()
                .filter(|p| matches!(p, ContentPart::Image { .. }))
                .count(),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_content_serializes_as_null() {
        let m = Message::assistant_with_tools(
            "",
            vec![ToolCall {
                id: "c1".into(),
                name: "get_weather".into(),
                arguments: "{}".into(),
            }],
        );
        let json = serde_json::to_value(&m).unwrap();
        assert!(json["content"].is_null());
        assert_eq!(json["tool_calls"][0]["name"], "get_weather");
    }

    #[test]
    fn null_content_deserializes_to_empty() {
        let json = r#"{"role":"assistant","content":null}"#;
        let m: Message = serde_json::from_str(json).unwrap();
        assert!(matches!(m.content, MessageContent::Empty));
    }

    #[test]
    fn tool_result_links_call_id() {
        let m = Message::tool_result("call_9", "sunny, 21C");
        assert_eq!(m.role, Role::Tool);
        assert_eq!(m.tool_call_id.as_deref(), Some("call_9"));
        assert_eq!(m.content.text(), Some("sunny, 21C"));
    }

    #[test]
    fn extract_all_text_skips_images() {
        let content = MessageContent::Parts(vec![
            ContentPart::Text { text: "before".into() },
            ContentPart::Image {
                url: "https://example.com/a.png".into(),
                media_type: None,
            },
            ContentPart::Text { text: "after".into() },
        ]);
        assert_eq!(content.extract_all_text(), "before\nafter");
        assert_eq!(content.image_count(), 1);
    }

    #[test]
    fn is_empty_ignores_whitespace() {
        let m = Message::assistant("  \n ");
        assert!(m.is_empty());
        let m = Message::assistant_with_tools(
            "",
            vec![ToolCall {
                id: "c".into(),
                name: "t".into(),
                arguments: "{}".into(),
            }],
        );
        assert!(!m.is_empty());
    }
}
