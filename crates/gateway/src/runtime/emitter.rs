//! Progress emitter gateway.
//!
//! The front-end owns rendering; the processor only needs send/edit/delete
//! and a long-message splitter. Every operation is best-effort: a lost
//! edit must never abort a task.

use std::time::Duration;

use serde_json::Value;

/// Telegram-style message size ceiling, kept a little under the wire
/// limit so markup never pushes a chunk over.
const CHUNK_CHARS: usize = 4_000;
/// Pacing between chunks of one long message.
const CHUNK_PACING: Duration = Duration::from_millis(100);

#[async_trait::async_trait]
pub trait ProgressEmitter: Send + Sync {
    /// Send a message; returns the front-end message id when known.
    async fn send_message(&self, chat_id: &str, text: &str, parse_mode: Option<&str>)
        -> Option<i64>;

    async fn edit_message(&self, chat_id: &str, message_id: i64, text: &str);

    async fn delete_message(&self, chat_id: &str, message_id: i64);

    /// Split an oversize text on newline/space boundaries and send the
    /// chunks with light pacing.
    async fn send_long_message(&self, chat_id: &str, text: &str) {
        let chunks = chunk_text(text, CHUNK_CHARS);
        let count = chunks.len();
        for (i, chunk) in chunks.iter().enumerate() {
            self.send_message(chat_id, chunk, None).await;
            if i + 1 < count {
                tokio::time::sleep(CHUNK_PACING).await;
            }
        }
    }
}

/// Split on the last newline (preferred) or space before the cap; hard cut
/// only when a single token exceeds the whole chunk size.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut rest = text;

    while rest.len() > max_chars {
        let window = floor_boundary(rest, max_chars);
        let cut = rest[..window]
            .rfind('\n')
            .or_else(|| rest[..window].rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(window);
        chunks.push(rest[..cut].trim_end().to_string());
        rest = rest[cut..].trim_start();
    }
    if !rest.is_empty() || chunks.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

fn floor_boundary(s: &str, mut index: usize) -> usize {
    index = index.min(s.len());
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP emitter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Posts to a Telegram-shaped front-end webhook.
pub struct HttpEmitter {
    base_url: String,
    http: reqwest::Client,
}

impl HttpEmitter {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    async fn post(&self, endpoint: &str, body: Value) -> Option<Value> {
        let url = format!("{}/{endpoint}", self.base_url);
        match self.http.post(&url).json(&body).send().await {
            Ok(resp) => resp.json().await.ok(),
            Err(e) => {
                tracing::warn!(endpoint, error = %e, "emitter call failed");
                None
            }
        }
    }
}

#[async_trait::async_trait]
impl ProgressEmitter for HttpEmitter {
    async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        parse_mode: Option<&str>,
    ) -> Option<i64> {
        let mut body = serde_json::json!({ "chat_id": chat_id, "text": text });
        if let Some(mode) = parse_mode {
            body["parse_mode"] = Value::String(mode.to_string());
        }
        self.post("sendMessage", body)
            .await
            .and_then(|v| v.pointer("/result/message_id").and_then(Value::as_i64))
    }

    async fn edit_message(&self, chat_id: &str, message_id: i64, text: &str) {
        self.post(
            "editMessageText",
            serde_json::json!({ "chat_id": chat_id, "message_id": message_id, "text": text }),
        )
        .await;
    }

    async fn delete_message(&self, chat_id: &str, message_id: i64) {
        self.post(
            "deleteMessage",
            serde_json::json!({ "chat_id": chat_id, "message_id": message_id }),
        )
        .await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Null / recording emitters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Logs instead of sending; used when no webhook is configured.
pub struct NullEmitter;

#[async_trait::async_trait]
impl ProgressEmitter for NullEmitter {
    async fn send_message(&self, chat_id: &str, text: &str, _: Option<&str>) -> Option<i64> {
        tracing::info!(chat_id, text, "progress (no emitter configured)");
        None
    }

    async fn edit_message(&self, _: &str, _: i64, _: &str) {}

    async fn delete_message(&self, _: &str, _: i64) {}
}

/// Captures everything for test assertions.
#[derive(Default)]
pub struct RecordingEmitter {
    pub events: parking_lot::Mutex<Vec<EmitterEvent>>,
    next_id: std::sync::atomic::AtomicI64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmitterEvent {
    Sent { chat_id: String, text: String },
    Edited { message_id: i64, text: String },
    Deleted { message_id: i64 },
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                EmitterEvent::Sent { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl ProgressEmitter for RecordingEmitter {
    async fn send_message(&self, chat_id: &str, text: &str, _: Option<&str>) -> Option<i64> {
        self.events.lock().push(EmitterEvent::Sent {
            chat_id: chat_id.to_string(),
            text: text.to_string(),
        });
        Some(
            self.next_id
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
                + 1,
        )
    }

    async fn edit_message(&self, _: &str, message_id: i64, text: &str) {
        self.events.lock().push(EmitterEvent::Edited {
            message_id,
            text: text.to_string(),
        });
    }

    async fn delete_message(&self, _: &str, message_id: i64) {
        self.events.lock().push(EmitterEvent::Deleted { message_id });
    }
}
