//! Scriptable model client for tests.
//!
//! Turns are consumed in order; each `chat`/`chat_stream` call pops one.
//! Streamed turns are replayed as token + tool-call-finished events so the
//! speculative path sees the same shape a live endpoint produces.

use std::collections::VecDeque;

use parking_lot::Mutex;

use dr_domain::error::{Error, Result};
use dr_domain::stream::{BoxStream, StreamEvent, Usage};
use dr_domain::ToolCall;

use crate::traits::{ChatRequest, ChatResponse, ModelClient};

enum MockTurn {
    Respond(ChatResponse),
    Fail(Error),
}

#[derive(Default)]
pub struct MockModelClient {
    turns: Mutex<VecDeque<MockTurn>>,
    /// Every request this client has seen, for assertions.
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl MockModelClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue_text(&self, text: impl Into<String>) {
        self.enqueue_response(ChatResponse {
            content: text.into(),
            usage: Some(Usage {
                prompt_tokens: 40,
                completion_tokens: 12,
                total_tokens: 52,
            }),
            model: "mock".into(),
            finish_reason: Some("stop".into()),
            ..Default::default()
        });
    }

    pub fn enqueue_tool_calls(&self, text: impl Into<String>, calls: Vec<ToolCall>) {
        self.enqueue_response(ChatResponse {
            content: text.into(),
            tool_calls: calls,
            usage: Some(Usage {
                prompt_tokens: 40,
                completion_tokens: 20,
                total_tokens: 60,
            }),
            model: "mock".into(),
            finish_reason: Some("tool_calls".into()),
            ..Default::default()
        });
    }

    /// An empty response: no content, no tool calls.
    pub fn enqueue_empty(&self) {
        self.enqueue_response(ChatResponse {
            model: "mock".into(),
            finish_reason: Some("stop".into()),
            ..Default::default()
        });
    }

    pub fn enqueue_response(&self, response: ChatResponse) {
        self.turns.lock().push_back(MockTurn::Respond(response));
    }

    pub fn enqueue_error(&self, error: Error) {
        self.turns.lock().push_back(MockTurn::Fail(error));
    }

    pub fn remaining(&self) -> usize {
        self.turns.lock().len()
    }

    fn pop(&self, req: &ChatRequest) -> Result<ChatResponse> {
        self.requests.lock().push(req.clone());
        match self.turns.lock().pop_front() {
            Some(MockTurn::Respond(r)) => Ok(r),
            Some(MockTurn::Fail(e)) => Err(e),
            None => Err(Error::Other("mock model script exhausted".into())),
        }
    }
}

#[async_trait::async_trait]
impl ModelClient for MockModelClient {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        self.pop(req)
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let response = self.pop(req)?;

        let mut events: Vec<Result<StreamEvent>> = Vec::new();
        if !response.content.is_empty() {
            events.push(Ok(StreamEvent::Token {
                text: response.content.clone(),
            }));
        }
        for (i, call) in response.tool_calls.iter().enumerate() {
            events.push(Ok(StreamEvent::ToolCallStarted {
                index: i as u32,
                id: call.id.clone(),
                name: call.name.clone(),
            }));
            events.push(Ok(StreamEvent::ToolCallFinished {
                id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            }));
        }
        events.push(Ok(StreamEvent::Done {
            usage: response.usage.clone(),
            finish_reason: response.finish_reason.clone(),
        }));

        Ok(Box::pin(futures_util::stream::iter(events)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn turns_consumed_in_order() {
        let mock = MockModelClient::new();
        mock.enqueue_text("first");
        mock.enqueue_text("second");

        let req = ChatRequest::default();
        assert_eq!(mock.chat(&req).await.unwrap().content, "first");
        assert_eq!(mock.chat(&req).await.unwrap().content, "second");
        assert!(mock.chat(&req).await.is_err());
    }

    #[tokio::test]
    async fn stream_replays_tool_calls() {
        let mock = MockModelClient::new();
        mock.enqueue_tool_calls(
            "",
            vec![ToolCall {
                id: "c1".into(),
                name: "get_weather".into(),
                arguments: "{}".into(),
            }],
        );

        let mut stream = mock.chat_stream(&ChatRequest::default()).await.unwrap();
        let mut finished = 0;
        let mut done = 0;
        while let Some(ev) = stream.next().await {
            match ev.unwrap() {
                StreamEvent::ToolCallFinished { .. } => finished += 1,
                StreamEvent::Done { .. } => done += 1,
                _ => {}
            }
        }
        assert_eq!((finished, done), (1, 1));
    }
}
