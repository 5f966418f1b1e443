//! Shared SSE plumbing for model adapters.
//!
//! The wire pattern is the same for every OpenAI-shaped endpoint: the
//! response body is a byte stream of `data:`-prefixed event blocks
//! separated by blank lines. [`SseBuffer`] assembles complete payloads out
//! of arbitrary chunk boundaries; [`event_stream`] turns a
//! `reqwest::Response` plus a payload parser into a [`BoxStream`] of
//! [`StreamEvent`]s that is guaranteed to end with `Done`.

use futures_util::StreamExt;

use dr_domain::error::{Error, Result};
use dr_domain::stream::{BoxStream, StreamEvent};

/// Incremental SSE event-block assembler.
///
/// Feed raw chunks in; pull complete `data:` payloads out. Partial blocks
/// stay buffered until their terminating blank line arrives.
#[derive(Default)]
pub struct SseBuffer {
    pending: String,
}

impl SseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every completed `data:` payload.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.pending.push_str(chunk);
        let mut payloads = Vec::new();

        // Event blocks end at a blank line; tolerate CRLF framing.
        loop {
            let (end, skip) = match (self.pending.find("\n\n"), self.pending.find("\r\n\r\n")) {
                (Some(a), Some(b)) if b < a => (b, 4),
                (Some(a), _) => (a, 2),
                (None, Some(b)) => (b, 4),
                (None, None) => break,
            };
            let block: String = self.pending.drain(..end + skip).collect();
            Self::collect_data_lines(&block, &mut payloads);
        }

        payloads
    }

    /// Flush whatever is left as a final block (stream closed mid-event).
    pub fn finish(&mut self) -> Vec<String> {
        let mut payloads = Vec::new();
        if !self.pending.trim().is_empty() {
            let block = std::mem::take(&mut self.pending);
            Self::collect_data_lines(&block, &mut payloads);
        }
        payloads
    }

    fn collect_data_lines(block: &str, out: &mut Vec<String>) {
        for line in block.lines() {
            if let Some(data) = line.trim().strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    out.push(data.to_string());
                }
            }
        }
    }
}

/// Build a [`BoxStream`] from an SSE response and a payload parser.
///
/// The parser is `FnMut` so adapters can keep assembly state across
/// payloads (tool-call argument buffers). A trailing `Done` event is
/// synthesized when the endpoint closes the body without one.
pub fn event_stream<F>(
    response: reqwest::Response,
    mut parse_payload: F,
) -> BoxStream<'static, Result<StreamEvent>>
where
    F: FnMut(&str) -> Vec<Result<StreamEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut buffer = SseBuffer::new();
        let mut body = response.bytes_stream();
        let mut done_seen = false;

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    yield Err(Error::Http(e.to_string()));
                    break;
                }
            };

            for payload in buffer.feed(&String::from_utf8_lossy(&chunk)) {
                for event in parse_payload(&payload) {
                    done_seen |= matches!(&event, Ok(StreamEvent::Done { .. }));
                    yield event;
                }
            }
        }

        for payload in buffer.finish() {
            for event in parse_payload(&payload) {
                done_seen |= matches!(&event, Ok(StreamEvent::Done { .. }));
                yield event;
            }
        }

        if !done_seen {
            yield Ok(StreamEvent::Done { usage: None, finish_reason: Some("stop".into()) });
        }
    };

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_complete_event() {
        let mut buf = SseBuffer::new();
        let payloads = buf.feed("event: message\ndata: {\"a\":1}\n\n");
        assert_eq!(payloads, vec!["{\"a\":1}"]);
    }

    #[test]
    fn split_across_chunks() {
        let mut buf = SseBuffer::new();
        assert!(buf.feed("data: par").is_empty());
        assert!(buf.feed("tial").is_empty());
        let payloads = buf.feed("\n\ndata: next\n\n");
        assert_eq!(payloads, vec!["partial", "next"]);
    }

    #[test]
    fn crlf_framing() {
        let mut buf = SseBuffer::new();
        let payloads = buf.feed("data: one\r\n\r\ndata: two\r\n\r\n");
        assert_eq!(payloads, vec!["one", "two"]);
    }

    #[test]
    fn ignores_non_data_fields() {
        let mut buf = SseBuffer::new();
        let payloads = buf.feed("id: 7\nretry: 100\nevent: ping\ndata: payload\n\n");
        assert_eq!(payloads, vec!["payload"]);
    }

    #[test]
    fn finish_flushes_trailing_partial() {
        let mut buf = SseBuffer::new();
        assert!(buf.feed("data: [DONE]").is_empty());
        assert_eq!(buf.finish(), vec!["[DONE]"]);
        assert!(buf.finish().is_empty());
    }

    #[test]
    fn empty_data_lines_skipped() {
        let mut buf = SseBuffer::new();
        assert!(buf.feed("data:\n\ndata:   \n\n").is_empty());
    }
}
