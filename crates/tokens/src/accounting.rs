//! Per-message token pricing.
//!
//! The constants here are a floor contract shared with the compressor and
//! the dispatcher: framing, image, and tool-call envelope charges are fixed
//! so budget math stays stable across tokenizer versions.

use dr_domain::{Message, MessageContent};

use crate::counter::count_tokens;

/// Framing overhead charged per message (role + separators).
pub const MESSAGE_FRAMING_TOKENS: usize = 4;
/// Flat charge per image part.
pub const IMAGE_PART_TOKENS: usize = 425;
/// Envelope overhead per tool call (id + function wrapper).
pub const TOOL_CALL_ENVELOPE_TOKENS: usize = 12;
/// Reply-priming overhead charged once per request.
pub const REPLY_PRIMING_TOKENS: usize = 3;

/// Token cost of one message: framing + content + tool-call envelopes +
/// hidden reasoning payload.
pub fn estimate_message_tokens(message: &Message) -> usize {
    let mut total = MESSAGE_FRAMING_TOKENS;

    match &message.content {
        MessageContent::Text(text) => total += count_tokens(text),
        MessageContent::Parts(parts) => {
            for part in parts {
                match part {
                    dr_domain::ContentPart::Text { text } => total += count_tokens(text),
                    dr_domain::ContentPart::Image { .. } => total += IMAGE_PART_TOKENS,
                }
            }
        }
        MessageContent::Empty => {}
    }

    for call in &message.tool_calls {
        total += TOOL_CALL_ENVELOPE_TOKENS + count_tokens(&call.name) + count_tokens(&call.arguments);
    }

    if let Some(reasoning) = &message.reasoning_content {
        total += count_tokens(reasoning);
    }

    total
}

/// Token cost of a whole conversation as one request.
pub fn estimate_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum::<usize>() + REPLY_PRIMING_TOKENS
}

#[cfg(test)]
mod tests {
    use super::*;
    use dr_domain::{ContentPart, ToolCall};

    fn empty_assistant() -> Message {
        Message::assistant_with_tools("", Vec::new())
    }

    #[test]
    fn framing_only_for_empty_message() {
        assert_eq!(estimate_message_tokens(&empty_assistant()), 4);
    }

    #[test]
    fn reply_priming_charged_once() {
        assert_eq!(estimate_tokens(&[]), 3);
        assert_eq!(estimate_tokens(&[empty_assistant()]), 3 + 4);
    }

    #[test]
    fn image_part_flat_charge() {
        let mut m = empty_assistant();
        m.content = MessageContent::Parts(vec![ContentPart::Image {
            url: "https://example.com/chart.png".into(),
            media_type: None,
        }]);
        assert_eq!(estimate_message_tokens(&m), 4 + 425);
    }

    #[test]
    fn tool_call_envelope_charge() {
        // Empty name and arguments isolate the fixed envelope cost.
        let mut m = empty_assistant();
        m.tool_calls = vec![ToolCall {
            id: "c1".into(),
            name: String::new(),
            arguments: String::new(),
        }];
        assert_eq!(estimate_message_tokens(&m), 4 + 12);
    }

    #[test]
    fn reasoning_content_is_charged() {
        let mut with = Message::assistant("done");
        with.reasoning_content = Some("thinking about it at length".into());
        let without = Message::assistant("done");
        assert!(estimate_message_tokens(&with) > estimate_message_tokens(&without));
    }

    #[test]
    fn monotonic_in_message_count() {
        let base = vec![Message::system("sys"), Message::user("hi")];
        let mut more = base.clone();
        more.push(Message::assistant("an answer"));
        assert!(estimate_tokens(&more) > estimate_tokens(&base));
    }

    #[test]
    fn monotonic_in_tool_calls() {
        let plain = Message::assistant("x");
        let mut with_call = plain.clone();
        with_call.tool_calls.push(ToolCall {
            id: "c".into(),
            name: "fetch_url".into(),
            arguments: r#"{"url":"https://example.com"}"#.into(),
        });
        assert!(estimate_message_tokens(&with_call) > estimate_message_tokens(&plain));
    }
}
