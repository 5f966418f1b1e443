//! Eviction priority scoring.
//!
//! Higher scores survive longer. Recent tool evidence outranks older
//! intermediate reasoning: tool results sit above injected notices, which
//! sit above assistant chatter, and every class gets a recency bonus.

use dr_domain::{Message, Role};

/// Score one message in `[0, 100]`.
pub fn priority(messages: &[Message], index: usize) -> f64 {
    let n = messages.len();
    let msg = &messages[index];

    let position = if n > 2 {
        (index as f64 / (n - 1) as f64) * 30.0
    } else {
        15.0
    };

    match (msg.role, index) {
        (Role::System, 0) => 100.0,
        (Role::User, 1) => 90.0,
        (Role::Tool, _) => 55.0 + position,
        // Injected system notices (anything system past index 0).
        (Role::System, _) => 45.0 + position,
        // Injected user messages (steering, nudges).
        (Role::User, _) => 40.0 + position,
        (Role::Assistant, _) if msg.has_tool_calls() => 35.0 + position,
        (Role::Assistant, _) => 18.0 + position,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dr_domain::ToolCall;

    fn conversation() -> Vec<Message> {
        vec![
            Message::system("sys"),
            Message::user("task"),
            Message::assistant("thinking out loud"),
            Message::assistant_with_tools(
                "",
                vec![ToolCall {
                    id: "c".into(),
                    name: "fetch_url".into(),
                    arguments: "{}".into(),
                }],
            ),
            Message::tool_result("c", "evidence"),
            Message::user("steer left"),
        ]
    }

    #[test]
    fn anchors_score_highest() {
        let ms = conversation();
        assert_eq!(priority(&ms, 0), 100.0);
        assert_eq!(priority(&ms, 1), 90.0);
    }

    #[test]
    fn tool_evidence_beats_assistant_text() {
        let ms = conversation();
        assert!(priority(&ms, 4) > priority(&ms, 3));
        assert!(priority(&ms, 3) > priority(&ms, 2));
    }

    #[test]
    fn recency_breaks_class_order() {
        // Two plain assistant messages: the later one scores higher.
        let ms = vec![
            Message::system("s"),
            Message::user("u"),
            Message::assistant("old"),
            Message::assistant("new"),
        ];
        assert!(priority(&ms, 3) > priority(&ms, 2));
    }

    #[test]
    fn two_message_conversation_uses_flat_position() {
        let ms = vec![Message::assistant("a"), Message::assistant("b")];
        assert_eq!(priority(&ms, 0), 18.0 + 15.0);
        assert_eq!(priority(&ms, 1), 18.0 + 15.0);
    }
}
