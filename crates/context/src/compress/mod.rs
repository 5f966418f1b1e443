//! Token-budgeted context compression.
//!
//! Reduces an oversize message history to fit a model's context window.
//! The output is always a subsequence of the input (plus at most one
//! synthetic summary at position 2) that keeps the system prompt, the
//! original user request, a recent tail, and every tool-call/result pair
//! intact.

pub mod pairing;
pub mod score;
pub mod summary;

use std::collections::BTreeSet;

use dr_domain::trace::TraceEvent;
use dr_domain::{Message, Role};
use dr_tokens::accounting::{estimate_message_tokens, estimate_tokens, REPLY_PRIMING_TOKENS};

use pairing::Pairing;
use score::priority;
use summary::summarize_evicted;

/// Tokens held back for the synthetic summary message.
const SUMMARY_RESERVE_TOKENS: usize = 100;

/// Compress `messages` to fit `budget` tokens, never evicting the last
/// `min_tail` messages.
///
/// Fast paths return the input unchanged when it already fits or is too
/// short to compress meaningfully.
pub fn compress(messages: &[Message], budget: usize, min_tail: usize) -> Vec<Message> {
    let before_tokens = estimate_tokens(messages);
    if before_tokens <= budget {
        return messages.to_vec();
    }
    if messages.len() <= min_tail + 2 {
        return messages.to_vec();
    }

    let n = messages.len();
    let pairing = Pairing::build(messages);

    // ── Always-keep set ───────────────────────────────────────────
    // Anchors, the tail (walked back so it never opens on a dangling tool
    // result), and the transitive pairing partners of everything kept.
    let mut keep: BTreeSet<usize> = BTreeSet::new();
    keep.insert(0);
    keep.insert(1);

    let mut tail_start = n.saturating_sub(min_tail);
    while tail_start > 0 && tail_start < n && messages[tail_start].role == Role::Tool {
        tail_start -= 1;
    }
    keep.extend(tail_start..n);

    let mut work: Vec<usize> = keep.iter().copied().collect();
    while let Some(i) = work.pop() {
        for partner in pairing.partners(i) {
            if keep.insert(partner) {
                work.push(partner);
            }
        }
    }

    // ── Token accounting ──────────────────────────────────────────
    let used: usize = keep
        .iter()
        .map(|&i| estimate_message_tokens(&messages[i]))
        .sum::<usize>()
        + REPLY_PRIMING_TOKENS;

    // Already over budget on the mandatory set: degrade to it verbatim.
    if used > budget {
        let result: Vec<Message> = keep.iter().map(|&i| messages[i].clone()).collect();
        emit_trace(messages.len(), result.len(), before_tokens, budget, false);
        return result;
    }

    let mut remaining = (budget - used).saturating_sub(SUMMARY_RESERVE_TOKENS);

    // ── Greedy admission ──────────────────────────────────────────
    // Candidates by priority descending; ties go to the higher index so
    // the newer of two equals survives. A candidate is only admitted
    // together with its unkept pairing partners.
    let mut candidates: Vec<usize> = (0..n).filter(|i| !keep.contains(i)).collect();
    candidates.sort_by(|&a, &b| {
        priority(messages, b)
            .partial_cmp(&priority(messages, a))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.cmp(&a))
    });

    let mut admitted: BTreeSet<usize> = BTreeSet::new();
    for &c in &candidates {
        if keep.contains(&c) || admitted.contains(&c) {
            continue;
        }
        let mut group = vec![c];
        group.extend(
            pairing
                .partners(c)
                .into_iter()
                .filter(|p| !keep.contains(p) && !admitted.contains(p)),
        );
        let cost: usize = group
            .iter()
            .map(|&i| estimate_message_tokens(&messages[i]))
            .sum();
        if cost <= remaining {
            remaining -= cost;
            admitted.extend(group);
        }
    }

    keep.extend(admitted);

    // ── Summary + assembly ────────────────────────────────────────
    let evicted: Vec<usize> = (0..n).filter(|i| !keep.contains(i)).collect();
    let summary = summarize_evicted(messages, &evicted);

    let mut result: Vec<Message> = Vec::with_capacity(keep.len() + 1);
    result.push(messages[0].clone());
    result.push(messages[1].clone());
    if let Some(s) = &summary {
        result.push(s.clone());
    }
    result.extend(keep.iter().filter(|&&i| i > 1).map(|&i| messages[i].clone()));

    // Drop the summary rather than blow the budget.
    let mut summarized = summary.is_some();
    if summarized && estimate_tokens(&result) > budget {
        result.remove(2);
        summarized = false;
    }

    emit_trace(messages.len(), result.len(), before_tokens, budget, summarized);
    result
}

fn emit_trace(before: usize, after: usize, before_tokens: usize, budget: usize, summarized: bool) {
    TraceEvent::CompressionApplied {
        before_messages: before,
        after_messages: after,
        before_tokens,
        budget,
        summarized,
    }
    .emit();
}

#[cfg(test)]
mod tests {
    use super::*;
    use dr_domain::ToolCall;

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: r#"{"q":"x"}"#.into(),
        }
    }

    fn filler(word: &str) -> String {
        // Roughly 100+ tokens of distinct prose per message.
        format!("{word} ").repeat(120)
    }

    /// A long conversation with interleaved tool activity.
    fn long_conversation() -> Vec<Message> {
        let mut ms = vec![
            Message::system("You are a careful research assistant."),
            Message::user("Summarize the repo and check the weather in three cities."),
        ];
        for i in 0..10 {
            ms.push(Message::assistant(filler(&format!("thought{i}"))));
            ms.push(Message::assistant_with_tools(
                "",
                vec![call(&format!("c{i}"), "fetch_url")],
            ));
            ms.push(Message::tool_result(format!("c{i}"), filler(&format!("result{i}"))));
        }
        ms.push(Message::assistant("Wrapping up now."));
        ms
    }

    fn assert_pairing_intact(output: &[Message]) {
        for msg in output {
            if msg.role != Role::Tool {
                continue;
            }
            let Some(id) = &msg.tool_call_id else { continue };
            assert!(
                output
                    .iter()
                    .any(|m| m.has_tool_calls() && m.tool_calls.iter().any(|c| &c.id == id)),
                "tool result {id} lost its assistant parent"
            );
        }
    }

    #[test]
    fn identity_when_under_budget() {
        let ms = vec![Message::system("s"), Message::user("u"), Message::assistant("a")];
        let out = compress(&ms, 1_000_000, 6);
        assert_eq!(out.len(), ms.len());
    }

    #[test]
    fn identity_when_too_short() {
        let ms: Vec<Message> = (0..7).map(|i| Message::assistant(filler(&i.to_string()))).collect();
        // 7 messages ≤ min_tail(6) + 2 even though far over budget.
        let out = compress(&ms, 10, 6);
        assert_eq!(out.len(), 7);
    }

    #[test]
    fn empty_input_returns_empty() {
        assert!(compress(&[], 100, 6).is_empty());
    }

    #[test]
    fn single_message_unchanged() {
        let ms = vec![Message::user(filler("alone"))];
        assert_eq!(compress(&ms, 1, 6).len(), 1);
    }

    #[test]
    fn anchors_and_tail_survive() {
        let ms = long_conversation();
        let budget = estimate_tokens(&ms) / 3;
        let out = compress(&ms, budget, 6);

        assert!(out.len() < ms.len());
        assert_eq!(out[0].content.extract_all_text(), ms[0].content.extract_all_text());
        assert_eq!(out[1].content.extract_all_text(), ms[1].content.extract_all_text());
        // Tail: the last 6 input messages all appear in the output.
        for tail_msg in &ms[ms.len() - 6..] {
            let text = tail_msg.content.extract_all_text();
            assert!(
                out.iter().any(|m| m.content.extract_all_text() == text
                    && m.tool_call_id == tail_msg.tool_call_id),
                "tail message missing: {text:.30}"
            );
        }
    }

    #[test]
    fn pairing_preserved_under_pressure() {
        let ms = long_conversation();
        for divisor in [2, 3, 5, 8] {
            let out = compress(&ms, estimate_tokens(&ms) / divisor, 6);
            assert_pairing_intact(&out);
        }
    }

    #[test]
    fn output_grows_by_at_most_one() {
        let ms = long_conversation();
        let out = compress(&ms, estimate_tokens(&ms) / 2, 6);
        assert!(out.len() <= ms.len() + 1);
    }

    #[test]
    fn output_is_subsequence_plus_summary() {
        let ms = long_conversation();
        let out = compress(&ms, estimate_tokens(&ms) / 2, 6);

        let originals: Vec<String> = ms.iter().map(|m| m.content.extract_all_text()).collect();
        let mut cursor = 0usize;
        let mut summaries = 0usize;
        for m in &out {
            let text = m.content.extract_all_text();
            if text.starts_with("[Context summary:") {
                summaries += 1;
                continue;
            }
            let pos = originals[cursor..]
                .iter()
                .position(|o| *o == text)
                .unwrap_or_else(|| panic!("output message not in input order: {text:.40}"));
            cursor += pos + 1;
        }
        assert!(summaries <= 1);
    }

    #[test]
    fn summary_describes_evicted_tools() {
        let ms = long_conversation();
        let out = compress(&ms, estimate_tokens(&ms) / 3, 6);
        let summary = out
            .iter()
            .find(|m| m.content.extract_all_text().starts_with("[Context summary:"));
        if let Some(s) = summary {
            assert!(s.content.extract_all_text().contains("fetch_url"));
        }
    }

    #[test]
    fn mandatory_overflow_degrades_to_always_keep() {
        let ms = long_conversation();
        // Budget far below what the anchors + tail cost.
        let out = compress(&ms, 50, 6);
        assert!(out.len() < ms.len());
        assert!(!out
            .iter()
            .any(|m| m.content.extract_all_text().starts_with("[Context summary:")));
        assert_pairing_intact(&out);
    }

    #[test]
    fn tail_never_opens_on_dangling_tool_result() {
        // Arrange the tail boundary to land on a tool result.
        let mut ms = vec![
            Message::system("s"),
            Message::user(filler("u")),
        ];
        for i in 0..6 {
            ms.push(Message::assistant(filler(&format!("pad{i}"))));
        }
        ms.push(Message::assistant_with_tools("", vec![call("t1", "get_weather")]));
        ms.push(Message::tool_result("t1", filler("weather")));
        for i in 0..5 {
            ms.push(Message::assistant(filler(&format!("post{i}"))));
        }
        // min_tail = 6 puts the boundary exactly on the tool result.
        let out = compress(&ms, estimate_tokens(&ms) / 2, 6);
        assert_pairing_intact(&out);
    }

    #[test]
    fn orphan_tool_results_are_droppable() {
        let mut ms = vec![
            Message::system("s"),
            Message::user(filler("ask")),
            Message::tool_result("ghost", filler("orphan evidence")),
        ];
        for i in 0..12 {
            ms.push(Message::assistant(filler(&format!("later{i}"))));
        }
        let out = compress(&ms, estimate_tokens(&ms) / 4, 6);
        assert_pairing_intact(&out);
        // The orphan may be evicted without taking anything else with it.
        assert!(out.len() < ms.len());
    }

    #[test]
    fn all_tool_conversation_does_not_crash() {
        let ms: Vec<Message> = (0..12)
            .map(|i| Message::tool_result(format!("c{i}"), filler(&i.to_string())))
            .collect();
        let out = compress(&ms, estimate_tokens(&ms) / 4, 6);
        assert!(!out.is_empty());
    }
}
