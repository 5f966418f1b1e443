//! Synthetic eviction summary.
//!
//! When messages are dropped, a single assistant message records what the
//! evicted region contained: which tools ran (with repeat counts), how many
//! results were processed, which files were touched, and a few response
//! snippets.

use dr_domain::{Message, Role};

use crate::planner::files;

const MAX_PATHS: usize = 8;
const MAX_SNIPPETS: usize = 3;
const SNIPPET_CHARS: usize = 60;

/// Build the summary message for the evicted indices, or `None` when
/// nothing was evicted.
pub fn summarize_evicted(messages: &[Message], evicted: &[usize]) -> Option<Message> {
    if evicted.is_empty() {
        return None;
    }

    // Tool names with repetition counts, in first-seen order.
    let mut tool_counts: Vec<(String, usize)> = Vec::new();
    let mut result_count = 0usize;
    let mut all_text = String::new();
    let mut snippets: Vec<String> = Vec::new();

    for &i in evicted {
        let msg = &messages[i];
        for call in &msg.tool_calls {
            match tool_counts.iter_mut().find(|(name, _)| name == &call.name) {
                Some((_, n)) => *n += 1,
                None => tool_counts.push((call.name.clone(), 1)),
            }
        }
        if msg.role == Role::Tool {
            result_count += 1;
        }

        let text = msg.content.extract_all_text();
        if !text.is_empty() {
            all_text.push_str(&text);
            all_text.push('\n');
        }

        if msg.role == Role::Assistant && msg.tool_calls.is_empty() && snippets.len() < MAX_SNIPPETS
        {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                snippets.push(clip(trimmed, SNIPPET_CHARS));
            }
        }
    }

    let mut paths = files::extract_file_paths(&all_text, &Default::default());
    paths.truncate(MAX_PATHS);

    let mut parts: Vec<String> = Vec::new();
    if !tool_counts.is_empty() {
        let listed: Vec<String> = tool_counts
            .iter()
            .map(|(name, n)| {
                if *n > 1 {
                    format!("{name}(\u{d7}{n})")
                } else {
                    name.clone()
                }
            })
            .collect();
        parts.push(format!("tools: {}", listed.join(", ")));
    }
    if result_count > 0 {
        parts.push(format!("processed {result_count} tool results"));
    }
    if !paths.is_empty() {
        parts.push(format!("files: {}", paths.join(", ")));
    }
    if !snippets.is_empty() {
        parts.push(format!("notes: {}", snippets.join(" | ")));
    }

    let body = if parts.is_empty() {
        format!("{} earlier messages summarized", evicted.len())
    } else {
        parts.join("; ")
    };

    Some(Message::assistant(format!("[Context summary: {body}]")))
}

fn clip(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let clipped: String = text.chars().take(max).collect();
    format!("{clipped}\u{2026}")
}
