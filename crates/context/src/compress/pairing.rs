//! Tool-call pairing maps.
//!
//! Every tool-role message must stay adjacent (in keep/evict decisions) to
//! the assistant message whose call spawned it: the model rejects
//! conversations with dangling halves. This module builds both directions
//! of that association once per compression.

use std::collections::HashMap;

use dr_domain::{Message, Role};

/// Bidirectional pairing between assistant-with-tool-calls messages and
/// their tool-result messages, by message index.
#[derive(Debug, Default)]
pub struct Pairing {
    /// assistant index → indices of its tool results.
    results_of: HashMap<usize, Vec<usize>>,
    /// tool-result index → index of the assistant that spawned it.
    parent_of: HashMap<usize, usize>,
}

impl Pairing {
    pub fn build(messages: &[Message]) -> Self {
        let mut pairing = Self::default();

        for (i, msg) in messages.iter().enumerate() {
            if msg.role != Role::Tool {
                continue;
            }

            let parent = match &msg.tool_call_id {
                // Pair with the nearest preceding assistant carrying this id.
                Some(id) => messages[..i]
                    .iter()
                    .enumerate()
                    .rev()
                    .find(|(_, m)| m.has_tool_calls() && m.tool_calls.iter().any(|c| &c.id == id))
                    .map(|(a, _)| a),
                // No id: pair with the most recent assistant-with-tool-calls.
                None => messages[..i]
                    .iter()
                    .enumerate()
                    .rev()
                    .find(|(_, m)| m.has_tool_calls())
                    .map(|(a, _)| a),
            };

            if let Some(a) = parent {
                pairing.parent_of.insert(i, a);
            }
        }

        // Forward map: every tool result whose id appears in an assistant's
        // calls belongs to that assistant, so duplicate ids keep all their
        // results together with any kept assistant.
        for (i, msg) in messages.iter().enumerate() {
            if !msg.has_tool_calls() {
                continue;
            }
            let mut results: Vec<usize> = messages
                .iter()
                .enumerate()
                .filter(|(t, m)| {
                    m.role == Role::Tool
                        && (pairing.parent_of.get(t) == Some(&i)
                            || m.tool_call_id
                                .as_ref()
                                .is_some_and(|id| msg.tool_calls.iter().any(|c| &c.id == id)))
                })
                .map(|(t, _)| t)
                .collect();
            results.sort_unstable();
            if !results.is_empty() {
                pairing.results_of.insert(i, results);
            }
        }

        pairing
    }

    pub fn parent(&self, tool_index: usize) -> Option<usize> {
        self.parent_of.get(&tool_index).copied()
    }

    pub fn results(&self, assistant_index: usize) -> &[usize] {
        self.results_of
            .get(&assistant_index)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// A tool message with no reachable parent.
    pub fn is_orphan(&self, tool_index: usize) -> bool {
        !self.parent_of.contains_key(&tool_index)
    }

    /// All partners that must accompany `index`: an assistant pulls its
    /// results, a tool result pulls its parent and that parent's results.
    pub fn partners(&self, index: usize) -> Vec<usize> {
        let mut out = Vec::new();
        out.extend_from_slice(self.results(index));
        if let Some(parent) = self.parent(index) {
            out.push(parent);
            out.extend_from_slice(self.results(parent));
        }
        out.retain(|&i| i != index);
        out.sort_unstable();
        out.dedup();
        out
    }
}
