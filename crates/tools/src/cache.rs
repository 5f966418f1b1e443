//! Per-task tool result cache, keyed by content address.
//!
//! A repeated safe tool call with identical (normalized) arguments returns
//! the cached result string bit-exact, without invoking the executor.
//! Error results are never cached; mutating tools bypass the cache at the
//! dispatch layer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

/// JSON-normalize an argument string: objects re-serialize with sorted
/// keys, so semantically equal argument orderings share a cache slot.
/// Unparseable arguments fall back to their trimmed raw form.
pub fn normalize_arguments(arguments: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(arguments) {
        Ok(v) => v.to_string(),
        Err(_) => arguments.trim().to_string(),
    }
}

/// The `toolName:normalized-arguments` fingerprint used for dedup tracking
/// and progress reporting.
pub fn signature(tool_name: &str, arguments: &str) -> String {
    format!("{tool_name}:{}", normalize_arguments(arguments))
}

#[derive(Default)]
pub struct ToolCache {
    entries: Mutex<HashMap<String, String>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ToolCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(tool_name: &str, arguments: &str) -> String {
        let digest = Sha256::digest(normalize_arguments(arguments).as_bytes());
        format!("{tool_name}:{}", hex::encode(digest))
    }

    pub fn get(&self, tool_name: &str, arguments: &str) -> Option<String> {
        let found = self
            .entries
            .lock()
            .get(&Self::key(tool_name, arguments))
            .cloned();
        match &found {
            Some(_) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                dr_domain::trace::TraceEvent::ToolCacheHit {
                    tool_name: tool_name.to_string(),
                }
                .emit();
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
            }
        }
        found
    }

    /// Store a successful result. Error-shaped results are refused so a
    /// transient failure doesn't poison the rest of the task.
    pub fn insert(&self, tool_name: &str, arguments: &str, result: &str) {
        if result.starts_with("Error:") {
            return;
        }
        self.entries
            .lock()
            .insert(Self::key(tool_name, arguments), result.to_string());
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_order_is_normalized() {
        let cache = ToolCache::new();
        cache.insert("get_currency", r#"{"from":"EUR","to":"USD"}"#, "1.09");
        assert_eq!(
            cache.get("get_currency", r#"{"to":"USD","from":"EUR"}"#),
            Some("1.09".to_string())
        );
    }

    #[test]
    fn errors_are_not_cached() {
        let cache = ToolCache::new();
        cache.insert("fetch_url", "{}", "Error: connection refused");
        assert_eq!(cache.get("fetch_url", "{}"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn counters_track_hits_and_misses() {
        let cache = ToolCache::new();
        assert_eq!(cache.get("t", "{}"), None);
        cache.insert("t", "{}", "ok");
        assert!(cache.get("t", "{}").is_some());
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn signature_uses_normalized_arguments() {
        assert_eq!(
            signature("web_search", r#"{ "query" : "rust" }"#),
            r#"web_search:{"query":"rust"}"#
        );
        assert_eq!(signature("t", "not json "), "t:not json");
    }

    #[test]
    fn different_tools_do_not_collide() {
        let cache = ToolCache::new();
        cache.insert("a", "{}", "ra");
        cache.insert("b", "{}", "rb");
        assert_eq!(cache.get("a", "{}"), Some("ra".into()));
        assert_eq!(cache.get("b", "{}"), Some("rb".into()));
    }
}
