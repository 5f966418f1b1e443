//! Exact BPE token counting with a process-lifetime heuristic fallback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use tiktoken_rs::CoreBPE;

static BPE: OnceLock<Option<CoreBPE>> = OnceLock::new();
static HEURISTIC_ONLY: AtomicBool = AtomicBool::new(false);

/// Count tokens under the cl100k vocabulary.
///
/// If the tokenizer fails to construct, it is disabled for the rest of the
/// process and every subsequent call uses [`heuristic_count`].
pub fn count_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }

    if !HEURISTIC_ONLY.load(Ordering::Relaxed) {
        match BPE.get_or_init(|| tiktoken_rs::cl100k_base().ok()) {
            Some(bpe) => return bpe.encode_ordinary(text).len(),
            None => {
                HEURISTIC_ONLY.store(true, Ordering::Relaxed);
                tracing::warn!("cl100k tokenizer unavailable; using heuristic counts");
            }
        }
    }

    heuristic_count(text)
}

/// Approximate count used when the exact tokenizer is unavailable.
///
/// Base `ceil(len/4)`, scaled ×1.15 when symbol density exceeds 20 % and a
/// further ×1.1 when the text looks like a JSON object or array (both skew
/// toward shorter tokens than prose).
pub fn heuristic_count(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }

    let mut estimate = (text.len() as f64 / 4.0).ceil();

    let total = text.chars().count();
    let symbols = text
        .chars()
        .filter(|c| !c.is_alphanumeric() && !c.is_whitespace())
        .count();
    if total > 0 && symbols as f64 / total as f64 > 0.20 {
        estimate *= 1.15;
    }

    let trimmed = text.trim_start();
    if (trimmed.starts_with('{') || trimmed.starts_with('[')) && text.contains("\":") {
        estimate *= 1.1;
    }

    estimate.ceil() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_zero() {
        assert_eq!(count_tokens(""), 0);
        assert_eq!(heuristic_count(""), 0);
    }

    #[test]
    fn heuristic_base_is_quarter_length() {
        // 16 plain alphanumeric chars, no symbol or JSON scaling.
        assert_eq!(heuristic_count("abcdefgh12345678"), 4);
    }

    #[test]
    fn heuristic_scales_symbol_heavy_text() {
        // 8 chars, all symbols: ceil(8/4)=2, ×1.15 → ceil(2.3) = 3.
        assert_eq!(heuristic_count("!@#$%^&*"), 3);
    }

    #[test]
    fn heuristic_scales_json_payloads() {
        let json = r#"{"key":"value","n":12345}"#;
        // len 25 → ceil 7; symbol-heavy ×1.15 → 8.05; JSON ×1.1 → ceil 8.855 = 9.
        assert_eq!(heuristic_count(json), 9);
    }

    #[test]
    fn exact_count_is_positive_for_text() {
        assert!(count_tokens("What is the weather in Berlin today?") > 0);
    }

    #[test]
    fn exact_count_grows_with_content() {
        let short = count_tokens("hello");
        let long = count_tokens("hello hello hello hello hello");
        assert!(long > short);
    }
}
