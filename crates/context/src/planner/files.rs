//! Heuristic extraction of file paths and repository context from free text.
//!
//! All patterns are compiled once and held for the process lifetime; these
//! functions run inside the processor's iteration loop.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use regex::Regex;

use dr_domain::config::PlannerConfig;
use dr_domain::{Message, Role};

/// The two extension-driven path patterns, compiled per distinct
/// extension set (one entry per loaded config in practice).
struct PathPatterns {
    with_slash: Regex,
    bare: Regex,
}

fn path_patterns(cfg: &PlannerConfig) -> Option<Arc<PathPatterns>> {
    static CACHE: OnceLock<Mutex<HashMap<String, Arc<PathPatterns>>>> = OnceLock::new();

    let exts = cfg
        .code_extensions
        .iter()
        .map(|e| regex::escape(e))
        .collect::<Vec<_>>()
        .join("|");

    let mut cache = CACHE.get_or_init(|| Mutex::new(HashMap::new())).lock();
    if let Some(patterns) = cache.get(&exts) {
        return Some(patterns.clone());
    }

    let with_slash = Regex::new(&format!(
        r#"(^|[\s`"'(\[@])((?:\./)?[\w.-]+(?:/[\w.-]+)+\.(?:{exts}))(:\d+)?"#
    ))
    .ok()?;
    let bare = Regex::new(&format!(r#"(^|[\s`"'(\[])([\w-]+\.(?:{exts}))\b"#)).ok()?;

    let patterns = Arc::new(PathPatterns { with_slash, bare });
    cache.insert(exts, patterns.clone());
    Some(patterns)
}

fn version_segment() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/v\d+\.\d+(/|$)").expect("static regex"))
}

/// Extract file-path candidates from free-form text.
///
/// Two passes: slash-containing paths with a known code/config extension,
/// then bare filenames. Trailing `:line` and leading `./` are stripped;
/// media artifacts, version-segment paths (`/v1.2/`), and npm-scope
/// (`@scope/...`) references are excluded. Deduplicated in first-seen order.
pub fn extract_file_paths(text: &str, cfg: &PlannerConfig) -> Vec<String> {
    let Some(patterns) = path_patterns(cfg) else {
        return Vec::new();
    };

    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();

    for caps in patterns.with_slash.captures_iter(text) {
        // npm scopes look like paths but aren't files.
        if &caps[1] == "@" {
            continue;
        }
        let path = caps[2].trim_start_matches("./");
        if version_segment().is_match(path) || has_media_extension(path, cfg) {
            continue;
        }
        if seen.insert(path.to_string()) {
            out.push(path.to_string());
        }
    }

    for caps in patterns.bare.captures_iter(text) {
        let name = &caps[2];
        if has_media_extension(name, cfg) {
            continue;
        }
        if seen.insert(name.to_string()) {
            out.push(name.to_string());
        }
    }

    out
}

fn has_media_extension(path: &str, cfg: &PlannerConfig) -> bool {
    path.rsplit('.')
        .next()
        .is_some_and(|ext| cfg.media_extensions.iter().any(|m| m.eq_ignore_ascii_case(ext)))
}

/// Find the `OWNER/REPO` a task is about, scanning system and user
/// messages. Priority: explicit label, then a github.com URL, then a
/// prepositional mention.
pub fn extract_repo_context(messages: &[Message]) -> Option<String> {
    static LABELED: OnceLock<Regex> = OnceLock::new();
    static GITHUB: OnceLock<Regex> = OnceLock::new();
    static PREPOSITIONAL: OnceLock<Regex> = OnceLock::new();

    let labeled = LABELED.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:repository|repo|project|codebase)\s*[:\-]\s*([A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+)",
        )
        .expect("static regex")
    });
    let github = GITHUB.get_or_init(|| {
        Regex::new(r#"github\.com[/:]([A-Za-z0-9_.-]+)/([A-Za-z0-9_-]+?)(?:\.git)?(?:[/\s"'),;]|$)"#)
            .expect("static regex")
    });
    let prepositional = PREPOSITIONAL.get_or_init(|| {
        Regex::new(r"(?i)\b(?:in|from|on|at|of)\s+([A-Za-z0-9_-]+/[A-Za-z0-9_.-]+)\b")
            .expect("static regex")
    });

    let texts: Vec<String> = messages
        .iter()
        .filter(|m| matches!(m.role, Role::System | Role::User))
        .map(|m| m.content.extract_all_text())
        .collect();

    for text in &texts {
        if let Some(caps) = labeled.captures(text) {
            return Some(trim_repo(&caps[1]));
        }
    }
    for text in &texts {
        if let Some(caps) = github.captures(text) {
            return Some(format!("{}/{}", &caps[1], &caps[2]));
        }
    }
    for text in &texts {
        if let Some(caps) = prepositional.captures(text) {
            return Some(trim_repo(&caps[1]));
        }
    }
    None
}

fn trim_repo(raw: &str) -> String {
    raw.trim_end_matches(['.', ',', ':', ';', ')']).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> PlannerConfig {
        PlannerConfig::default()
    }

    #[test]
    fn extracts_slash_paths_with_line_numbers() {
        let text = "The bug is in src/runtime/turn.rs:412 and also touches crates/domain/src/lib.rs.";
        let paths = extract_file_paths(text, &cfg());
        assert_eq!(paths, vec!["src/runtime/turn.rs", "crates/domain/src/lib.rs"]);
    }

    #[test]
    fn strips_leading_dot_slash() {
        let paths = extract_file_paths("run ./scripts/build.sh first", &cfg());
        assert_eq!(paths, vec!["scripts/build.sh"]);
    }

    #[test]
    fn extracts_bare_filenames() {
        let paths = extract_file_paths("edit `Cargo.toml` and README.md", &cfg());
        assert!(paths.contains(&"Cargo.toml".to_string()));
        assert!(paths.contains(&"README.md".to_string()));
    }

    #[test]
    fn excludes_media_versions_and_scopes() {
        let text = "see logo.png, api/v1.2/schema.json, and @types/node/index.d.ts";
        let paths = extract_file_paths(text, &cfg());
        assert!(paths.is_empty(), "{paths:?}");
    }

    #[test]
    fn dedups_repeats() {
        let paths = extract_file_paths("src/a.rs then src/a.rs again", &cfg());
        assert_eq!(paths, vec!["src/a.rs"]);
    }

    #[test]
    fn repo_from_explicit_label() {
        let ms = vec![Message::user("repository: acme/widgets — fix the parser")];
        assert_eq!(extract_repo_context(&ms).as_deref(), Some("acme/widgets"));
    }

    #[test]
    fn repo_from_github_url() {
        let ms = vec![Message::user("see https://github.com/acme/widgets/pull/12")];
        assert_eq!(extract_repo_context(&ms).as_deref(), Some("acme/widgets"));
    }

    #[test]
    fn repo_from_preposition() {
        let ms = vec![Message::user("fix the flaky test in acme/widgets please")];
        assert_eq!(extract_repo_context(&ms).as_deref(), Some("acme/widgets"));
    }

    #[test]
    fn label_outranks_url_even_in_later_message() {
        let ms = vec![
            Message::user("context: https://github.com/other/thing"),
            Message::user("repo: acme/widgets"),
        ];
        assert_eq!(extract_repo_context(&ms).as_deref(), Some("acme/widgets"));
    }

    #[test]
    fn assistant_messages_are_ignored() {
        let ms = vec![Message::assistant("repo: sneaky/injection")];
        assert_eq!(extract_repo_context(&ms), None);
    }
}
