//! Pre-fetching planned files and composing the injected context block.
//!
//! Every unique file a plan references is fetched in parallel; whatever
//! resolves to usable text is packed into a `[PRE-LOADED FILES]` block,
//! subject to a per-file cap and a total budget.

use dr_domain::config::PlannerConfig;
use dr_domain::trace::TraceEvent;
use dr_domain::StructuredPlan;

/// Source of file contents (GitHub reader, workspace reader, ...).
/// Implementations resolve failures to `None` rather than erroring.
#[async_trait::async_trait]
pub trait FileFetcher: Send + Sync {
    async fn fetch(&self, repo: &str, path: &str) -> Option<String>;
}

/// One pre-fetched file, keyed `OWNER/REPO/PATH`.
pub struct PrefetchedFile {
    pub key: String,
    pub path: String,
    pub content: Option<String>,
}

/// The composed injection block plus its bookkeeping.
pub struct InjectionBlock {
    pub text: String,
    pub loaded_paths: Vec<String>,
    pub loaded: usize,
    pub skipped: usize,
}

const INJECTION_HEADER: &str = "[PRE-LOADED FILES] The following files were fetched for this \
task. Do NOT read these again; use the content below directly.";

/// Fetch every unique file the plan references, in parallel. Failures
/// resolve to `None` and are tolerated.
pub async fn prefetch_files(
    fetcher: &dyn FileFetcher,
    repo: &str,
    plan: &StructuredPlan,
) -> Vec<PrefetchedFile> {
    let paths = plan.referenced_files();

    let fetches = paths.iter().map(|path| async move {
        PrefetchedFile {
            key: format!("{repo}/{path}"),
            path: path.clone(),
            content: fetcher.fetch(repo, path).await,
        }
    });

    futures_util::future::join_all(fetches).await
}

/// Compose the `[PRE-LOADED FILES]` block from resolved fetches.
///
/// Skips empty, missing, and binary-looking files; truncates oversize
/// files with an explicit marker; and stops admitting files once the
/// total budget would overflow.
pub fn compose_injection(cfg: &PlannerConfig, files: &[PrefetchedFile]) -> InjectionBlock {
    let mut sections: Vec<String> = Vec::new();
    let mut loaded_paths = Vec::new();
    let mut skipped = 0usize;
    let mut total = 0usize;

    for file in files {
        let Some(content) = file.content.as_deref() else {
            skipped += 1;
            continue;
        };
        if content.is_empty() || looks_binary(content, cfg.binary_control_ratio) {
            skipped += 1;
            continue;
        }

        let rendered = render_file(content, cfg.per_file_char_cap);
        let section = format!("[FILE: {}]\n{}", file.path, rendered);
        if total + section.len() > cfg.total_injection_cap {
            skipped += 1;
            continue;
        }

        total += section.len();
        sections.push(section);
        loaded_paths.push(file.path.clone());
    }

    let loaded = loaded_paths.len();
    TraceEvent::FilesInjected {
        loaded,
        skipped,
        total_chars: total,
    }
    .emit();

    let text = if sections.is_empty() {
        String::new()
    } else {
        format!("{INJECTION_HEADER}\n\n{}", sections.join("\n\n"))
    };

    InjectionBlock {
        text,
        loaded_paths,
        loaded,
        skipped,
    }
}

fn render_file(content: &str, cap: usize) -> String {
    if content.len() <= cap {
        return content.to_string();
    }
    let boundary = floor_char_boundary(content, cap);
    format!(
        "{}\n... [truncated, {} chars total]",
        &content[..boundary],
        content.len()
    )
}

/// Scan up to the first 512 bytes; a high control-character ratio
/// (excluding tab/LF/CR) means the "file" is a binary blob.
fn looks_binary(content: &str, max_ratio: f64) -> bool {
    let window = &content.as_bytes()[..content.len().min(512)];
    if window.is_empty() {
        return false;
    }
    let control = window
        .iter()
        .filter(|&&b| b < 0x20 && b != b'\t' && b != b'\n' && b != b'\r')
        .count();
    control as f64 / window.len() as f64 > max_ratio
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    index = index.min(s.len());
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use dr_domain::PlanStep;

    struct MapFetcher(std::collections::HashMap<String, String>);

    #[async_trait::async_trait]
    impl FileFetcher for MapFetcher {
        async fn fetch(&self, _repo: &str, path: &str) -> Option<String> {
            self.0.get(path).cloned()
        }
    }

    fn plan(paths: &[&str]) -> StructuredPlan {
        StructuredPlan {
            steps: vec![PlanStep {
                action: "read".into(),
                files: paths.iter().map(|p| p.to_string()).collect(),
                description: "survey".into(),
            }],
        }
    }

    fn cfg() -> PlannerConfig {
        PlannerConfig::default()
    }

    #[tokio::test]
    async fn prefetch_tolerates_missing_files() {
        let fetcher = MapFetcher(
            [("src/lib.rs".to_string(), "pub fn main() {}".to_string())]
                .into_iter()
                .collect(),
        );
        let files = prefetch_files(&fetcher, "acme/widgets", &plan(&["src/lib.rs", "gone.rs"])).await;
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].key, "acme/widgets/src/lib.rs");
        assert!(files[0].content.is_some());
        assert!(files[1].content.is_none());
    }

    #[test]
    fn compose_renders_header_and_sections() {
        let files = vec![PrefetchedFile {
            key: "r/a.rs".into(),
            path: "a.rs".into(),
            content: Some("fn a() {}".into()),
        }];
        let block = compose_injection(&cfg(), &files);
        assert!(block.text.starts_with("[PRE-LOADED FILES]"));
        assert!(block.text.contains("[FILE: a.rs]\nfn a() {}"));
        assert_eq!(block.loaded, 1);
    }

    #[test]
    fn oversize_file_gets_truncation_marker() {
        let big = "x".repeat(9_000);
        let files = vec![PrefetchedFile {
            key: "r/big.md".into(),
            path: "big.md".into(),
            content: Some(big),
        }];
        let block = compose_injection(&cfg(), &files);
        assert!(block.text.contains("... [truncated, 9000 chars total]"));
    }

    #[test]
    fn binary_and_empty_files_are_skipped() {
        let mut binary = String::from("PK");
        for _ in 0..100 {
            binary.push('\u{1}');
        }
        let files = vec![
            PrefetchedFile {
                key: "r/blob.bin".into(),
                path: "blob.bin".into(),
                content: Some(binary),
            },
            PrefetchedFile {
                key: "r/empty.txt".into(),
                path: "empty.txt".into(),
                content: Some(String::new()),
            },
        ];
        let block = compose_injection(&cfg(), &files);
        assert_eq!(block.loaded, 0);
        assert_eq!(block.skipped, 2);
        assert!(block.text.is_empty());
    }

    #[test]
    fn total_budget_skips_overflowing_files() {
        let mut cfg = cfg();
        cfg.total_injection_cap = 300;
        let files: Vec<PrefetchedFile> = (0..4)
            .map(|i| PrefetchedFile {
                key: format!("r/f{i}.rs"),
                path: format!("f{i}.rs"),
                content: Some("y".repeat(120)),
            })
            .collect();
        let block = compose_injection(&cfg, &files);
        assert!(block.loaded < 4);
        assert!(block.loaded >= 1);
        assert!(block.skipped >= 1);
    }
}
