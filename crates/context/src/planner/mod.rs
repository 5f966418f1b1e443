//! Structured planning: the planning-phase prompt, the JSON plan parser,
//! and (in submodules) file/repo extraction and context injection.

pub mod files;
pub mod injection;

pub use injection::{FileFetcher, InjectionBlock};

use dr_domain::config::PlannerConfig;
use dr_domain::trace::TraceEvent;
use dr_domain::{PlanStep, StructuredPlan};
use serde_json::Value;

/// Appended to the system prompt for the single planning iteration.
pub const PLANNING_PROMPT: &str = "\n\n[PLANNING PHASE] Before doing anything else, output a \
single JSON code block of this exact shape:\n\
```json\n{\"steps\":[{\"action\":\"...\",\"files\":[\"...\"],\"description\":\"...\"}]}\n```\n\
Use 3-8 steps. List every file you expect to read under \"files\". \
After the code block, proceed immediately to execution without waiting \
for confirmation.";

/// Parse a structured plan out of a model response.
///
/// Tries, in order: the first fenced code block, the first `{"steps": ...}`
/// object in the raw text, and finally a synthesized single-step plan from
/// any file paths found in the prose. Returns `None` when no usable step
/// survives normalization.
pub fn parse_plan(text: &str, cfg: &PlannerConfig) -> Option<StructuredPlan> {
    if let Some(fenced) = first_code_fence(text) {
        if let Ok(v) = serde_json::from_str::<Value>(&fenced) {
            if let Some(plan) = normalize(&v) {
                trace(&plan, false);
                return Some(plan);
            }
        }
    }

    if let Some(inline) = first_steps_object(text) {
        if let Ok(v) = serde_json::from_str::<Value>(&inline) {
            if let Some(plan) = normalize(&v) {
                trace(&plan, false);
                return Some(plan);
            }
        }
    }

    let paths = files::extract_file_paths(text, cfg);
    if paths.is_empty() {
        return None;
    }
    let plan = StructuredPlan {
        steps: vec![PlanStep {
            action: "analyze".into(),
            files: paths,
            description: "Work with the files referenced in the response".into(),
        }],
    };
    trace(&plan, true);
    Some(plan)
}

fn trace(plan: &StructuredPlan, fallback: bool) {
    TraceEvent::PlanParsed {
        steps: plan.step_count(),
        files: plan.referenced_files().len(),
        fallback,
    }
    .emit();
}

/// Content of the first ``` fence, tolerating a language tag.
fn first_code_fence(text: &str) -> Option<String> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    // Skip the language tag line, if any.
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim().to_string())
}

/// The first balanced `{...}` object starting at a `{"steps"` key.
fn first_steps_object(text: &str) -> Option<String> {
    static STEPS_KEY: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let key = STEPS_KEY
        .get_or_init(|| regex::Regex::new(r#"\{\s*"steps"\s*:"#).expect("static regex"));
    let start = key.find(text)?.start();
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + offset + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Normalize a parsed value into a plan: trim strings, default a missing
/// action to "unknown", skip non-string file entries, and drop steps with
/// neither a description nor files.
fn normalize(value: &Value) -> Option<StructuredPlan> {
    let raw_steps = value.get("steps")?.as_array()?;

    let steps: Vec<PlanStep> = raw_steps
        .iter()
        .filter_map(|s| {
            let action = s
                .get("action")
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .unwrap_or("unknown")
                .to_string();
            let files: Vec<String> = s
                .get("files")
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|f| f.as_str())
                        .map(str::trim)
                        .filter(|f| !f.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default();
            let description = s
                .get("description")
                .and_then(|v| v.as_str())
                .map(str::trim)
                .unwrap_or("")
                .to_string();

            if description.is_empty() && files.is_empty() {
                return None;
            }
            Some(PlanStep {
                action,
                files,
                description,
            })
        })
        .collect();

    if steps.is_empty() {
        return None;
    }
    Some(StructuredPlan { steps })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> PlannerConfig {
        PlannerConfig::default()
    }

    #[test]
    fn parses_fenced_plan() {
        let text = "Here is my plan:\n```json\n{\"steps\":[{\"action\":\"read\",\
                    \"files\":[\"src/lib.rs\"],\"description\":\"survey\"}]}\n```\nNow executing.";
        let plan = parse_plan(text, &cfg()).unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].action, "read");
        assert_eq!(plan.steps[0].files, vec!["src/lib.rs"]);
    }

    #[test]
    fn parses_inline_steps_object() {
        let text = r#"Sure. {"steps": [{"action": "fetch", "files": [], "description": "get the data"}]} and then I'll continue."#;
        let plan = parse_plan(text, &cfg()).unwrap();
        assert_eq!(plan.steps[0].description, "get the data");
    }

    #[test]
    fn inline_object_survives_braces_in_strings() {
        let text = r#"{"steps": [{"action": "note", "files": [], "description": "handle {braces} and \"quotes\""}]}"#;
        let plan = parse_plan(text, &cfg()).unwrap();
        assert!(plan.steps[0].description.contains("{braces}"));
    }

    #[test]
    fn fallback_synthesizes_from_paths() {
        let text = "I'll start by checking src/config/loader.rs and then the tests.";
        let plan = parse_plan(text, &cfg()).unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].files, vec!["src/config/loader.rs"]);
    }

    #[test]
    fn no_plan_from_plain_prose() {
        assert!(parse_plan("Sounds good, working on it.", &cfg()).is_none());
    }

    #[test]
    fn normalization_fills_defaults_and_drops_empty_steps() {
        let text = r#"```
{"steps":[
  {"files":["a.rs"],"description":""},
  {"action":"  ","files":[],"description":"   "},
  {"action":"do","files":[123, " b.rs ", ""],"description":"mixed"}
]}
```"#;
        let plan = parse_plan(text, &cfg()).unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].action, "unknown");
        assert_eq!(plan.steps[1].files, vec!["b.rs"]);
    }

    #[test]
    fn malformed_fence_falls_through_to_inline() {
        let text = "```\nnot json at all\n```\n{\"steps\":[{\"action\":\"x\",\"files\":[],\"description\":\"real\"}]}";
        let plan = parse_plan(text, &cfg()).unwrap();
        assert_eq!(plan.steps[0].description, "real");
    }
}
