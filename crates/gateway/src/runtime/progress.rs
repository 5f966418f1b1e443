//! Human-readable status lines for the live progress message.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;

use dr_checkpoint::TaskPhase;
use dr_domain::StructuredPlan;

/// Context cap for the tool suffix (`Fetching: example.com/api…`).
const CONTEXT_CHARS: usize = 40;

/// Everything the formatter needs for one status line.
pub struct ProgressView<'a> {
    pub phase: TaskPhase,
    pub iterations: u32,
    pub tools_used: usize,
    pub start_time: DateTime<Utc>,
    pub current_tool: Option<&'a str>,
    pub current_tool_args: Option<&'a str>,
    pub plan: Option<&'a StructuredPlan>,
    pub work_phase_start_iteration: u32,
    /// A verification retry is in flight; overrides everything else.
    pub verifying: bool,
}

pub fn format_status(view: &ProgressView<'_>, now: DateTime<Utc>) -> String {
    let elapsed = format_elapsed((now - view.start_time).num_seconds().max(0) as u64);

    if view.verifying {
        return format!("\u{23f3} \u{1f504} Verifying results\u{2026} ({elapsed})");
    }

    let emoji = phase_emoji(view.phase);

    if let Some(tool) = view.current_tool {
        let verb = humanize_tool(tool);
        let suffix = view
            .current_tool_args
            .and_then(|args| tool_context(tool, args))
            .map(|ctx| format!(": {ctx}"))
            .unwrap_or_default();
        return format!("\u{23f3} {emoji} {verb}{suffix} ({elapsed})");
    }

    let label = phase_label(view.phase);
    let step = view.plan.and_then(|plan| step_estimate(view, plan));
    let step_part = match step {
        Some((m, n, descr)) => match descr {
            Some(d) => format!(" [step {m}/{n}: {d}]"),
            None => format!(" [step {m}/{n}]"),
        },
        None => String::new(),
    };

    format!(
        "\u{23f3} {emoji} {label}{step_part} (iter {}, {} tools, {elapsed})",
        view.iterations, view.tools_used
    )
}

fn phase_emoji(phase: TaskPhase) -> &'static str {
    match phase {
        TaskPhase::Plan => "\u{1f4cb}",
        TaskPhase::Work => "\u{1f527}",
        TaskPhase::Review => "\u{1f50d}",
    }
}

fn phase_label(phase: TaskPhase) -> &'static str {
    match phase {
        TaskPhase::Plan => "Planning",
        TaskPhase::Work => "Working",
        TaskPhase::Review => "Reviewing",
    }
}

/// Estimate the current plan step from work-phase progress. The expected
/// iteration count is two per step; the estimate never leaves `[1, steps]`.
fn step_estimate(
    view: &ProgressView<'_>,
    plan: &StructuredPlan,
) -> Option<(usize, usize, Option<String>)> {
    let steps = plan.step_count();
    if steps == 0 || view.phase != TaskPhase::Work {
        return None;
    }
    let work_iters = view.iterations.saturating_sub(view.work_phase_start_iteration) as f64;
    let expected = (steps * 2) as f64;
    let step = ((work_iters / expected) * steps as f64).ceil() as usize;
    let step = step.clamp(1, steps);

    let descr = plan.steps[step - 1]
        .description
        .chars()
        .take(48)
        .collect::<String>();
    let descr = (!descr.is_empty()).then_some(descr);
    Some((step, steps, descr))
}

/// Tool id → verb phrase. Unknown tools fall back to de-underscored names.
pub fn humanize_tool(name: &str) -> String {
    match name {
        "fetch_url" => "Fetching".into(),
        "web_search" => "Searching".into(),
        "get_weather" => "Checking weather".into(),
        "get_crypto" => "Checking prices".into(),
        "get_currency" => "Converting currency".into(),
        "get_news" => "Reading news".into(),
        "geolocate" => "Locating".into(),
        "github_read_file" => "Reading".into(),
        "github_list_dir" => "Listing".into(),
        "lookup_metadata" => "Looking up".into(),
        "render_chart" => "Rendering chart".into(),
        "run_command" => "Running".into(),
        "create_pull_request" => "Opening PR".into(),
        other => {
            let spaced = other.replace('_', " ");
            let mut chars = spaced.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => spaced,
            }
        }
    }
}

/// Pull the most telling detail out of a tool's arguments: a file path, a
/// URL's host+path, the first command line, a query, or a PR title.
pub fn tool_context(tool: &str, args_json: &str) -> Option<String> {
    let args: Value = serde_json::from_str(args_json).ok()?;

    let raw = match tool {
        "github_read_file" | "github_list_dir" => str_arg(&args, "path"),
        "fetch_url" | "lookup_metadata" => str_arg(&args, "url")
            .or_else(|| str_arg(&args, "target"))
            .map(|u| host_and_path(&u)),
        "run_command" => {
            str_arg(&args, "command").and_then(|c| c.lines().next().map(String::from))
        }
        "web_search" | "get_news" => str_arg(&args, "query").or_else(|| str_arg(&args, "topic")),
        "create_pull_request" => str_arg(&args, "title"),
        _ => str_arg(&args, "location")
            .or_else(|| str_arg(&args, "place"))
            .or_else(|| str_arg(&args, "symbol")),
    }?;

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(clip(trimmed, CONTEXT_CHARS))
}

fn str_arg(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(Value::as_str).map(String::from)
}

/// `https://example.com/a/b?q=1` → `example.com/a/b`.
fn host_and_path(url: &str) -> String {
    let no_scheme = url.split("://").nth(1).unwrap_or(url);
    no_scheme
        .split(['?', '#'])
        .next()
        .unwrap_or(no_scheme)
        .trim_end_matches('/')
        .to_string()
}

fn clip(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let clipped: String = text.chars().take(max).collect();
    format!("{clipped}\u{2026}")
}

/// `42s` under a minute, else `3m` or `3m20s`.
pub fn format_elapsed(total_secs: u64) -> String {
    if total_secs < 60 {
        return format!("{total_secs}s");
    }
    let minutes = total_secs / 60;
    let secs = total_secs % 60;
    if secs == 0 {
        format!("{minutes}m")
    } else {
        format!("{minutes}m{secs}s")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Throttle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Rate-limits front-end edits. A zero last-emit always passes, so the
/// first update goes out immediately.
pub struct ProgressThrottle {
    interval_secs: i64,
    last_emit: Mutex<i64>,
}

impl ProgressThrottle {
    pub fn new(interval_secs: u64) -> Self {
        Self {
            interval_secs: interval_secs as i64,
            last_emit: Mutex::new(0),
        }
    }

    pub fn should_emit(&self, now: DateTime<Utc>) -> bool {
        let mut last = self.last_emit.lock();
        let now_secs = now.timestamp();
        if *last == 0 || now_secs - *last >= self.interval_secs {
            *last = now_secs;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use dr_domain::PlanStep;

    fn view(phase: TaskPhase) -> ProgressView<'static> {
        ProgressView {
            phase,
            iterations: 3,
            tools_used: 2,
            start_time: Utc::now(),
            current_tool: None,
            current_tool_args: None,
            plan: None,
            work_phase_start_iteration: 1,
            verifying: false,
        }
    }

    #[test]
    fn verifying_overrides_everything() {
        let mut v = view(TaskPhase::Work);
        v.verifying = true;
        v.current_tool = Some("fetch_url");
        let line = format_status(&v, v.start_time + Duration::seconds(65));
        assert_eq!(line, "\u{23f3} \u{1f504} Verifying results\u{2026} (1m5s)");
    }

    #[test]
    fn tool_line_includes_context() {
        let mut v = view(TaskPhase::Work);
        v.current_tool = Some("fetch_url");
        v.current_tool_args = Some(r#"{"url":"https://example.com/api/data?key=1"}"#);
        let line = format_status(&v, v.start_time + Duration::seconds(5));
        assert_eq!(line, "\u{23f3} \u{1f527} Fetching: example.com/api/data (5s)");
    }

    #[test]
    fn phase_line_with_counters() {
        let v = view(TaskPhase::Plan);
        let line = format_status(&v, v.start_time + Duration::seconds(42));
        assert_eq!(line, "\u{23f3} \u{1f4cb} Planning (iter 3, 2 tools, 42s)");
    }

    #[test]
    fn step_estimate_clamps_to_plan_bounds() {
        let plan = StructuredPlan {
            steps: (0..4)
                .map(|i| PlanStep {
                    action: "do".into(),
                    files: vec![],
                    description: format!("step number {i}"),
                })
                .collect(),
        };
        let mut v = view(TaskPhase::Work);
        v.plan = Some(&plan);

        v.iterations = 1;
        v.work_phase_start_iteration = 1;
        let (m, n, _) = step_estimate(&v, &plan).unwrap();
        assert_eq!((m, n), (1, 4));

        v.iterations = 100;
        let (m, _, _) = step_estimate(&v, &plan).unwrap();
        assert_eq!(m, 4);
    }

    #[test]
    fn humanize_falls_back_to_underscores() {
        assert_eq!(humanize_tool("get_weather"), "Checking weather");
        assert_eq!(humanize_tool("scan_dependencies"), "Scan dependencies");
    }

    #[test]
    fn tool_context_extracts_per_tool() {
        assert_eq!(
            tool_context("run_command", r#"{"command":"ls -la\ncat x"}"#).as_deref(),
            Some("ls -la")
        );
        assert_eq!(
            tool_context("web_search", r#"{"query":"rust async traits"}"#).as_deref(),
            Some("rust async traits")
        );
        assert_eq!(
            tool_context("github_read_file", r#"{"repo":"a/b","path":"src/lib.rs"}"#).as_deref(),
            Some("src/lib.rs")
        );
        assert!(tool_context("get_weather", "not json").is_none());
    }

    #[test]
    fn long_context_is_clipped() {
        let args = format!(r#"{{"query":"{}"}}"#, "q".repeat(60));
        let ctx = tool_context("web_search", &args).unwrap();
        assert_eq!(ctx.chars().count(), 41); // 40 + ellipsis
        assert!(ctx.ends_with('\u{2026}'));
    }

    #[test]
    fn elapsed_rendering() {
        assert_eq!(format_elapsed(0), "0s");
        assert_eq!(format_elapsed(59), "59s");
        assert_eq!(format_elapsed(60), "1m");
        assert_eq!(format_elapsed(200), "3m20s");
    }

    #[test]
    fn throttle_gates_by_interval() {
        let throttle = ProgressThrottle::new(15);
        let t0 = Utc::now();
        assert!(throttle.should_emit(t0));
        assert!(!throttle.should_emit(t0 + Duration::seconds(5)));
        assert!(throttle.should_emit(t0 + Duration::seconds(16)));
    }
}
