//! The per-user task processor: drives the plan → work → review loop,
//! calls the model (streaming when possible, with speculative tool
//! execution), dispatches tool batches, persists a checkpoint at every
//! iteration boundary, and services cancel/steer signals.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::StreamExt;
use tracing::Instrument;

use dr_checkpoint::{TaskPhase, TaskState, TaskStatus, LATEST_SLOT};
use dr_context::compress::compress;
use dr_context::planner::{self, files, injection};
use dr_domain::stream::StreamEvent;
use dr_domain::trace::TraceEvent;
use dr_domain::{Error, Message, Role, ToolCall};
use dr_providers::traits::{response_from_stream_parts, ChatRequest, ChatResponse};
use dr_providers::{ModelClient, ReasoningLevel, ResponseFormat};
use dr_tools::cache::signature;
use dr_tools::{dispatch_batch, DispatchOptions, SpeculativeExecutor, ToolCache};

use super::progress::{format_status, ProgressThrottle, ProgressView};
use super::TaskControl;
use crate::state::AppState;

/// Injected as a user message for the single review iteration.
pub const REVIEW_PROMPT: &str = "[REVIEW PHASE] Re-read the conversation and verify your \
answer against the tool evidence above. Correct anything wrong, then give the final \
answer. Do not call tools.";

const OVERRIDE_PREFIX: &str = "[USER OVERRIDE]";

const EMPTY_NUDGE: &str = "[SYSTEM] Your last response was empty after a tool call. \
Please produce the final answer now.";

/// How many trailing tool results feed the fallback summary.
const FALLBACK_RESULTS: usize = 5;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Launch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A task plus its non-persisted request options.
pub struct TaskLaunch {
    pub state: TaskState,
    pub reasoning_level: Option<ReasoningLevel>,
    pub response_format: Option<ResponseFormat>,
    /// Per-provider credential strings, forwarded opaquely to the tool
    /// backend when one is wired. Never persisted.
    pub credentials: std::collections::HashMap<String, String>,
}

impl TaskLaunch {
    pub fn new(state: TaskState) -> Self {
        Self {
            state,
            reasoning_level: None,
            response_format: None,
            credentials: std::collections::HashMap::new(),
        }
    }

    /// Resumed tasks fall back to default options; only [`TaskState`]
    /// survives a restart.
    pub fn resumed(state: TaskState) -> Self {
        Self::new(state)
    }
}

/// Per-run recovery bookkeeping, reset between tasks.
#[derive(Default)]
struct RecoveryFlags {
    /// Consecutive empty responses seen.
    empty_attempts: u32,
    /// A recovery retry is in flight; success finalizes without review.
    recovering: bool,
    sunset_attempts: u32,
    transient_attempts: u32,
    /// Set to 2 during recovery for more aggressive compression.
    budget_divisor: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one task to a terminal state. Holds the user's single-runner lock
/// for the whole run; a second concurrent launch for the same user is
/// dropped (the caller resurfaces it as "busy").
pub async fn process_task(app: AppState, launch: TaskLaunch) {
    let user_id = launch.state.user_id.clone();
    let task_id = launch.state.task_id.clone();
    let control = app.controls.control(&user_id);

    if !control.try_start() {
        tracing::warn!(%user_id, %task_id, "processor already running; launch dropped");
        return;
    }
    control.reset_for_run();

    let span = tracing::info_span!("task", %task_id, user_id = %user_id);
    let outcome = run_loop(&app, &control, launch).instrument(span).await;
    control.finish_run();

    // Only programming errors and unusable stores land here; everything
    // recoverable is handled inside the loop.
    if let Err(e) = outcome {
        tracing::error!(%user_id, %task_id, error = %e, "task loop escaped with error");
        if let Ok(Some(mut state)) = app.store.get(&user_id, LATEST_SLOT).await {
            if !state.status.is_terminal() {
                state.status = TaskStatus::Failed;
                state.error = Some(e.to_string());
                state.touch();
                control.update_snapshot(&state);
                let _ = app.store.put(&user_id, LATEST_SLOT, &state).await;
                emit_failure(&app, &state).await;
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The iteration loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_loop(
    app: &AppState,
    control: &TaskControl,
    launch: TaskLaunch,
) -> Result<(), Error> {
    let TaskLaunch {
        state: mut task,
        reasoning_level,
        response_format,
        credentials: _,
    } = launch;

    let cfg = app.config.clone();
    let cache = ToolCache::new();
    let speculative = SpeculativeExecutor::new(
        app.registry.clone(),
        app.executor.clone(),
        cfg.tools.speculative_max_concurrent,
        Duration::from_secs(cfg.tools.speculative_timeout_secs),
    );
    let throttle = ProgressThrottle::new(cfg.tasks.progress_throttle_secs);
    let mut flags = RecoveryFlags {
        budget_divisor: 1,
        ..Default::default()
    };

    emit_progress(app, &mut task, &throttle, None, false, true).await;
    control.update_snapshot(&task);

    loop {
        // ── Cancellation: the cancel handler already told the user. ──
        if control.is_cancelled() {
            return Ok(());
        }

        // ── Steering drains into the history as user overrides. ──────
        for instruction in control.drain_steering() {
            task.messages
                .push(Message::user(format!("{OVERRIDE_PREFIX} {instruction}")));
        }

        // ── Iteration cap. ────────────────────────────────────────────
        if task.iterations >= cfg.tasks.max_iterations {
            let result = format!(
                "Task hit iteration limit ({}). Send 'continue' to keep going.",
                cfg.tasks.max_iterations
            );
            finalize(app, control, &mut task, result).await;
            return Ok(());
        }

        // ── Compress to the model's window. ──────────────────────────
        let max_context = app.catalog.max_context(&task.model_alias);
        let budget =
            ((max_context as f64 * cfg.compressor.budget_fraction) as usize) / flags.budget_divisor;
        task.messages = compress(&task.messages, budget, cfg.compressor.min_tail);

        // ── Call the model. ──────────────────────────────────────────
        let request = build_request(app, &task, reasoning_level, response_format);
        let outcome = call_model(app, &mut task, &request, &speculative, &throttle).await;

        if control.is_cancelled() {
            // Whatever the call produced is discarded.
            return Ok(());
        }

        let response = match outcome {
            Ok(response) => {
                flags.transient_attempts = 0;
                flags.sunset_attempts = 0;
                response
            }
            Err(Error::ModelSunset { model }) => {
                flags.sunset_attempts += 1;
                if flags.sunset_attempts <= cfg.tasks.sunset_retries {
                    continue;
                }
                flags.sunset_attempts = 0;
                if rotate_model(app, &mut task, "sunset") {
                    continue;
                }
                fail(
                    app,
                    control,
                    &mut task,
                    format!("model '{model}' is sunset and no rotation target is configured"),
                )
                .await;
                return Ok(());
            }
            Err(e) if e.is_retryable() => {
                flags.transient_attempts += 1;
                if flags.transient_attempts <= cfg.models.max_retries {
                    tracing::warn!(error = %e, attempt = flags.transient_attempts, "transient model failure; retrying");
                    continue;
                }
                flags.transient_attempts = 0;
                // Exhausted retries surface as an empty response.
                ChatResponse::default()
            }
            Err(e) => {
                fail(app, control, &mut task, e.to_string()).await;
                return Ok(());
            }
        };

        // ── Iteration boundary: bookkeeping + checkpoint. ────────────
        task.iterations += 1;
        task.touch();
        checkpoint(app, control, &task).await;

        // ── Leaving the plan phase: exactly one planning call. ───────
        // The planning prompt tells the model to plan and then proceed in
        // the same turn, so the first response — tool calls included —
        // ends the plan phase.
        let leaving_plan = task.phase == TaskPhase::Plan;
        if leaving_plan {
            if task.structured_plan.is_none() && !response.content.is_empty() {
                task.structured_plan = planner::parse_plan(&response.content, &cfg.planner);
            }
            inject_planned_files(app, &mut task).await;
            task.phase = TaskPhase::Work;
            task.work_phase_start_iteration = task.iterations;
        }

        // ── Tool calls: dispatch and feed results back. ──────────────
        if !response.tool_calls.is_empty() {
            for call in &response.tool_calls {
                task.record_tool(&call.name, signature(&call.name, &call.arguments));
            }
            task.messages.push(Message::assistant_with_tools(
                response.content.clone(),
                response.tool_calls.clone(),
            ));

            let first = &response.tool_calls[0];
            emit_progress(
                app,
                &mut task,
                &throttle,
                Some((first.name.as_str(), first.arguments.as_str())),
                false,
                false,
            )
            .await;

            let opts = DispatchOptions {
                parallel_supported: app.catalog.supports_parallel_tools(&task.model_alias),
                max_context,
                result_context_fraction: cfg.tools.result_context_fraction,
                result_char_ceiling: cfg.tools.result_char_ceiling,
                execution_timeout: Duration::from_secs(cfg.tools.execution_timeout_secs),
            };
            let results = dispatch_batch(
                &response.tool_calls,
                &speculative,
                &cache,
                &app.registry,
                app.executor.clone(),
                &opts,
            )
            .await;

            if control.is_cancelled() {
                // In-flight work ran to completion; its results are dropped.
                return Ok(());
            }

            task.messages.extend(results);
            speculative.clear();
            continue;
        }

        // ── Text response: transition or terminate. ──────────────────
        if !response.content.trim().is_empty() {
            task.messages.push(Message::assistant(response.content.clone()));

            if leaving_plan && task.structured_plan.is_some() && !flags.recovering {
                // The model produced a plan; the next iterations execute it.
                speculative.clear();
                emit_progress(app, &mut task, &throttle, None, false, true).await;
                continue;
            }
            // Without a plan, the planning response is already the answer.

            if task.phase == TaskPhase::Work && !task.tools_used.is_empty() && !flags.recovering {
                task.phase = TaskPhase::Review;
                task.messages.push(Message::user(REVIEW_PROMPT));
                speculative.clear();
                emit_progress(app, &mut task, &throttle, None, false, true).await;
                continue;
            }

            finalize(app, control, &mut task, response.content).await;
            return Ok(());
        }

        // ── Empty response: recovery. ────────────────────────────────
        flags.empty_attempts += 1;
        if flags.empty_attempts <= cfg.tasks.empty_response_retries {
            flags.budget_divisor = 2;
            flags.recovering = true;
            task.messages.push(Message::user(EMPTY_NUDGE));
            emit_progress(app, &mut task, &throttle, None, true, true).await;
            continue;
        }

        if app.catalog.is_free(&task.model_alias) && rotate_model(app, &mut task, "empty responses")
        {
            flags.empty_attempts = 0;
            continue;
        }

        let fallback = fallback_summary(&task);
        finalize(app, control, &mut task, fallback).await;
        return Ok(());
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model invocation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn build_request(
    app: &AppState,
    task: &TaskState,
    reasoning_level: Option<ReasoningLevel>,
    response_format: Option<ResponseFormat>,
) -> ChatRequest {
    let mut messages = task.messages.clone();

    // The plan phase carries the planning directive on the system prompt
    // for this call only; the persisted history stays clean.
    if task.phase == TaskPhase::Plan {
        if let Some(first) = messages.first_mut() {
            if first.role == Role::System {
                let text = first.content.extract_all_text();
                first.content =
                    dr_domain::MessageContent::Text(format!("{text}{}", planner::PLANNING_PROMPT));
            }
        }
    }

    let tools = if task.phase == TaskPhase::Review {
        Vec::new()
    } else {
        app.registry.schemas().to_vec()
    };
    let tool_choice = (!tools.is_empty()).then(|| "auto".to_string());

    ChatRequest {
        model: app.catalog.wire_model(&task.model_alias),
        messages,
        tools,
        tool_choice,
        temperature: Some(0.2),
        max_tokens: None,
        reasoning_level,
        response_format,
        cache_anchors: true,
    }
}

/// One model call, streamed when the endpoint allows it so safe tools can
/// start speculatively. The whole call is bounded by the configured
/// timeout; a timeout surfaces as a retryable error, not a dead task.
async fn call_model(
    app: &AppState,
    task: &mut TaskState,
    request: &ChatRequest,
    speculative: &SpeculativeExecutor,
    throttle: &ProgressThrottle,
) -> Result<ChatResponse, Error> {
    let client = app.catalog.client(&task.model_alias)?;
    let streaming = client.supports_streaming();
    let timeout = Duration::from_secs(app.config.tasks.model_call_timeout_secs);
    let started = Instant::now();

    let result = if streaming {
        match tokio::time::timeout(
            timeout,
            consume_stream(app, task, client.clone(), request, speculative, throttle),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "model call exceeded {}s",
                timeout.as_secs()
            ))),
        }
    } else {
        match tokio::time::timeout(timeout, client.chat(request)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "model call exceeded {}s",
                timeout.as_secs()
            ))),
        }
    };

    if let Ok(response) = &result {
        TraceEvent::ModelRequest {
            model: request.model.clone(),
            streaming,
            duration_ms: started.elapsed().as_millis() as u64,
            prompt_tokens: response.usage.as_ref().map(|u| u.prompt_tokens),
            completion_tokens: response.usage.as_ref().map(|u| u.completion_tokens),
        }
        .emit();
    }

    result
}

async fn consume_stream(
    app: &AppState,
    task: &mut TaskState,
    client: Arc<dyn ModelClient>,
    request: &ChatRequest,
    speculative: &SpeculativeExecutor,
    throttle: &ProgressThrottle,
) -> Result<ChatResponse, Error> {
    let mut stream = client.chat_stream(request).await?;

    let mut text = String::new();
    let mut calls: Vec<ToolCall> = Vec::new();
    let mut usage = None;
    let mut finish_reason = None;

    while let Some(event) = stream.next().await {
        match event? {
            StreamEvent::Token { text: chunk } => text.push_str(&chunk),
            StreamEvent::ToolCallStarted { .. } | StreamEvent::ToolCallDelta { .. } => {}
            StreamEvent::ToolCallFinished {
                id,
                name,
                arguments,
            } => {
                let call = ToolCall {
                    id,
                    name,
                    arguments,
                };
                // Safe tools start now, while the model is still talking.
                speculative.on_tool_call_ready(&call);
                emit_progress(
                    app,
                    task,
                    throttle,
                    Some((call.name.as_str(), call.arguments.as_str())),
                    false,
                    false,
                )
                .await;
                calls.push(call);
            }
            StreamEvent::Done {
                usage: u,
                finish_reason: reason,
            } => {
                usage = u;
                finish_reason = reason;
            }
            StreamEvent::Error { message } => {
                return Err(Error::Model {
                    model: request.model.clone(),
                    message,
                });
            }
        }
    }

    Ok(response_from_stream_parts(
        text,
        calls,
        usage,
        &request.model,
        finish_reason,
    ))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plan injection / rotation / fallback
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Pre-fetch every file the plan references and inject the resolved
/// contents as a ground-truth context block.
async fn inject_planned_files(app: &AppState, task: &mut TaskState) {
    let Some(plan) = task.structured_plan.clone() else {
        return;
    };
    if plan.referenced_files().is_empty() {
        return;
    }
    let Some(repo) = files::extract_repo_context(&task.messages) else {
        return;
    };

    let fetched = injection::prefetch_files(app.fetcher.as_ref(), &repo, &plan).await;
    let block = injection::compose_injection(&app.config.planner, &fetched);
    if !block.text.is_empty() {
        task.messages.push(Message::system(block.text));
    }
}

/// Switch to the next untried free-rotation model. Returns false when the
/// rotation list is exhausted.
fn rotate_model(app: &AppState, task: &mut TaskState, reason: &str) -> bool {
    let Some(next) = app.catalog.next_free_alias(&task.models_tried) else {
        return false;
    };
    TraceEvent::ModelRotation {
        from_model: task.model_alias.clone(),
        to_model: next.clone(),
        reason: reason.to_string(),
    }
    .emit();
    task.models_tried.insert(next.clone());
    task.model_alias = next;
    true
}

/// Last-resort answer when the model refuses to speak after tool use.
fn fallback_summary(task: &TaskState) -> String {
    let mut lines = vec![format!(
        "Based on [{} tool calls]:",
        task.tools_used.len()
    )];

    let recent: Vec<&Message> = task
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .rev()
        .take(FALLBACK_RESULTS)
        .collect();
    for msg in recent.into_iter().rev() {
        let text = msg.content.extract_all_text();
        let clipped: String = text.chars().take(200).collect();
        lines.push(format!("- {}", clipped.replace('\n', " ")));
    }

    lines.join("\n")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Terminal transitions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn checkpoint(app: &AppState, control: &TaskControl, task: &TaskState) {
    control.update_snapshot(task);
    if let Err(e) = app.store.put(&task.user_id, LATEST_SLOT, task).await {
        // Not fatal: the next boundary write retries implicitly.
        tracing::warn!(task_id = %task.task_id, error = %e, "checkpoint write failed");
    }
}

async fn finalize(app: &AppState, control: &TaskControl, task: &mut TaskState, result: String) {
    task.status = TaskStatus::Completed;
    task.result = Some(result.clone());
    task.touch();
    checkpoint(app, control, task).await;

    TraceEvent::TaskFinished {
        task_id: task.task_id.clone(),
        status: task.status.as_str().to_string(),
        iterations: task.iterations,
        tools_used: task.tools_used.len(),
    }
    .emit();

    if let Some(id) = task.status_message_id.take() {
        app.emitter.delete_message(&task.chat_id, id).await;
    }
    app.emitter.send_long_message(&task.chat_id, &result).await;
}

async fn fail(app: &AppState, control: &TaskControl, task: &mut TaskState, message: String) {
    task.status = TaskStatus::Failed;
    task.error = Some(message);
    task.touch();
    checkpoint(app, control, task).await;

    TraceEvent::TaskFinished {
        task_id: task.task_id.clone(),
        status: task.status.as_str().to_string(),
        iterations: task.iterations,
        tools_used: task.tools_used.len(),
    }
    .emit();

    emit_failure(app, task).await;
}

async fn emit_failure(app: &AppState, task: &TaskState) {
    let text = format!(
        "\u{274c} Task failed during the {} phase (iteration {}): {}. \
         The latest checkpoint is saved, so the task can be resumed.",
        task.phase.as_str(),
        task.iterations,
        task.error.as_deref().unwrap_or("unknown error"),
    );
    app.emitter.send_message(&task.chat_id, &text, None).await;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Progress
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn emit_progress(
    app: &AppState,
    task: &mut TaskState,
    throttle: &ProgressThrottle,
    current_tool: Option<(&str, &str)>,
    verifying: bool,
    force: bool,
) {
    let now = Utc::now();
    if !force && !throttle.should_emit(now) {
        return;
    }

    let view = ProgressView {
        phase: task.phase,
        iterations: task.iterations,
        tools_used: task.tools_used.len(),
        start_time: task.start_time,
        current_tool: current_tool.map(|(name, _)| name),
        current_tool_args: current_tool.map(|(_, args)| args),
        plan: task.structured_plan.as_ref(),
        work_phase_start_iteration: task.work_phase_start_iteration,
        verifying,
    };
    let line = format_status(&view, now);

    match task.status_message_id {
        Some(id) => app.emitter.edit_message(&task.chat_id, id, &line).await,
        None => {
            task.status_message_id = app.emitter.send_message(&task.chat_id, &line, None).await;
        }
    }
}
