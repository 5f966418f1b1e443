//! Runtime: per-user task controls, the processor loop, progress
//! formatting, and the emitter gateway.

pub mod emitter;
pub mod processor;
pub mod progress;

pub use emitter::{HttpEmitter, NullEmitter, ProgressEmitter, RecordingEmitter};
pub use processor::{process_task, TaskLaunch};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use dr_checkpoint::{TaskState, TaskStatus, LATEST_SLOT};
use dr_domain::error::Result;
use dr_domain::{Error, ToolCall};
use dr_tools::ToolExecutor;

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task control
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The shared handle between one user's processor loop and the control
/// API. Cancellation and steering are signalled here and observed by the
/// loop at iteration boundaries; the snapshot serves `/status` reads
/// without touching the store.
#[derive(Default)]
pub struct TaskControl {
    cancelled: AtomicBool,
    running: AtomicBool,
    steering: Mutex<Vec<String>>,
    snapshot: RwLock<Option<TaskState>>,
}

impl TaskControl {
    /// Claim the single-runner lock. Fails when a loop is already active,
    /// which keeps a resume handler from spawning a second loop.
    pub fn try_start(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn finish_run(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Reset the cancel flag for a fresh run of the same user.
    pub fn reset_for_run(&self) {
        self.cancelled.store(false, Ordering::Release);
        self.steering.lock().clear();
    }

    /// Queue a steering instruction; returns the queue depth.
    pub fn push_steering(&self, instruction: String) -> usize {
        let mut queue = self.steering.lock();
        queue.push(instruction);
        queue.len()
    }

    pub fn drain_steering(&self) -> Vec<String> {
        std::mem::take(&mut *self.steering.lock())
    }

    pub fn update_snapshot(&self, state: &TaskState) {
        *self.snapshot.write() = Some(state.clone());
    }

    pub fn snapshot(&self) -> Option<TaskState> {
        self.snapshot.read().clone()
    }
}

/// One [`TaskControl`] per user id.
#[derive(Default)]
pub struct ControlMap {
    controls: Mutex<HashMap<String, Arc<TaskControl>>>,
}

impl ControlMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn control(&self, user_id: &str) -> Arc<TaskControl> {
        self.controls
            .lock()
            .entry(user_id.to_string())
            .or_default()
            .clone()
    }

    /// The control if the user has ever had one (no allocation on reads).
    pub fn existing(&self, user_id: &str) -> Option<Arc<TaskControl>> {
        self.controls.lock().get(user_id).cloned()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Default executor / fetcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Placeholder executor for deployments that haven't wired a tool backend.
/// Every call reports unavailability as a tool error, so the model can
/// adjust instead of the task dying.
pub struct UnconfiguredExecutor;

#[async_trait::async_trait]
impl ToolExecutor for UnconfiguredExecutor {
    async fn execute(&self, call: &ToolCall) -> Result<String> {
        Err(Error::Tool(format!(
            "tool '{}' is not wired to a backend on this deployment",
            call.name
        )))
    }
}

/// Planner file pre-fetch routed through the regular tool surface, so the
/// same `github_read_file` backend serves both paths.
pub struct ToolFileFetcher {
    executor: Arc<dyn ToolExecutor>,
}

impl ToolFileFetcher {
    pub fn new(executor: Arc<dyn ToolExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait::async_trait]
impl dr_context::FileFetcher for ToolFileFetcher {
    async fn fetch(&self, repo: &str, path: &str) -> Option<String> {
        let call = ToolCall {
            id: format!("prefetch-{}", uuid::Uuid::new_v4()),
            name: "github_read_file".into(),
            arguments: serde_json::json!({ "repo": repo, "path": path }).to_string(),
        };
        match self.executor.execute(&call).await {
            Ok(content) if !content.starts_with("Error:") => Some(content),
            _ => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Startup resume
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Restart every task the previous process left mid-flight, bounded by the
/// per-tier resume caps.
pub async fn resume_interrupted_tasks(app: AppState) {
    let users = match app.store.users().await {
        Ok(users) => users,
        Err(e) => {
            tracing::warn!(error = %e, "checkpoint scan failed; nothing resumed");
            return;
        }
    };

    for user_id in users {
        let latest = match app.store.get(&user_id, LATEST_SLOT).await {
            Ok(Some(state)) => state,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(%user_id, error = %e, "unreadable latest checkpoint");
                continue;
            }
        };

        if latest.status != TaskStatus::Processing || !latest.auto_resume {
            continue;
        }

        let cap = if app.catalog.is_free(&latest.model_alias) {
            app.config.tasks.resume_cap_free
        } else {
            app.config.tasks.resume_cap_paid
        };

        if latest.resume_count >= cap {
            let mut failed = latest;
            failed.status = TaskStatus::Failed;
            failed.error = Some(format!("auto-resume cap ({cap}) exhausted"));
            failed.touch();
            let chat_id = failed.chat_id.clone();
            let _ = app.store.put(&user_id, LATEST_SLOT, &failed).await;
            app.emitter
                .send_message(
                    &chat_id,
                    &format!(
                        "\u{274c} Task could not be resumed: restarted {cap} times without \
                         finishing. It is stopped; the latest checkpoint is kept."
                    ),
                    None,
                )
                .await;
            continue;
        }

        let mut resumed = latest;
        resumed.resume_count += 1;
        tracing::info!(
            %user_id,
            task_id = %resumed.task_id,
            resume_count = resumed.resume_count,
            "resuming interrupted task"
        );

        let app = app.clone();
        tokio::spawn(async move {
            process_task(app, TaskLaunch::resumed(resumed)).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_single_runner_lock() {
        let control = TaskControl::default();
        assert!(control.try_start());
        assert!(!control.try_start());
        control.finish_run();
        assert!(control.try_start());
    }

    #[test]
    fn steering_queue_drains_once() {
        let control = TaskControl::default();
        assert_eq!(control.push_steering("go left".into()), 1);
        assert_eq!(control.push_steering("go right".into()), 2);
        assert_eq!(control.drain_steering().len(), 2);
        assert!(control.drain_steering().is_empty());
    }

    #[test]
    fn control_map_returns_same_handle() {
        let map = ControlMap::new();
        let a = map.control("u1");
        let b = map.control("u1");
        a.cancel();
        assert!(b.is_cancelled());
        assert!(map.existing("u2").is_none());
    }

    #[tokio::test]
    async fn unconfigured_executor_reports_tool_error() {
        let exec = UnconfiguredExecutor;
        let err = exec
            .execute(&ToolCall {
                id: "c".into(),
                name: "get_weather".into(),
                arguments: "{}".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Tool(_)));
    }
}
