//! Speculative tool execution during model streaming.
//!
//! As soon as the stream parser completes one tool call's arguments, a safe
//! tool can start running — by the time the model finishes its whole
//! response, the result is often already there. Only whitelisted tools are
//! eligible; everything runs bounded and timeout-raced, and failures become
//! `Error: ...` result strings instead of escaping.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use dr_domain::trace::TraceEvent;
use dr_domain::ToolCall;

use crate::registry::ToolRegistry;
use crate::ToolExecutor;

pub struct SpeculativeExecutor {
    registry: Arc<ToolRegistry>,
    executor: Arc<dyn ToolExecutor>,
    max_concurrent: usize,
    timeout: Duration,
    tasks: Mutex<HashMap<String, JoinHandle<String>>>,
    /// Ids ever started this iteration (still tracked after take).
    seen: Mutex<std::collections::HashSet<String>>,
}

impl SpeculativeExecutor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        executor: Arc<dyn ToolExecutor>,
        max_concurrent: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            executor,
            max_concurrent,
            timeout,
            tasks: Mutex::new(HashMap::new()),
            seen: Mutex::new(std::collections::HashSet::new()),
        }
    }

    /// Called by the stream handler when one tool call's arguments are
    /// fully received. Ignores duplicates, unsafe tools, and anything past
    /// the concurrency bound.
    pub fn on_tool_call_ready(&self, call: &ToolCall) {
        if !self.seen.lock().insert(call.id.clone()) {
            return;
        }
        if !self.registry.is_safe(&call.name) {
            return;
        }
        {
            let tasks = self.tasks.lock();
            if tasks.len() >= self.max_concurrent {
                return;
            }
        }

        TraceEvent::SpeculativeStarted {
            tool_name: call.name.clone(),
            call_id: call.id.clone(),
        }
        .emit();

        let executor = self.executor.clone();
        let timeout = self.timeout;
        let call_id = call.id.clone();
        let call = call.clone();
        let handle = tokio::spawn(async move {
            match tokio::time::timeout(timeout, executor.execute(&call)).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => format!("Error: {e}"),
                Err(_) => format!("Error: tool timed out after {}s", timeout.as_secs()),
            }
        });

        self.tasks.lock().insert(call_id, handle);
    }

    /// Whether a speculative execution was started for this id.
    pub fn has(&self, call_id: &str) -> bool {
        self.tasks.lock().contains_key(call_id)
    }

    /// Claim the result for a call id, awaiting it if still in flight.
    /// Returns `None` if no speculative execution was started.
    pub async fn take_result(&self, call_id: &str) -> Option<String> {
        let handle = self.tasks.lock().remove(call_id)?;
        Some(match handle.await {
            Ok(result) => result,
            Err(e) => format!("Error: speculative task failed: {e}"),
        })
    }

    /// Drop unclaimed work between iterations. Unclaimed results came from
    /// calls the model never confirmed in its final response.
    pub fn clear(&self) {
        let mut tasks = self.tasks.lock();
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
        self.seen.lock().clear();
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dr_domain::config::ToolsConfig;
    use dr_domain::error::{Error, Result};

    struct ScriptedExecutor {
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl ToolExecutor for ScriptedExecutor {
        async fn execute(&self, call: &ToolCall) -> Result<String> {
            tokio::time::sleep(self.delay).await;
            match call.name.as_str() {
                "get_crypto" => Err(Error::Tool("exchange unreachable".into())),
                name => Ok(format!("{name} ok")),
            }
        }
    }

    fn executor(delay_ms: u64, max: usize, timeout_ms: u64) -> SpeculativeExecutor {
        SpeculativeExecutor::new(
            Arc::new(ToolRegistry::from_config(&ToolsConfig::default())),
            Arc::new(ScriptedExecutor {
                delay: Duration::from_millis(delay_ms),
            }),
            max,
            Duration::from_millis(timeout_ms),
        )
    }

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: "{}".into(),
        }
    }

    #[tokio::test]
    async fn safe_tool_runs_and_result_is_claimable() {
        let spec = executor(5, 5, 1_000);
        spec.on_tool_call_ready(&call("c1", "get_weather"));
        assert!(spec.has("c1"));
        assert_eq!(spec.take_result("c1").await.as_deref(), Some("get_weather ok"));
        assert!(!spec.has("c1"));
    }

    #[tokio::test]
    async fn mutating_tool_is_never_started() {
        let spec = executor(5, 5, 1_000);
        spec.on_tool_call_ready(&call("c1", "run_command"));
        assert!(!spec.has("c1"));
        assert!(spec.take_result("c1").await.is_none());
    }

    #[tokio::test]
    async fn duplicate_ids_start_once() {
        let spec = executor(5, 5, 1_000);
        spec.on_tool_call_ready(&call("c1", "get_weather"));
        spec.on_tool_call_ready(&call("c1", "get_weather"));
        assert_eq!(spec.in_flight(), 1);
    }

    #[tokio::test]
    async fn concurrency_bound_is_enforced() {
        let spec = executor(50, 2, 1_000);
        for i in 0..4 {
            spec.on_tool_call_ready(&call(&format!("c{i}"), "fetch_url"));
        }
        assert_eq!(spec.in_flight(), 2);
    }

    #[tokio::test]
    async fn failure_becomes_error_result() {
        let spec = executor(1, 5, 1_000);
        spec.on_tool_call_ready(&call("c1", "get_crypto"));
        let result = spec.take_result("c1").await.unwrap();
        assert!(result.starts_with("Error:"), "{result}");
    }

    #[tokio::test]
    async fn timeout_becomes_error_result() {
        let spec = executor(200, 5, 10);
        spec.on_tool_call_ready(&call("c1", "get_weather"));
        let result = spec.take_result("c1").await.unwrap();
        assert!(result.contains("timed out"), "{result}");
    }

    #[tokio::test]
    async fn clear_discards_unclaimed_work() {
        let spec = executor(100, 5, 1_000);
        spec.on_tool_call_ready(&call("c1", "get_weather"));
        spec.clear();
        assert_eq!(spec.in_flight(), 0);
        assert!(spec.take_result("c1").await.is_none());
        // After clear, the same id may start again next iteration.
        spec.on_tool_call_ready(&call("c1", "get_weather"));
        assert!(spec.has("c1"));
    }
}
