//! Batch tool dispatch.
//!
//! A batch of tool calls resolves speculative → cache → executor per call.
//! The parallel path is taken only when the model advertises parallel tool
//! calls *and* every call in the batch is safe; one failure never cancels a
//! peer, and results always come back in the order of the spawning calls.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dr_domain::trace::TraceEvent;
use dr_domain::{Message, ToolCall};

use crate::cache::ToolCache;
use crate::registry::ToolRegistry;
use crate::speculative::SpeculativeExecutor;
use crate::ToolExecutor;

/// Characters per token, used to convert the context share into a
/// character budget for tool results.
const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Whether the current model supports parallel tool calls.
    pub parallel_supported: bool,
    /// Context window of the current model, in tokens.
    pub max_context: usize,
    /// Fraction of the context window one batch of results may occupy.
    pub result_context_fraction: f64,
    /// Absolute per-result character ceiling.
    pub result_char_ceiling: usize,
    /// Timeout for one non-speculative execution.
    pub execution_timeout: Duration,
}

/// Execute a batch and return tool-role messages aligned to the input.
pub async fn dispatch_batch(
    calls: &[ToolCall],
    speculative: &SpeculativeExecutor,
    cache: &ToolCache,
    registry: &ToolRegistry,
    executor: Arc<dyn ToolExecutor>,
    opts: &DispatchOptions,
) -> Vec<Message> {
    if calls.is_empty() {
        return Vec::new();
    }

    let all_safe = calls.iter().all(|c| registry.is_safe(&c.name));
    let parallel = opts.parallel_supported && all_safe;

    let results: Vec<String> = if parallel {
        let futures = calls
            .iter()
            .map(|call| resolve_one(call, speculative, cache, registry, executor.clone(), opts, true));
        // join_all keeps input order and never lets one failure cancel a
        // peer; each future already flattens its own errors.
        futures_util::future::join_all(futures).await
    } else {
        let mut out = Vec::with_capacity(calls.len());
        for call in calls {
            out.push(
                resolve_one(call, speculative, cache, registry, executor.clone(), opts, false)
                    .await,
            );
        }
        out
    };

    let budget = per_result_budget(opts, calls.len());
    calls
        .iter()
        .zip(results)
        .map(|(call, result)| Message::tool_result(&call.id, truncate_result(&result, budget)))
        .collect()
}

/// Speculative result, then cache, then a fresh execution.
async fn resolve_one(
    call: &ToolCall,
    speculative: &SpeculativeExecutor,
    cache: &ToolCache,
    registry: &ToolRegistry,
    executor: Arc<dyn ToolExecutor>,
    opts: &DispatchOptions,
    parallel: bool,
) -> String {
    let started = Instant::now();
    let safe = registry.is_safe(&call.name);

    let result = if let Some(result) = speculative.take_result(&call.id).await {
        result
    } else if let Some(cached) = safe
        .then(|| cache.get(&call.name, &call.arguments))
        .flatten()
    {
        cached
    } else {
        let result = match tokio::time::timeout(opts.execution_timeout, executor.execute(call)).await
        {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => format!("Error: {e}"),
            Err(_) => format!(
                "Error: tool timed out after {}s",
                opts.execution_timeout.as_secs()
            ),
        };
        if safe {
            cache.insert(&call.name, &call.arguments, &result);
        }
        result
    };

    TraceEvent::ToolDispatched {
        tool_name: call.name.clone(),
        parallel,
        duration_ms: started.elapsed().as_millis() as u64,
        is_error: result.starts_with("Error:"),
    }
    .emit();

    result
}

/// Per-result character budget: an equal share of the context fraction
/// reserved for tool results, capped by the absolute ceiling.
fn per_result_budget(opts: &DispatchOptions, batch_len: usize) -> usize {
    let share = (opts.max_context as f64 * opts.result_context_fraction * CHARS_PER_TOKEN as f64
        / batch_len as f64) as usize;
    share.min(opts.result_char_ceiling)
}

fn truncate_result(result: &str, budget: usize) -> String {
    if result.len() <= budget {
        return result.to_string();
    }
    let mut boundary = budget;
    while boundary > 0 && !result.is_char_boundary(boundary) {
        boundary -= 1;
    }
    format!(
        "{}\n[TRUNCATED: original length {}]",
        &result[..boundary],
        result.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use dr_domain::config::ToolsConfig;
    use dr_domain::error::{Error, Result};
    use dr_domain::Role;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingExecutor {
        executions: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ToolExecutor for CountingExecutor {
        async fn execute(&self, call: &ToolCall) -> Result<String> {
            self.executions.fetch_add(1, Ordering::SeqCst);
            match call.name.as_str() {
                "get_crypto" => Err(Error::Tool("exchange unreachable".into())),
                "github_read_file" => Ok("line\n".repeat(6_000)),
                name => Ok(format!("{name}:{}", call.arguments)),
            }
        }
    }

    fn harness() -> (
        Arc<ToolRegistry>,
        Arc<CountingExecutor>,
        SpeculativeExecutor,
        ToolCache,
        DispatchOptions,
    ) {
        let registry = Arc::new(ToolRegistry::from_config(&ToolsConfig::default()));
        let executor = Arc::new(CountingExecutor {
            executions: AtomicUsize::new(0),
        });
        let speculative = SpeculativeExecutor::new(
            registry.clone(),
            executor.clone(),
            5,
            Duration::from_secs(30),
        );
        let opts = DispatchOptions {
            parallel_supported: true,
            max_context: 131_072,
            result_context_fraction: 0.20,
            result_char_ceiling: 8_000,
            execution_timeout: Duration::from_secs(30),
        };
        (registry, executor, speculative, ToolCache::new(), opts)
    }

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: r#"{"q":"berlin"}"#.into(),
        }
    }

    #[tokio::test]
    async fn results_align_with_input_order() {
        let (registry, executor, speculative, cache, opts) = harness();
        let calls = vec![call("a", "fetch_url"), call("b", "get_weather"), call("c", "get_news")];
        let messages =
            dispatch_batch(&calls, &speculative, &cache, &registry, executor, &opts).await;

        assert_eq!(messages.len(), 3);
        for (msg, call) in messages.iter().zip(&calls) {
            assert_eq!(msg.role, Role::Tool);
            assert_eq!(msg.tool_call_id.as_deref(), Some(call.id.as_str()));
        }
    }

    #[tokio::test]
    async fn one_failure_never_blocks_peers() {
        let (registry, executor, speculative, cache, opts) = harness();
        let calls = vec![
            call("a", "fetch_url"),
            call("b", "get_crypto"),
            call("c", "get_weather"),
        ];
        let messages =
            dispatch_batch(&calls, &speculative, &cache, &registry, executor, &opts).await;

        assert!(messages[0].content.extract_all_text().starts_with("fetch_url"));
        assert!(messages[1].content.extract_all_text().starts_with("Error:"));
        assert!(messages[2].content.extract_all_text().starts_with("get_weather"));
    }

    #[tokio::test]
    async fn repeat_call_hits_cache_without_executing() {
        let (registry, executor, speculative, cache, opts) = harness();
        let calls = vec![call("a", "get_weather")];

        let first =
            dispatch_batch(&calls, &speculative, &cache, &registry, executor.clone(), &opts).await;
        let again = vec![call("a2", "get_weather")];
        let second =
            dispatch_batch(&again, &speculative, &cache, &registry, executor.clone(), &opts).await;

        assert_eq!(
            first[0].content.extract_all_text(),
            second[0].content.extract_all_text()
        );
        assert_eq!(executor.executions.load(Ordering::SeqCst), 1);
        assert_eq!(cache.hits(), 1);
    }

    #[tokio::test]
    async fn mutating_tool_bypasses_cache() {
        let (registry, executor, speculative, cache, opts) = harness();
        let calls = vec![call("m1", "run_command")];
        dispatch_batch(&calls, &speculative, &cache, &registry, executor.clone(), &opts).await;
        let calls = vec![call("m1b", "run_command")];
        dispatch_batch(&calls, &speculative, &cache, &registry, executor.clone(), &opts).await;

        // Identical arguments still re-execute: mutating tools never cache.
        assert_eq!(executor.executions.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn speculative_result_is_preferred() {
        let (registry, executor, speculative, cache, opts) = harness();
        let c = call("s1", "get_weather");
        speculative.on_tool_call_ready(&c);
        // Let the speculative task finish.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let messages = dispatch_batch(
            std::slice::from_ref(&c),
            &speculative,
            &cache,
            &registry,
            executor.clone(),
            &opts,
        )
        .await;

        assert!(messages[0].content.extract_all_text().starts_with("get_weather"));
        // Executed once speculatively, not again at dispatch.
        assert_eq!(executor.executions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn batch_results_are_truncated_to_budget() {
        let (registry, executor, speculative, cache, opts) = harness();
        let calls: Vec<ToolCall> = (0..5)
            .map(|i| call(&format!("f{i}"), "github_read_file"))
            .collect();
        let messages =
            dispatch_batch(&calls, &speculative, &cache, &registry, executor, &opts).await;

        let mut total = 0usize;
        for msg in &messages {
            let text = msg.content.extract_all_text();
            assert!(text.contains("[TRUNCATED: original length 30000]"), "{:.60}", text);
            assert!(text.len() <= 25_000);
            total += text.len();
        }
        assert!(total < 110_000);
    }

    #[tokio::test]
    async fn per_result_budget_math() {
        let opts = DispatchOptions {
            parallel_supported: true,
            max_context: 131_072,
            result_context_fraction: 0.20,
            result_char_ceiling: 8_000,
            execution_timeout: Duration::from_secs(30),
        };
        // Batch share 20971 is above the ceiling; the ceiling wins.
        assert_eq!(per_result_budget(&opts, 5), 8_000);
        // A huge batch pushes the share below the ceiling.
        assert_eq!(per_result_budget(&opts, 40), 2_621);
    }
}
