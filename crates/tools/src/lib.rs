//! Tool execution: registry + safety classification, per-task result
//! caching, speculative execution during streaming, and batch dispatch.

pub mod cache;
pub mod dispatch;
pub mod registry;
pub mod speculative;

pub use cache::ToolCache;
pub use dispatch::{dispatch_batch, DispatchOptions};
pub use registry::ToolRegistry;
pub use speculative::SpeculativeExecutor;

use dr_domain::error::Result;
use dr_domain::ToolCall;

/// The host-provided execution point for concrete tools.
///
/// Drover is a pure orchestrator: HTTP clients, sandboxes, and repository
/// readers live behind this trait. Errors are flattened to `Error: ...`
/// result strings at the dispatch boundary and never abort a task.
#[async_trait::async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, call: &ToolCall) -> Result<String>;
}
