use std::sync::Arc;

use dr_checkpoint::CheckpointStore;
use dr_context::FileFetcher;
use dr_domain::config::Config;
use dr_providers::ModelCatalog;
use dr_tools::{ToolExecutor, ToolRegistry};

use crate::runtime::{ControlMap, ProgressEmitter};

/// Shared application state passed to all API handlers and processors.
///
/// Everything is an injected value: tests substitute a scripted model
/// client through the catalog, a recording emitter, a memory store, and a
/// canned executor without touching the runtime.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Model catalog: alias → endpoint, capabilities, rotation order.
    pub catalog: Arc<ModelCatalog>,
    /// Tool schemas + the safe-for-speculation whitelist.
    pub registry: Arc<ToolRegistry>,
    /// Durable task state, one `latest` slot per user plus named saves.
    pub store: Arc<dyn CheckpointStore>,
    /// Front-end message gateway (best-effort).
    pub emitter: Arc<dyn ProgressEmitter>,
    /// Concrete tool backend.
    pub executor: Arc<dyn ToolExecutor>,
    /// Planner pre-fetch source.
    pub fetcher: Arc<dyn FileFetcher>,
    /// Per-user cancel/steer/run-lock handles.
    pub controls: Arc<ControlMap>,
}
