//! Checkpoint persistence.
//!
//! One slot = one whole-object JSON file at
//! `<root>/<user_id>/checkpoints/<slot>.json`. The `latest` slot is
//! reserved for the processor; named slots belong to the user.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use dr_domain::error::{Error, Result};
use dr_domain::trace::TraceEvent;

use crate::task::{CheckpointSummary, TaskState, TaskStatus};

/// Slot the processor writes after every iteration boundary.
pub const LATEST_SLOT: &str = "latest";

#[async_trait::async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get(&self, user_id: &str, slot: &str) -> Result<Option<TaskState>>;
    async fn put(&self, user_id: &str, slot: &str, state: &TaskState) -> Result<()>;
    async fn list(&self, user_id: &str) -> Result<Vec<CheckpointSummary>>;
    /// Users with any persisted checkpoint (startup auto-resume scan).
    async fn users(&self) -> Result<Vec<String>>;
}

fn summarize(slot: &str, state: &TaskState) -> CheckpointSummary {
    CheckpointSummary {
        slot: slot.to_string(),
        saved_at: state.last_update,
        iterations: state.iterations,
        tools_used: state.tools_used.len(),
        completed: state.status == TaskStatus::Completed,
        task_prompt: state.task_prompt(),
        model_alias: state.model_alias.clone(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Filesystem store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct FsCheckpointStore {
    root: PathBuf,
}

impl FsCheckpointStore {
    pub fn new(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root).map_err(Error::Io)?;
        tracing::info!(path = %root.display(), "checkpoint store ready");
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn slot_path(&self, user_id: &str, slot: &str) -> Result<PathBuf> {
        validate_component(user_id)?;
        validate_component(slot)?;
        Ok(self
            .root
            .join(user_id)
            .join("checkpoints")
            .join(format!("{slot}.json")))
    }
}

/// Path components come from user input; refuse anything that could walk
/// out of the store.
fn validate_component(value: &str) -> Result<()> {
    if value.is_empty()
        || value.contains(['/', '\\'])
        || value.contains("..")
        || value.starts_with('.')
    {
        return Err(Error::Checkpoint(format!("invalid name '{value}'")));
    }
    Ok(())
}

#[async_trait::async_trait]
impl CheckpointStore for FsCheckpointStore {
    async fn get(&self, user_id: &str, slot: &str) -> Result<Option<TaskState>> {
        let path = self.slot_path(user_id, slot)?;
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
        let state = serde_json::from_str(&raw)
            .map_err(|e| Error::Checkpoint(format!("corrupt checkpoint {slot}: {e}")))?;
        Ok(Some(state))
    }

    async fn put(&self, user_id: &str, slot: &str, state: &TaskState) -> Result<()> {
        let path = self.slot_path(user_id, slot)?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(Error::Io)?;
        }
        let json = serde_json::to_string(state)?;
        std::fs::write(&path, json).map_err(Error::Io)?;

        TraceEvent::CheckpointSaved {
            user_id: user_id.to_string(),
            slot: slot.to_string(),
            iterations: state.iterations,
        }
        .emit();
        Ok(())
    }

    async fn list(&self, user_id: &str) -> Result<Vec<CheckpointSummary>> {
        validate_component(user_id)?;
        let dir = self.root.join(user_id).join("checkpoints");
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut summaries = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(Error::Io)? {
            let entry = entry.map_err(Error::Io)?;
            let path = entry.path();
            let Some(slot) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(".json"))
            else {
                continue;
            };
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            match serde_json::from_str::<TaskState>(&raw) {
                Ok(state) => summaries.push(summarize(slot, &state)),
                Err(e) => {
                    tracing::warn!(slot, error = %e, "skipping malformed checkpoint");
                }
            }
        }
        summaries.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        Ok(summaries)
    }

    async fn users(&self) -> Result<Vec<String>> {
        let mut users = Vec::new();
        for entry in std::fs::read_dir(&self.root).map_err(Error::Io)? {
            let entry = entry.map_err(Error::Io)?;
            if entry.file_type().map_err(Error::Io)?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    users.push(name.to_string());
                }
            }
        }
        users.sort();
        Ok(users)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Map-backed store for tests and embedders that don't need durability.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    slots: RwLock<HashMap<(String, String), TaskState>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(&self, user_id: &str, slot: &str) -> Result<Option<TaskState>> {
        Ok(self
            .slots
            .read()
            .get(&(user_id.to_string(), slot.to_string()))
            .cloned())
    }

    async fn put(&self, user_id: &str, slot: &str, state: &TaskState) -> Result<()> {
        self.slots
            .write()
            .insert((user_id.to_string(), slot.to_string()), state.clone());
        Ok(())
    }

    async fn list(&self, user_id: &str) -> Result<Vec<CheckpointSummary>> {
        let mut summaries: Vec<CheckpointSummary> = self
            .slots
            .read()
            .iter()
            .filter(|((u, _), _)| u == user_id)
            .map(|((_, slot), state)| summarize(slot, state))
            .collect();
        summaries.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        Ok(summaries)
    }

    async fn users(&self) -> Result<Vec<String>> {
        let mut users: Vec<String> = self
            .slots
            .read()
            .keys()
            .map(|(u, _)| u.clone())
            .collect();
        users.sort();
        users.dedup();
        Ok(users)
    }
}
