//! Durable task state: the [`TaskState`] entity the processor owns and the
//! [`CheckpointStore`] it persists through at every iteration boundary.

pub mod store;
pub mod task;

pub use store::{CheckpointStore, FsCheckpointStore, MemoryCheckpointStore, LATEST_SLOT};
pub use task::{CheckpointSummary, TaskPhase, TaskState, TaskStatus};
