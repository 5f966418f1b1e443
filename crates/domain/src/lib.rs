//! Shared domain types for Drover: the conversation model, stream events,
//! the workspace-wide error type, configuration, plans, and trace events.

pub mod config;
pub mod error;
pub mod message;
pub mod plan;
pub mod stream;
pub mod trace;

pub use error::{Error, Result};
pub use message::{ContentPart, Message, MessageContent, Role, ToolCall, ToolSchema};
pub use plan::{PlanStep, StructuredPlan};
pub use stream::{BoxStream, StreamEvent, Usage};
