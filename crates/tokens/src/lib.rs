//! Token counting and message-cost accounting.
//!
//! [`count_tokens`] gives the exact cl100k BPE count with a heuristic
//! fallback; the accounting module prices whole messages the way the
//! compressor and processor budget them.

pub mod accounting;
pub mod counter;

pub use accounting::{estimate_message_tokens, estimate_tokens};
pub use counter::count_tokens;
