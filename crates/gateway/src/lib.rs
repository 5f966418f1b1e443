//! Drover gateway: the per-user task processor, the progress emitter
//! gateway, and the HTTP control plane.

pub mod api;
pub mod cli;
pub mod runtime;
pub mod state;
