//! Supervisor: session orchestration, process plumbing, exit handling.

mod core;
mod exit;
mod spawn;

pub use self::core::{StartOutcome, StreamSupervisor, SupervisorBuilder};
