//! Retry and jitter policies.

mod jitter;
mod retry;

pub use jitter::JitterPolicy;
pub use retry::{FailureKind, RetryPolicy};
