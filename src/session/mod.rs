//! Session state: log ring, per-stream record, and the registry.

mod logbuf;
mod registry;
mod session;

pub use logbuf::{LogBuffer, LogLine, LogSource};
pub use registry::{SessionRegistry, StreamStatus};

pub(crate) use registry::RetryDecision;
