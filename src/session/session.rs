//! # Per-stream session record.
//!
//! One [`Session`] exists per tracked stream. It owns the handle to the
//! live encoder process instance (when running), the cumulative playback
//! position, the retry counter, and the bounded log ring.
//!
//! ## Position model
//! - `base_position` accumulates the seconds consumed by all *prior*
//!   process instances. It is set only at explicit resume, never by
//!   elapsed-time accrual while running — that asymmetry is what lets the
//!   position survive an unbounded number of crash/retry cycles without
//!   accumulating wall-clock drift.
//! - `current_position` is `base_position + elapsed` while running, and is
//!   frozen at the last computed value once the process stops.

use std::time::Instant;

use tokio_util::sync::CancellationToken;

use super::logbuf::{LogBuffer, LogSource};

/// Handle to one live process instance.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ProcessHandle {
    /// OS process id, when the spawn reported one.
    pub pid: Option<u32>,
}

/// Tracked lifecycle state of one logical stream.
#[derive(Debug)]
pub(crate) struct Session {
    /// Handle to the live process; `None` when not running.
    pub handle: Option<ProcessHandle>,
    /// A start is in flight (spawn issued, not yet committed). Part of the
    /// at-most-one-process guard.
    pub starting: bool,
    /// Monotonic per-session instance counter; bumped on every commit so a
    /// stale exit notification for an earlier instance is ignored.
    pub epoch: u64,
    /// Launch time of the current process instance.
    pub started_at: Option<Instant>,
    /// Seconds of media consumed by all prior instances.
    pub base_position: u64,
    /// Best current estimate of the absolute playback offset.
    pub current_position: u64,
    /// Consecutive failed-restart attempts since the last fresh start.
    pub retry_count: u32,
    /// Set immediately before a deliberate termination.
    pub manual_stop: bool,
    /// Bounded ring of recent output and lifecycle lines.
    pub logs: LogBuffer,
    /// Cancels a pending scheduled restart, if one is waiting.
    pub retry_cancel: Option<CancellationToken>,
}

impl Session {
    /// Creates an untracked, not-yet-running session.
    pub fn new(log_capacity: usize) -> Self {
        Self {
            handle: None,
            starting: false,
            epoch: 0,
            started_at: None,
            base_position: 0,
            current_position: 0,
            retry_count: 0,
            manual_stop: false,
            logs: LogBuffer::new(log_capacity),
            retry_cancel: None,
        }
    }

    /// True while a process is live or a start is in flight.
    pub fn is_active(&self) -> bool {
        self.handle.is_some() || self.starting
    }

    /// Seconds since the current instance launched (0 when not running).
    pub fn elapsed_secs(&self) -> u64 {
        match (&self.handle, self.started_at) {
            (Some(_), Some(t)) => t.elapsed().as_secs(),
            _ => 0,
        }
    }

    /// Absolute offset to restart playback from.
    ///
    /// While running: `base_position + floor(elapsed)`. Once stopped the
    /// frozen `current_position` is returned; before any start it is 0.
    pub fn resume_position(&self) -> u64 {
        match (&self.handle, self.started_at) {
            (Some(_), Some(t)) => self.base_position + t.elapsed().as_secs(),
            _ => self.current_position,
        }
    }

    /// Freezes `current_position` at the value computed from the running
    /// instance. Called when the process stops for any reason.
    pub fn freeze_position(&mut self) {
        self.current_position = self.resume_position();
    }

    /// Appends a lifecycle line to the log ring.
    pub fn note(&mut self, text: impl Into<String>) {
        self.logs.push(LogSource::Lifecycle, text);
    }
}
