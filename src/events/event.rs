//! # Runtime events emitted by the supervisor and monitor loops.
//!
//! [`EventKind`] classifies events across four categories:
//! - **Session lifecycle**: start/stop flow and process exits
//! - **Retry control**: scheduled, aborted, and exhausted restarts
//! - **Health & reconciliation**: stall detection, recovery, status repair
//! - **Infrastructure**: subscriber overflow/panic, absorbed store failures
//!
//! The [`Event`] struct carries optional metadata: stream identifier,
//! human-readable reason, retry attempt, backoff delay, exit code, playback
//! position, and a raw process-output line.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically. Use `seq` to restore exact order when events are consumed
//! out of band.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Session lifecycle ===
    /// A start request passed its preconditions and is about to spawn.
    ///
    /// Sets: `stream`, `position` (resume offset), `at`, `seq`.
    SessionStarting,

    /// The encoder process is running and the session is registered.
    ///
    /// Sets: `stream`, `position`, `reason` ("fresh" or "resumed"), `at`, `seq`.
    SessionStarted,

    /// A manual stop completed and the session left the registry.
    ///
    /// Sets: `stream`, `at`, `seq`.
    SessionStopped,

    /// A raw line from the encoder's stdout or stderr.
    ///
    /// Periodic progress lines matching the noisy-pattern allow-list are
    /// kept in the session log buffer but not published as events.
    ///
    /// Sets: `stream`, `line`, `reason` ("stdout"/"stderr"), `at`, `seq`.
    ProcessOutput,

    /// The encoder process terminated.
    ///
    /// Sets: `stream`, `reason` (exit classification label), `exit_code`
    /// (when present), `at`, `seq`.
    ProcessExited,

    // === Retry control ===
    /// A restart was scheduled after a classified failure.
    ///
    /// Sets: `stream`, `attempt` (1-based retry count), `delay_ms`,
    /// `position` (resume offset for the restart), `reason` (failure
    /// label), `at`, `seq`.
    RetryScheduled,

    /// A pending restart was dropped before firing (stream record deleted,
    /// or the session disappeared).
    ///
    /// Sets: `stream`, `reason`, `at`, `seq`.
    RetryAborted,

    /// The retry budget is exhausted; the session is terminally offline.
    ///
    /// Sets: `stream`, `attempt` (frozen retry count), `at`, `seq`.
    RetryExhausted,

    // === Health & reconciliation ===
    /// A running session produced no output for longer than the stall
    /// timeout.
    ///
    /// Sets: `stream`, `position` (resume offset chosen for recovery),
    /// `at`, `seq`.
    StallDetected,

    /// A health evaluation failed (durable-store error or missing state).
    ///
    /// Sets: `stream`, `attempt` (consecutive failures), `reason`, `at`, `seq`.
    HealthCheckFailed,

    /// Stop/restart recovery brought the session back up.
    ///
    /// Sets: `stream`, `position`, `at`, `seq`.
    RecoverySucceeded,

    /// Stop/restart recovery could not bring the session back up.
    ///
    /// Sets: `stream`, `reason`, `at`, `seq`.
    RecoveryFailed,

    /// The durable status record diverged from live state and was corrected.
    ///
    /// Sets: `stream`, `reason` (direction of the repair), `at`, `seq`.
    StatusRepaired,

    /// An in-memory session had no durable record and was dropped.
    ///
    /// Sets: `stream`, `at`, `seq`.
    OrphanDropped,

    // === Infrastructure ===
    /// A durable-store write failed inside a lifecycle callback and was
    /// absorbed.
    ///
    /// Sets: `stream`, `reason`, `at`, `seq`.
    StoreFailure,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `stream` (subscriber name), `reason`, `at`, `seq`.
    SubscriberOverflow,

    /// Subscriber panicked during event processing.
    ///
    /// Sets: `stream` (subscriber name), `reason` (panic info), `at`, `seq`.
    SubscriberPanicked,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Stream identifier (or subscriber name for infrastructure events).
    pub stream: Option<Arc<str>>,
    /// Human-readable reason (failure labels, repair direction, ...).
    pub reason: Option<Arc<str>>,
    /// Raw process-output line (only for [`EventKind::ProcessOutput`]).
    pub line: Option<Arc<str>>,
    /// Retry attempt or consecutive-failure count.
    pub attempt: Option<u32>,
    /// Backoff delay before the next attempt, in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Process exit code, when the OS reported one.
    pub exit_code: Option<i32>,
    /// Absolute playback offset in seconds.
    pub position: Option<u64>,
}

impl Event {
    /// Creates a new event of the given kind with the current timestamp and
    /// next sequence number.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            stream: None,
            reason: None,
            line: None,
            attempt: None,
            delay_ms: None,
            exit_code: None,
            position: None,
        }
    }

    /// Attaches a stream identifier.
    #[inline]
    pub fn with_stream(mut self, stream: impl Into<Arc<str>>) -> Self {
        self.stream = Some(stream.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a raw process-output line.
    #[inline]
    pub fn with_line(mut self, line: impl Into<Arc<str>>) -> Self {
        self.line = Some(line.into());
        self
    }

    /// Attaches a retry attempt or failure count.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a backoff delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    /// Attaches a process exit code.
    #[inline]
    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    /// Attaches an absolute playback position (seconds).
    #[inline]
    pub fn with_position(mut self, secs: u64) -> Self {
        self.position = Some(secs);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::now(EventKind::SubscriberOverflow)
            .with_stream(subscriber)
            .with_reason(reason)
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::now(EventKind::SubscriberPanicked)
            .with_stream(subscriber)
            .with_reason(info)
    }

    #[inline]
    pub fn is_subscriber_overflow(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberOverflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_are_strictly_increasing() {
        let a = Event::now(EventKind::SessionStarting);
        let b = Event::now(EventKind::SessionStarted);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn builders_attach_metadata() {
        let ev = Event::now(EventKind::RetryScheduled)
            .with_stream("stream-1")
            .with_reason("process_error")
            .with_attempt(2)
            .with_delay(Duration::from_secs(6))
            .with_position(120);

        assert_eq!(ev.kind, EventKind::RetryScheduled);
        assert_eq!(ev.stream.as_deref(), Some("stream-1"));
        assert_eq!(ev.reason.as_deref(), Some("process_error"));
        assert_eq!(ev.attempt, Some(2));
        assert_eq!(ev.delay_ms, Some(6_000));
        assert_eq!(ev.position, Some(120));
    }
}
