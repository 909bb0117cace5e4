//! # Retry policy for failed stream sessions.
//!
//! [`RetryPolicy`] decides how long to wait before relaunching an encoder
//! process after a classified failure. The two failure classes deliberately
//! back off differently:
//!
//! - [`FailureKind::Crash`] (fault-signal kill) → fixed `crash_delay`.
//!   Crashes are rare and usually transient, so recovery is fast.
//! - [`FailureKind::Error`] (non-zero exit) → exponential
//!   `min(base * 2^(n-1), max)` for retry attempt `n` (1-based). Error exits
//!   typically mean a sustained network or endpoint problem, so recovery is
//!   throttled.
//!
//! Whether this asymmetry should be unified is an open review question; the
//! policy preserves it as observed behavior.
//!
//! Jitter (default [`JitterPolicy::None`]) applies to the exponential class
//! only — the fixed crash delay stays exact.

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Classification of an encoder process failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The process was killed by a fault signal.
    Crash,
    /// The process exited with a non-zero code (carried when reported).
    Error(Option<i32>),
}

impl FailureKind {
    /// Returns a short stable label (snake_case) for logs/events.
    pub fn as_label(&self) -> &'static str {
        match self {
            FailureKind::Crash => "process_fault",
            FailureKind::Error(_) => "process_error",
        }
    }
}

/// Per-failure-class restart delay policy.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Maximum consecutive failed-restart attempts before giving up.
    pub max_retries: u32,
    /// Fixed delay for the crash class.
    pub crash_delay: Duration,
    /// Initial delay of the exponential error-class backoff.
    pub base_delay: Duration,
    /// Cap of the exponential error-class backoff.
    pub max_delay: Duration,
    /// Jitter applied to the error class.
    pub jitter: JitterPolicy,
}

impl Default for RetryPolicy {
    /// Production defaults: 3 retries, 3 s crash delay, 3 s base, 30 s cap,
    /// no jitter.
    fn default() -> Self {
        Self {
            max_retries: 3,
            crash_delay: Duration::from_secs(3),
            base_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(30),
            jitter: JitterPolicy::None,
        }
    }
}

impl RetryPolicy {
    /// Computes the delay before retry attempt `attempt` (1-based, i.e. the
    /// value of the session's retry counter after incrementing).
    ///
    /// Crash class ignores the attempt number; error class grows
    /// `base * 2^(attempt-1)` clamped to `max_delay`, then jittered.
    pub fn delay(&self, kind: FailureKind, attempt: u32) -> Duration {
        match kind {
            FailureKind::Crash => self.crash_delay,
            FailureKind::Error(_) => {
                let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
                let unclamped = self.base_delay.as_secs_f64() * 2f64.powi(exp);
                let max_secs = self.max_delay.as_secs_f64();
                let base = if !unclamped.is_finite() || unclamped > max_secs {
                    self.max_delay
                } else {
                    Duration::from_secs_f64(unclamped)
                };
                self.jitter.apply(base)
            }
        }
    }
}
