//! # Global runtime configuration.
//!
//! Provides [`SupervisorConfig`], centralized settings for the supervision
//! runtime: retry limits and delays, stall detection, monitor cadences, and
//! log-buffer capacity.
//!
//! The defaults reproduce production behavior; tests shrink the timing knobs
//! to milliseconds so scenarios run fast.

use std::time::Duration;

use crate::policies::JitterPolicy;

/// Global configuration for the stream supervision runtime.
///
/// ## Field semantics
/// - `max_retries`: consecutive failed-restart budget per session. Reaching
///   it forces a terminal "offline, not retrying" outcome.
/// - `crash_delay`: fixed delay before restarting after a fault-signal kill.
/// - `retry_base_delay` / `retry_max_delay`: exponential backoff parameters
///   for error exits (`min(base * 2^(n-1), max)` for retry attempt `n`).
/// - `jitter`: randomization applied to the exponential class only.
///   Defaults to [`JitterPolicy::None`], keeping delays exact.
/// - `stall_timeout`: a running session whose elapsed time and newest log
///   line are both older than this is considered stalled.
/// - `health_interval`: cadence of the health monitor sweep.
/// - `failure_threshold`: consecutive failed health evaluations before
///   forced recovery.
/// - `stall_settle` / `failure_settle`: pause between the recovery `stop`
///   and the follow-up `start` for the stall and failure paths.
/// - `reconcile_interval`: cadence of the durable-status reconciler.
/// - `log_capacity`: per-session log ring size (FIFO eviction).
/// - `min_history_secs`: sessions that ran shorter than this are not
///   recorded in the history store.
/// - `bus_capacity`: event bus ring buffer size (min 1; clamped).
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Consecutive failed-restart budget per session.
    pub max_retries: u32,
    /// Fixed restart delay for fault-signal (crash) exits.
    pub crash_delay: Duration,
    /// Initial delay of the exponential backoff for error exits.
    pub retry_base_delay: Duration,
    /// Cap of the exponential backoff for error exits.
    pub retry_max_delay: Duration,
    /// Jitter applied to exponential delays.
    pub jitter: JitterPolicy,
    /// Output-silence window after which a running session counts as stalled.
    pub stall_timeout: Duration,
    /// Health monitor sweep cadence.
    pub health_interval: Duration,
    /// Consecutive unhealthy observations before forced recovery.
    pub failure_threshold: u32,
    /// Settle delay between stop and restart on the stall path.
    pub stall_settle: Duration,
    /// Settle delay between stop and restart on the failure path.
    pub failure_settle: Duration,
    /// Durable-status reconciler cadence.
    pub reconcile_interval: Duration,
    /// Per-session log ring capacity.
    pub log_capacity: usize,
    /// Minimum run length for a completed-session history record.
    pub min_history_secs: u64,
    /// Capacity of the event bus broadcast channel.
    pub bus_capacity: usize,
}

impl SupervisorConfig {
    /// Returns a bus capacity clamped to a minimum of 1.
    ///
    /// The `Bus` uses this value to avoid constructing an invalid channel.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for SupervisorConfig {
    /// Production defaults:
    ///
    /// - `max_retries = 3`
    /// - `crash_delay = 3s` (fixed; crashes recover fast)
    /// - `retry_base_delay = 3s`, `retry_max_delay = 30s` (error exits)
    /// - `jitter = None` (exact delays)
    /// - `stall_timeout = 30s`, `health_interval = 10s`
    /// - `failure_threshold = 3`, `stall_settle = 2s`, `failure_settle = 5s`
    /// - `reconcile_interval = 5min`
    /// - `log_capacity = 500`, `min_history_secs = 1`, `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            max_retries: 3,
            crash_delay: Duration::from_secs(3),
            retry_base_delay: Duration::from_secs(3),
            retry_max_delay: Duration::from_secs(30),
            jitter: JitterPolicy::None,
            stall_timeout: Duration::from_secs(30),
            health_interval: Duration::from_secs(10),
            failure_threshold: 3,
            stall_settle: Duration::from_secs(2),
            failure_settle: Duration::from_secs(5),
            reconcile_interval: Duration::from_secs(300),
            log_capacity: 500,
            min_history_secs: 1,
            bus_capacity: 1024,
        }
    }
}
