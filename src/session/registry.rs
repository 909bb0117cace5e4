//! # Session registry — the single source of truth for live sessions.
//!
//! [`SessionRegistry`] owns every [`Session`] behind one async mutex and is
//! the only place session state is mutated. All check-then-mutate sequences
//! (start-in-flight guard, retry-counter bump, manual-stop takeover) happen
//! under the lock as one atomic step, which is what preserves the
//! at-most-one-process and bounded-retry invariants on a multi-threaded
//! runtime.
//!
//! ## Rules
//! - A stream is **active** while a process handle is present or a start is
//!   in flight; a session row may outlive activity (it carries position and
//!   retry state across a pending restart).
//! - `begin_start` / `commit_start` / `abort_start` bracket every spawn.
//!   `begin_start` refuses when the stream is already active — this is the
//!   guard that closes the race between a delayed backoff retry and a
//!   stall-recovery restart.
//! - Each commit bumps the session `epoch`; exit notifications carry the
//!   epoch they belong to and are ignored when stale.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::logbuf::{LogLine, LogSource};
use super::session::{ProcessHandle, Session};
use crate::error::StartError;

/// Composite status snapshot for one stream.
#[derive(Debug, Clone)]
pub struct StreamStatus {
    /// A live process (or in-flight start) exists.
    pub is_active: bool,
    /// Seconds since the current instance launched (0 when not running).
    pub elapsed_secs: u64,
    /// Best current estimate of the absolute playback offset.
    pub video_position: u64,
    /// Offset accumulated by prior instances.
    pub base_position: u64,
    /// Consecutive failed-restart attempts.
    pub retry_count: u32,
    /// Newest log line, if any.
    pub last_log: Option<LogLine>,
}

/// Outcome of an exit notification.
#[derive(Debug)]
pub(crate) struct ExitOutcome {
    /// The termination was deliberately requested.
    pub manual_stop: bool,
    /// Frozen absolute position at exit time.
    pub final_position: u64,
    /// Wall-clock run length of the exited instance, in seconds.
    pub ran_secs: u64,
}

/// Decision from a retry-counter bump.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum RetryDecision {
    /// Retry attempt `attempt` (1-based) with this resume offset.
    Retry { attempt: u32, resume: u64 },
    /// The retry budget is spent; the count stays frozen.
    Exhausted { count: u32 },
}

/// State taken over from a session at manual stop.
#[derive(Debug)]
pub(crate) struct ManualStop {
    /// Pid of the live process, when one was running.
    pub pid: Option<u32>,
    /// Run length of the final instance in seconds, when it was running.
    pub ran_secs: Option<u64>,
    /// Frozen absolute position at stop time.
    pub final_position: u64,
    /// Pending-retry cancellation token, when a restart was scheduled.
    pub retry_cancel: Option<CancellationToken>,
}

/// Owned, injected session store. No ambient singletons: the supervisor,
/// health monitor, and reconciler all share one instance by `Arc`.
pub struct SessionRegistry {
    log_capacity: usize,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionRegistry {
    /// Creates an empty registry; per-session log rings hold `log_capacity`
    /// lines.
    pub fn new(log_capacity: usize) -> Self {
        Self {
            log_capacity,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    // --- start bracket -----------------------------------------------------

    /// Reserves the stream for an in-flight start.
    ///
    /// Returns `created = true` when no session row existed before. A fresh
    /// (non-resuming) start resets the retry counter. Fails with
    /// [`StartError::AlreadyActive`] when a process is live or another
    /// start is in flight.
    pub(crate) async fn begin_start(&self, id: &str, fresh: bool) -> Result<bool, StartError> {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(id) {
            Some(s) if s.is_active() => Err(StartError::AlreadyActive(id.to_string())),
            Some(s) => {
                s.starting = true;
                if fresh {
                    s.retry_count = 0;
                }
                Ok(false)
            }
            None => {
                let mut s = Session::new(self.log_capacity);
                s.starting = true;
                sessions.insert(id.to_string(), s);
                Ok(true)
            }
        }
    }

    /// Commits a successful spawn: installs the handle, stamps the launch
    /// time, and sets both position fields to the launch offset.
    ///
    /// The positions are overwritten unconditionally: the encoder was
    /// launched at exactly this offset, so any value left over from an
    /// earlier incarnation of the row (a session kept after retry
    /// exhaustion) would misreport where playback actually is.
    ///
    /// Returns the new instance epoch, or `None` when the reservation
    /// vanished (the stream was force-dropped mid-start).
    pub(crate) async fn commit_start(
        &self,
        id: &str,
        pid: Option<u32>,
        resume: Option<u64>,
    ) -> Option<u64> {
        let mut sessions = self.sessions.lock().await;
        let s = sessions.get_mut(id)?;
        s.epoch += 1;
        s.starting = false;
        s.manual_stop = false;
        s.handle = Some(ProcessHandle { pid });
        s.started_at = Some(std::time::Instant::now());
        let pos = resume.unwrap_or(0);
        s.base_position = pos;
        s.current_position = pos;
        s.note(format!("process started (position={pos}s)"));
        Some(s.epoch)
    }

    /// Rolls back a reservation after a failed spawn.
    pub(crate) async fn abort_start(&self, id: &str, created: bool) {
        let mut sessions = self.sessions.lock().await;
        if created {
            sessions.remove(id);
        } else if let Some(s) = sessions.get_mut(id) {
            s.starting = false;
        }
    }

    // --- exit & retry ------------------------------------------------------

    /// Applies a process-exit notification for instance `epoch`.
    ///
    /// Removes the handle (idempotent), freezes the playback position, and
    /// reports whether the stop was deliberate. Stale notifications — the
    /// session was restarted since, or already dropped — return `None`.
    pub(crate) async fn on_exit(&self, id: &str, epoch: u64) -> Option<ExitOutcome> {
        let mut sessions = self.sessions.lock().await;
        let s = sessions.get_mut(id)?;
        if s.epoch != epoch {
            return None;
        }
        s.freeze_position();
        let ran_secs = s.started_at.map(|t| t.elapsed().as_secs()).unwrap_or(0);
        s.handle = None;
        s.started_at = None;
        s.note("process exited");
        Some(ExitOutcome {
            manual_stop: s.manual_stop,
            final_position: s.current_position,
            ran_secs,
        })
    }

    /// Bumps the retry counter, or reports exhaustion once the budget is
    /// spent. The counter is read and incremented under the lock as one
    /// step so concurrent failure paths cannot exceed the budget.
    pub(crate) async fn bump_retry(&self, id: &str, max_retries: u32) -> Option<RetryDecision> {
        let mut sessions = self.sessions.lock().await;
        let s = sessions.get_mut(id)?;
        if s.retry_count >= max_retries {
            return Some(RetryDecision::Exhausted {
                count: s.retry_count,
            });
        }
        s.retry_count += 1;
        Some(RetryDecision::Retry {
            attempt: s.retry_count,
            resume: s.current_position,
        })
    }

    /// Stores the cancellation token of a pending scheduled restart.
    pub(crate) async fn set_retry_cancel(&self, id: &str, token: CancellationToken) {
        let mut sessions = self.sessions.lock().await;
        if let Some(s) = sessions.get_mut(id) {
            s.retry_cancel = Some(token);
        }
    }

    /// Takes (and clears) the pending-restart token, if any.
    pub(crate) async fn take_retry_cancel(&self, id: &str) -> Option<CancellationToken> {
        let mut sessions = self.sessions.lock().await;
        sessions.get_mut(id)?.retry_cancel.take()
    }

    // --- manual stop -------------------------------------------------------

    /// Marks the session for deliberate termination and strips its tracked
    /// state.
    ///
    /// Freezes the final position first (for the history record), then
    /// clears position/retry/log tracking. When a process was live the row
    /// is kept — flagged `manual_stop` — so the exit notification can
    /// finish the bookkeeping; otherwise the row is removed outright.
    pub(crate) async fn begin_manual_stop(&self, id: &str) -> Option<ManualStop> {
        let mut sessions = self.sessions.lock().await;
        let s = sessions.get_mut(id)?;

        s.freeze_position();
        let final_position = s.current_position;
        let ran_secs = match (&s.handle, s.started_at) {
            (Some(_), Some(t)) => Some(t.elapsed().as_secs()),
            _ => None,
        };
        let pid = s.handle.take().and_then(|h| h.pid);
        let retry_cancel = s.retry_cancel.take();

        s.manual_stop = true;
        s.starting = false;
        s.started_at = None;
        s.base_position = 0;
        s.current_position = 0;
        s.retry_count = 0;
        s.logs.clear();

        let had_process = ran_secs.is_some();
        if !had_process {
            sessions.remove(id);
        }
        Some(ManualStop {
            pid,
            ran_secs,
            final_position,
            retry_cancel,
        })
    }

    /// Removes the session row entirely.
    pub(crate) async fn remove(&self, id: &str) -> bool {
        self.sessions.lock().await.remove(id).is_some()
    }

    /// Takes the live pid (for a best-effort kill) and removes the row.
    /// Used when a tracked session turns out to have no durable record.
    pub(crate) async fn drop_orphan(&self, id: &str) -> Option<u32> {
        let mut sessions = self.sessions.lock().await;
        let s = sessions.remove(id)?;
        s.handle.and_then(|h| h.pid)
    }

    // --- observation -------------------------------------------------------

    /// Appends a raw output line to the stream's log ring. Returns false
    /// when the stream is no longer tracked.
    pub(crate) async fn append_output(&self, id: &str, source: LogSource, text: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(id) {
            Some(s) => {
                s.logs.push(source, text);
                true
            }
            None => false,
        }
    }

    /// True while a live process (or in-flight start) exists for this id.
    pub async fn is_active(&self, id: &str) -> bool {
        self.sessions
            .lock()
            .await
            .get(id)
            .map(Session::is_active)
            .unwrap_or(false)
    }

    /// True when any session row is tracked for this id, active or not.
    pub async fn contains(&self, id: &str) -> bool {
        self.sessions.lock().await.contains_key(id)
    }

    /// Sorted identifiers of currently active streams.
    pub async fn list_active(&self) -> Vec<String> {
        let sessions = self.sessions.lock().await;
        let mut ids: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.is_active())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Composite status snapshot, or `None` when untracked.
    pub async fn status(&self, id: &str) -> Option<StreamStatus> {
        let sessions = self.sessions.lock().await;
        let s = sessions.get(id)?;
        Some(StreamStatus {
            is_active: s.is_active(),
            elapsed_secs: s.elapsed_secs(),
            video_position: s.resume_position(),
            base_position: s.base_position,
            retry_count: s.retry_count,
            last_log: s.logs.last().cloned(),
        })
    }

    /// Ordered log lines for one stream (empty when untracked).
    pub async fn logs(&self, id: &str) -> Vec<LogLine> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(id)
            .map(|s| s.logs.snapshot())
            .unwrap_or_default()
    }

    /// Current resume offset for one stream.
    pub async fn resume_position(&self, id: &str) -> Option<u64> {
        let sessions = self.sessions.lock().await;
        sessions.get(id).map(Session::resume_position)
    }

    /// Shifts the current instance's launch time into the past. Test-only
    /// hook for exercising elapsed-time arithmetic without waiting.
    #[cfg(test)]
    pub(crate) async fn backdate_started_at(&self, id: &str, by: std::time::Duration) {
        let mut sessions = self.sessions.lock().await;
        if let Some(s) = sessions.get_mut(id) {
            if let Some(t) = s.started_at {
                s.started_at = Some(t - by);
            }
        }
    }
}
