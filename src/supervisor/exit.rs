//! # Process-exit handling and the retry pipeline.
//!
//! The watcher task funnels every termination here. The handler is
//! epoch-guarded: a notification for an instance that has since been
//! replaced is dropped by the registry, so a slow `wait()` can never
//! corrupt the state of a newer instance.
//!
//! ## Exit classes
//! - **manual** — a deliberate stop already did the bookkeeping; only the
//!   session row is left to remove.
//! - **clean** (code 0) — the media finished; offline, record history, done.
//! - **crash** (killed by a fault signal) — retry after the fixed crash
//!   delay.
//! - **error** (non-zero code, or `wait` itself failing) — retry with
//!   exponential backoff.
//!
//! Scheduled restarts are cancellable (manual stop wins while they sleep)
//! and re-validate the durable record before firing: a stream deleted
//! during the wait is abandoned, not resurrected.

use std::io;
use std::process::ExitStatus;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::core::StreamSupervisor;
use crate::events::{Event, EventKind};
use crate::policies::FailureKind;
use crate::session::RetryDecision;
use crate::stores::StreamStatusKind;

/// How a process instance ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitClass {
    Clean,
    Failed(FailureKind),
}

/// Classifies a `wait()` result. A failed wait is treated as an error
/// exit: the process is gone either way and the session should retry.
fn classify(status: &io::Result<ExitStatus>) -> (ExitClass, Option<i32>) {
    match status {
        Ok(st) => {
            #[cfg(unix)]
            {
                use std::os::unix::process::ExitStatusExt;
                if st.signal().is_some() {
                    return (ExitClass::Failed(FailureKind::Crash), None);
                }
            }
            match st.code() {
                Some(0) => (ExitClass::Clean, Some(0)),
                Some(code) => (ExitClass::Failed(FailureKind::Error(Some(code))), Some(code)),
                None => (ExitClass::Failed(FailureKind::Error(None)), None),
            }
        }
        Err(_) => (ExitClass::Failed(FailureKind::Error(None)), None),
    }
}

impl StreamSupervisor {
    /// Handles the termination of instance `epoch` of `stream_id`.
    pub(super) async fn handle_exit(
        self: Arc<Self>,
        stream_id: &str,
        epoch: u64,
        status: io::Result<ExitStatus>,
    ) {
        let Some(outcome) = self.registry.on_exit(stream_id, epoch).await else {
            // Stale instance or already-dropped session.
            return;
        };

        let (class, code) = classify(&status);
        let reason = match class {
            ExitClass::Clean => "clean",
            ExitClass::Failed(kind) => kind.as_label(),
        };
        let mut ev = Event::now(EventKind::ProcessExited)
            .with_stream(stream_id)
            .with_reason(reason);
        if let Some(code) = code {
            ev = ev.with_exit_code(code);
        }
        self.bus.publish(ev);

        if outcome.manual_stop {
            // stop() already wrote status, cancelled the scheduler, and
            // recorded history; the flagged row is all that is left.
            self.registry.remove(stream_id).await;
            return;
        }

        match class {
            ExitClass::Clean => {
                self.registry.remove(stream_id).await;
                self.set_status_absorbed(stream_id, StreamStatusKind::Offline)
                    .await;
                self.scheduler.cancel(stream_id).await;
                self.record_history(stream_id, outcome.ran_secs, outcome.final_position)
                    .await;
            }
            ExitClass::Failed(kind) => self.schedule_retry(stream_id, kind).await,
        }
    }

    /// Bumps the retry counter and either schedules a cancellable restart
    /// or declares the session terminally offline.
    async fn schedule_retry(self: Arc<Self>, stream_id: &str, kind: FailureKind) {
        match self
            .registry
            .bump_retry(stream_id, self.policy.max_retries)
            .await
        {
            None => {} // row gone, nothing to restart
            Some(RetryDecision::Exhausted { count }) => {
                self.bus.publish(
                    Event::now(EventKind::RetryExhausted)
                        .with_stream(stream_id)
                        .with_attempt(count),
                );
                self.set_status_absorbed(stream_id, StreamStatusKind::Offline)
                    .await;
                self.scheduler.cancel(stream_id).await;
            }
            Some(RetryDecision::Retry { attempt, resume }) => {
                let delay = self.policy.delay(kind, attempt);

                // Register the cancel token before announcing the retry, so
                // a stop reacting to the event always finds it.
                let token = CancellationToken::new();
                self.registry
                    .set_retry_cancel(stream_id, token.clone())
                    .await;

                self.bus.publish(
                    Event::now(EventKind::RetryScheduled)
                        .with_stream(stream_id)
                        .with_attempt(attempt)
                        .with_delay(delay)
                        .with_position(resume)
                        .with_reason(kind.as_label()),
                );

                let sup = Arc::clone(&self);
                let id = stream_id.to_string();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = token.cancelled() => {
                            sup.bus.publish(
                                Event::now(EventKind::RetryAborted)
                                    .with_stream(id.as_str())
                                    .with_reason("cancelled"),
                            );
                        }
                        _ = tokio::time::sleep(delay) => {
                            sup.registry.take_retry_cancel(&id).await;
                            sup.fire_retry(&id, resume).await;
                        }
                    }
                });
            }
        }
    }

    /// Executes a due restart: re-validates session and durable record,
    /// then starts from the captured resume offset.
    async fn fire_retry(self: Arc<Self>, stream_id: &str, resume: u64) {
        if !self.registry.contains(stream_id).await {
            // Manually stopped (or dropped) while the retry slept.
            self.bus.publish(
                Event::now(EventKind::RetryAborted)
                    .with_stream(stream_id)
                    .with_reason("cancelled"),
            );
            return;
        }
        match self.streams.find(stream_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                // Deleted during the wait: abandon, do not resurrect.
                self.registry.remove(stream_id).await;
                self.bus.publish(
                    Event::now(EventKind::RetryAborted)
                        .with_stream(stream_id)
                        .with_reason("record_deleted"),
                );
                return;
            }
            Err(e) => {
                self.bus.publish(
                    Event::now(EventKind::RetryAborted)
                        .with_stream(stream_id)
                        .with_reason(format!("store failure: {e}")),
                );
                return;
            }
        }

        match Arc::clone(&self).start(stream_id, Some(resume)).await {
            Ok(_) => {}
            Err(crate::error::StartError::AlreadyActive(_)) => {
                // Someone else (recovery, operator) brought it up first.
                self.bus.publish(
                    Event::now(EventKind::RetryAborted)
                        .with_stream(stream_id)
                        .with_reason("already_active"),
                );
            }
            Err(e) => {
                self.bus.publish(
                    Event::now(EventKind::RetryAborted)
                        .with_stream(stream_id)
                        .with_reason(e.as_label()),
                );
                self.set_status_absorbed(stream_id, StreamStatusKind::Offline)
                    .await;
                self.scheduler.cancel(stream_id).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{expect_event, fast_config, fixture};

    #[cfg(unix)]
    #[test]
    fn classifies_raw_wait_statuses() {
        use std::os::unix::process::ExitStatusExt;

        let clean = Ok(ExitStatus::from_raw(0));
        assert_eq!(classify(&clean), (ExitClass::Clean, Some(0)));

        // Exit code 1 lives in the high byte of a wait status.
        let error = Ok(ExitStatus::from_raw(1 << 8));
        assert_eq!(
            classify(&error),
            (ExitClass::Failed(FailureKind::Error(Some(1))), Some(1))
        );

        // Killed by SIGKILL.
        let crashed = Ok(ExitStatus::from_raw(9));
        assert_eq!(
            classify(&crashed),
            (ExitClass::Failed(FailureKind::Crash), None)
        );

        let failed_wait: io::Result<ExitStatus> =
            Err(io::Error::new(io::ErrorKind::Other, "wait failed"));
        assert_eq!(
            classify(&failed_wait),
            (ExitClass::Failed(FailureKind::Error(None)), None)
        );
    }

    #[tokio::test]
    async fn signal_kill_retries_with_fixed_crash_delay() {
        let fx = fixture("kill -KILL $$", fast_config()).await;
        let mut rx = fx.sup.subscribe();

        fx.sup.clone().start("s1", None).await.unwrap();
        let exited = expect_event(&mut rx, EventKind::ProcessExited).await;
        assert_eq!(exited.reason.as_deref(), Some("process_fault"));

        let retry = expect_event(&mut rx, EventKind::RetryScheduled).await;
        assert_eq!(retry.reason.as_deref(), Some("process_fault"));
        assert_eq!(
            retry.delay_ms,
            Some(fx.sup.config().crash_delay.as_millis() as u32)
        );
        fx.sup.stop("s1").await.unwrap();
    }

    #[tokio::test]
    async fn retry_is_abandoned_when_record_is_deleted() {
        let fx = fixture("exit 1", fast_config()).await;
        let mut rx = fx.sup.subscribe();

        fx.sup.clone().start("s1", None).await.unwrap();
        expect_event(&mut rx, EventKind::RetryScheduled).await;
        fx.streams.remove("s1").await;

        let aborted = expect_event(&mut rx, EventKind::RetryAborted).await;
        assert_eq!(aborted.reason.as_deref(), Some("record_deleted"));
        assert!(!fx.sup.is_active("s1").await);
        assert!(fx.sup.status("s1").await.is_none());
    }

    #[tokio::test]
    async fn resume_position_survives_retry_cycles() {
        let fx = fixture("exit 1", fast_config()).await;
        let mut rx = fx.sup.subscribe();

        // Seed a resume offset: the session starts "mid-video".
        fx.sup.clone().start("s1", Some(500)).await.unwrap();

        let retry = expect_event(&mut rx, EventKind::RetryScheduled).await;
        // The process died within a second; the offset carries forward.
        assert_eq!(retry.position, Some(500));
        fx.sup.stop("s1").await.unwrap();
    }
}
