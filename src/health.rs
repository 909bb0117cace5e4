//! # Periodic health monitoring and forced recovery.
//!
//! [`HealthMonitor`] sweeps every active session on a fixed cadence and
//! applies two independent checks:
//!
//! - **Stall**: the session has been running longer than the stall window
//!   yet produced no output for that long. Encoders wedge silently when
//!   the remote endpoint stops reading; exit-based supervision never sees
//!   it, so the monitor forces a stop/restart at the captured position.
//! - **Evaluation failure**: the durable record cannot be read or is
//!   missing. One bad read is noise; [`SupervisorConfig::failure_threshold`]
//!   consecutive failures force the same recovery with a longer settle.
//!
//! Recovery always goes through the supervisor's own `stop`/`start`, so
//! every invariant (single process, manual-stop precedence, epoch guard)
//! holds on this path too.
//!
//! [`SupervisorConfig::failure_threshold`]: crate::config::SupervisorConfig

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::events::{Event, EventKind};
use crate::stores::StreamStatusKind;
use crate::supervisor::StreamSupervisor;

/// Outcome of one health evaluation.
enum Verdict {
    Healthy,
    /// Stalled; recover from this absolute position.
    Stalled { resume: u64 },
}

/// Per-stream observation state, created on first check and dropped when
/// the stream stops being active.
struct HealthRecord {
    consecutive_failures: u32,
    last_checked_at: Instant,
}

/// Periodic health sweeper over active sessions.
pub struct HealthMonitor {
    sup: Arc<StreamSupervisor>,
    records: Mutex<HashMap<String, HealthRecord>>,
}

impl HealthMonitor {
    /// Creates a monitor over the given supervisor.
    pub fn new(sup: Arc<StreamSupervisor>) -> Arc<Self> {
        Arc::new(Self {
            sup,
            records: Mutex::new(HashMap::new()),
        })
    }

    /// Spawns the sweep loop; runs until the token is cancelled.
    pub fn spawn(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(monitor.sup.config().health_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tick.tick() => monitor.sweep().await,
                }
            }
        })
    }

    /// Checks every active session once and prunes observation records of
    /// streams that are no longer active.
    pub async fn sweep(&self) {
        let ids = self.sup.list_active().await;
        self.records
            .lock()
            .await
            .retain(|id, _| ids.contains(id));
        for id in ids {
            self.check_stream(&id).await;
        }
    }

    /// Evaluates one stream; returns whether recovery was triggered.
    ///
    /// Unhealthy streams are acted on immediately: a stall forces recovery
    /// right away, an evaluation failure counts toward the threshold.
    pub async fn check_stream(&self, stream_id: &str) -> bool {
        match self.evaluate(stream_id).await {
            Ok(Verdict::Healthy) => {
                self.mark_healthy(stream_id).await;
                false
            }
            Ok(Verdict::Stalled { resume }) => {
                self.mark_healthy(stream_id).await;
                self.sup.bus().publish(
                    Event::now(EventKind::StallDetected)
                        .with_stream(stream_id)
                        .with_position(resume),
                );
                self.recover(stream_id, resume, self.sup.config().stall_settle)
                    .await;
                true
            }
            Err(reason) => {
                let count = self.bump_failures(stream_id).await;
                self.sup.bus().publish(
                    Event::now(EventKind::HealthCheckFailed)
                        .with_stream(stream_id)
                        .with_attempt(count)
                        .with_reason(reason),
                );
                if count >= self.sup.config().failure_threshold {
                    self.mark_healthy(stream_id).await;
                    let resume = self.sup.resume_position(stream_id).await.unwrap_or(0);
                    self.recover(stream_id, resume, self.sup.config().failure_settle)
                        .await;
                    return true;
                }
                false
            }
        }
    }

    /// One evaluation: session state plus durable record, then the stall
    /// window. `Err` is an evaluation failure with its reason.
    async fn evaluate(&self, stream_id: &str) -> Result<Verdict, String> {
        let status = self
            .sup
            .status(stream_id)
            .await
            .ok_or_else(|| "untracked".to_string())?;

        let record = self
            .sup
            .streams()
            .find(stream_id)
            .await
            .map_err(|e| format!("store failure: {e}"))?;
        if record.is_none() {
            return Err("record_missing".to_string());
        }

        if status.is_active {
            let stall = self.sup.config().stall_timeout;
            let elapsed = Duration::from_secs(status.elapsed_secs);
            let silent = status
                .last_log
                .map(|l| l.at.elapsed().unwrap_or_default())
                .unwrap_or(elapsed);
            if elapsed > stall && silent > stall {
                return Ok(Verdict::Stalled {
                    resume: status.video_position,
                });
            }
        }
        Ok(Verdict::Healthy)
    }

    /// Stop, settle, restart at the captured position.
    async fn recover(&self, stream_id: &str, resume: u64, settle: Duration) {
        // The session may already be gone; recovery proceeds regardless.
        let _ = self.sup.stop(stream_id).await;
        tokio::time::sleep(settle).await;

        match Arc::clone(&self.sup).start(stream_id, Some(resume)).await {
            Ok(out) => {
                self.sup.bus().publish(
                    Event::now(EventKind::RecoverySucceeded)
                        .with_stream(stream_id)
                        .with_position(out.position),
                );
            }
            Err(e) => {
                self.sup.bus().publish(
                    Event::now(EventKind::RecoveryFailed)
                        .with_stream(stream_id)
                        .with_reason(e.as_label()),
                );
                self.sup
                    .set_status_absorbed(stream_id, StreamStatusKind::Offline)
                    .await;
                self.sup.scheduler().cancel(stream_id).await;
            }
        }
    }

    /// Timestamp of the stream's most recent evaluation, if it has one.
    pub async fn last_checked(&self, stream_id: &str) -> Option<Instant> {
        self.records
            .lock()
            .await
            .get(stream_id)
            .map(|r| r.last_checked_at)
    }

    async fn bump_failures(&self, stream_id: &str) -> u32 {
        let mut records = self.records.lock().await;
        let record = records
            .entry(stream_id.to_string())
            .or_insert(HealthRecord {
                consecutive_failures: 0,
                last_checked_at: Instant::now(),
            });
        record.consecutive_failures += 1;
        record.last_checked_at = Instant::now();
        record.consecutive_failures
    }

    async fn mark_healthy(&self, stream_id: &str) {
        let mut records = self.records.lock().await;
        let record = records
            .entry(stream_id.to_string())
            .or_insert(HealthRecord {
                consecutive_failures: 0,
                last_checked_at: Instant::now(),
            });
        record.consecutive_failures = 0;
        record.last_checked_at = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{expect_event, fast_config, fixture};

    #[tokio::test]
    async fn healthy_stream_is_left_alone() {
        let mut cfg = fast_config();
        cfg.stall_timeout = Duration::from_millis(500);
        let fx = fixture("while true; do echo tick; sleep 0.1; done", cfg).await;
        let monitor = HealthMonitor::new(fx.sup.clone());

        fx.sup.clone().start("s1", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1200)).await;

        assert!(!monitor.check_stream("s1").await);
        assert!(monitor.last_checked("s1").await.is_some());
        assert_eq!(fx.builder.resumes().len(), 1);
        fx.sup.stop("s1").await.unwrap();
    }

    #[tokio::test]
    async fn stalled_stream_is_recovered_at_position() {
        let mut cfg = fast_config();
        cfg.stall_timeout = Duration::from_millis(500);
        cfg.stall_settle = Duration::from_millis(10);
        let fx = fixture("echo starting; sleep 30", cfg).await;
        let monitor = HealthMonitor::new(fx.sup.clone());
        let mut rx = fx.sup.subscribe();

        fx.sup.clone().start("s1", None).await.unwrap();
        // Long enough that both the run time and the output silence exceed
        // the stall window.
        tokio::time::sleep(Duration::from_millis(1300)).await;

        monitor.sweep().await;
        expect_event(&mut rx, EventKind::StallDetected).await;
        let recovered = expect_event(&mut rx, EventKind::RecoverySucceeded).await;

        // Restarted from the elapsed position, not from zero.
        assert!(recovered.position.unwrap() >= 1);
        let resumes = fx.builder.resumes();
        assert_eq!(resumes.len(), 2);
        assert!(resumes[1] >= 1);
        assert!(fx.sup.is_active("s1").await);
        fx.sup.stop("s1").await.unwrap();
    }

    #[tokio::test]
    async fn repeated_evaluation_failures_force_recovery() {
        let fx = fixture("sleep 30", fast_config()).await;
        let monitor = HealthMonitor::new(fx.sup.clone());
        let mut rx = fx.sup.subscribe();

        fx.sup.clone().start("s1", None).await.unwrap();
        fx.streams.fail_reads(true);

        for expected in 1..=2u32 {
            assert!(!monitor.check_stream("s1").await);
            let ev = expect_event(&mut rx, EventKind::HealthCheckFailed).await;
            assert_eq!(ev.attempt, Some(expected));
        }
        // Third failure crosses the threshold: recovery runs, and with the
        // store still down the restart fails and the session goes offline.
        assert!(monitor.check_stream("s1").await);
        let ev = expect_event(&mut rx, EventKind::HealthCheckFailed).await;
        assert_eq!(ev.attempt, Some(3));
        let failed = expect_event(&mut rx, EventKind::RecoveryFailed).await;
        assert_eq!(failed.reason.as_deref(), Some("start_store_failure"));
        assert!(!fx.sup.is_active("s1").await);
    }

    #[tokio::test]
    async fn missing_record_counts_as_evaluation_failure() {
        let fx = fixture("sleep 30", fast_config()).await;
        let monitor = HealthMonitor::new(fx.sup.clone());
        let mut rx = fx.sup.subscribe();

        fx.sup.clone().start("s1", None).await.unwrap();
        fx.streams.remove("s1").await;

        assert!(!monitor.check_stream("s1").await);
        let ev = expect_event(&mut rx, EventKind::HealthCheckFailed).await;
        assert_eq!(ev.reason.as_deref(), Some("record_missing"));
        fx.sup.stop("s1").await.unwrap();
    }

    #[tokio::test]
    async fn one_recovered_evaluation_resets_the_counter() {
        let fx = fixture("sleep 30", fast_config()).await;
        let monitor = HealthMonitor::new(fx.sup.clone());

        fx.sup.clone().start("s1", None).await.unwrap();

        fx.streams.fail_reads(true);
        assert!(!monitor.check_stream("s1").await);
        assert!(!monitor.check_stream("s1").await);
        fx.streams.fail_reads(false);
        // A healthy evaluation: no recovery, counter back to zero.
        assert!(!monitor.check_stream("s1").await);

        // Two more failures stay below the threshold.
        fx.streams.fail_reads(true);
        assert!(!monitor.check_stream("s1").await);
        assert!(!monitor.check_stream("s1").await);
        fx.streams.fail_reads(false);
        assert!(fx.sup.is_active("s1").await);
        fx.sup.stop("s1").await.unwrap();
    }
}
