//! # Durable-status reconciliation.
//!
//! The durable store and the in-memory registry drift when a status write
//! is absorbed after a failure, when a previous supervisor died with live
//! records, or when a stream record is deleted under a running session.
//! [`StatusReconciler`] periodically scans the full record list and drives
//! both sides back together:
//!
//! - record says **live**, nothing tracked → relaunch; if the relaunch
//!   fails, force the record offline.
//! - record says **offline**, session active → repair the record to live.
//! - session tracked, **no record at all** → orphan: terminate and drop.
//!
//! Every repair converges: running the scan twice in a row performs no
//! writes the second time.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::events::{Event, EventKind};
use crate::stores::StreamStatusKind;
use crate::supervisor::StreamSupervisor;

/// Periodic scan repairing drift between durable records and live state.
pub struct StatusReconciler {
    sup: Arc<StreamSupervisor>,
}

impl StatusReconciler {
    /// Creates a reconciler over the given supervisor.
    pub fn new(sup: Arc<StreamSupervisor>) -> Arc<Self> {
        Arc::new(Self { sup })
    }

    /// Spawns the scan loop; runs until the token is cancelled.
    pub fn spawn(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let reconciler = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(reconciler.sup.config().reconcile_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tick.tick() => reconciler.reconcile().await,
                }
            }
        })
    }

    /// Runs one full scan.
    pub async fn reconcile(&self) {
        let records = match self.sup.streams().list().await {
            Ok(records) => records,
            Err(e) => {
                // Without the record list nothing can be repaired safely.
                self.sup.bus().publish(
                    Event::now(EventKind::StoreFailure)
                        .with_reason(format!("reconcile list failed: {e}")),
                );
                return;
            }
        };
        let known: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();

        // Tracked sessions whose record vanished.
        for id in self.sup.registry().list_active().await {
            if !known.contains(id.as_str()) {
                self.sup.drop_orphan(&id).await;
            }
        }

        for record in records {
            let tracked = self.sup.registry().contains(&record.id).await;
            let active = self.sup.registry().is_active(&record.id).await;

            match record.status {
                // A tracked-but-inactive session (restart pending) is
                // supervision in progress, not drift.
                StreamStatusKind::Live if !tracked => {
                    match Arc::clone(&self.sup).start(&record.id, None).await {
                        Ok(_) => {}
                        Err(_) => {
                            self.sup
                                .set_status_absorbed(&record.id, StreamStatusKind::Offline)
                                .await;
                            self.sup.bus().publish(
                                Event::now(EventKind::StatusRepaired)
                                    .with_stream(record.id.as_str())
                                    .with_reason("live_without_session"),
                            );
                        }
                    }
                }
                StreamStatusKind::Offline if active => {
                    self.sup
                        .set_status_absorbed(&record.id, StreamStatusKind::Live)
                        .await;
                    self.sup.bus().publish(
                        Event::now(EventKind::StatusRepaired)
                            .with_stream(record.id.as_str())
                            .with_reason("session_without_live"),
                    );
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{expect_event, fast_config, fixture};

    #[tokio::test]
    async fn relaunches_live_record_without_session() {
        let fx = fixture("sleep 30", fast_config()).await;
        fx.streams.set_status("s1", StreamStatusKind::Live).await;
        let reconciler = StatusReconciler::new(fx.sup.clone());

        reconciler.reconcile().await;
        assert!(fx.sup.is_active("s1").await);
        assert_eq!(fx.builder.resumes(), vec![0]);

        // Converged: a second scan writes nothing and spawns nothing.
        let writes = fx.streams.update_calls();
        reconciler.reconcile().await;
        assert_eq!(fx.streams.update_calls(), writes);
        assert_eq!(fx.builder.resumes(), vec![0]);
        fx.sup.stop("s1").await.unwrap();
    }

    #[tokio::test]
    async fn forces_offline_when_relaunch_fails() {
        let fx = fixture("sleep 30", fast_config()).await;
        let mut rx = fx.sup.subscribe();
        fx.streams.set_status("s1", StreamStatusKind::Live).await;
        fx.videos
            .set_path("v1", std::path::PathBuf::from("/nonexistent/movie.mp4"))
            .await;
        let reconciler = StatusReconciler::new(fx.sup.clone());

        reconciler.reconcile().await;
        let repaired = expect_event(&mut rx, EventKind::StatusRepaired).await;
        assert_eq!(repaired.reason.as_deref(), Some("live_without_session"));
        assert_eq!(
            fx.streams.status_of("s1").await,
            Some(StreamStatusKind::Offline)
        );

        let writes = fx.streams.update_calls();
        reconciler.reconcile().await;
        assert_eq!(fx.streams.update_calls(), writes);
    }

    #[tokio::test]
    async fn repairs_offline_record_under_active_session() {
        let fx = fixture("sleep 30", fast_config()).await;
        let mut rx = fx.sup.subscribe();
        let reconciler = StatusReconciler::new(fx.sup.clone());

        fx.sup.clone().start("s1", None).await.unwrap();
        fx.streams.set_status("s1", StreamStatusKind::Offline).await;

        reconciler.reconcile().await;
        let repaired = expect_event(&mut rx, EventKind::StatusRepaired).await;
        assert_eq!(repaired.reason.as_deref(), Some("session_without_live"));
        assert_eq!(
            fx.streams.status_of("s1").await,
            Some(StreamStatusKind::Live)
        );

        let writes = fx.streams.update_calls();
        reconciler.reconcile().await;
        assert_eq!(fx.streams.update_calls(), writes);
        fx.sup.stop("s1").await.unwrap();
    }

    #[tokio::test]
    async fn drops_sessions_without_records() {
        let fx = fixture("sleep 30", fast_config()).await;
        let mut rx = fx.sup.subscribe();
        let reconciler = StatusReconciler::new(fx.sup.clone());

        fx.sup.clone().start("s1", None).await.unwrap();
        fx.streams.remove("s1").await;

        reconciler.reconcile().await;
        expect_event(&mut rx, EventKind::OrphanDropped).await;
        assert!(!fx.sup.is_active("s1").await);
        assert!(fx.sup.status("s1").await.is_none());
        assert!(fx.scheduler.cancelled().contains(&"s1".to_string()));

        // Nothing left to repair on the next scan.
        reconciler.reconcile().await;
        assert!(fx.sup.status("s1").await.is_none());
    }
}
