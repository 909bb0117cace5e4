//! # Stream supervisor: session lifecycle orchestration.
//!
//! [`StreamSupervisor`] owns the session registry, the event bus, and the
//! injected store contracts. It is the only component that starts or stops
//! encoder processes; the health monitor and the status reconciler drive
//! recovery *through* it rather than around it, so every lifecycle
//! invariant is enforced in one place.
//!
//! ## High-level architecture
//! ```text
//! start(id, resume)
//!     │  config lookup ─► media check ─► registry reservation
//!     ▼
//! spawn encoder ──► commit (epoch N) ──► durable status = live
//!     │                                      │
//!     ├─► stdout/stderr pumps ──► log ring + ProcessOutput events
//!     └─► watcher ── child.wait() ──► handle_exit(id, epoch N)
//!                                          │
//!                      ┌───────────────────┼──────────────────┐
//!                      ▼                   ▼                  ▼
//!                manual stop          clean exit       crash / error
//!                (row removed)     (offline, done)   bounded retry via
//!                                                    RetryPolicy delay
//!
//! Event flow:
//!   publish(Event) ──► Bus ──► listener ──► SubscriberSet ──► workers
//! ```
//!
//! ## Rules
//! - At most one live encoder per stream identifier; concurrent starts
//!   lose with [`StartError::AlreadyActive`].
//! - A deliberate [`stop`](StreamSupervisor::stop) always wins over the
//!   retry machinery, whatever order the exit notification lands in.
//! - Durable-store writes inside lifecycle callbacks are absorbed: the
//!   failure is published as an event and the in-memory state still
//!   converges (the reconciler repairs the record later).

use std::sync::Arc;

use tokio::sync::broadcast;

use super::spawn;
use crate::config::SupervisorConfig;
use crate::error::{StartError, StopError};
use crate::events::{Bus, Event, EventKind};
use crate::policies::RetryPolicy;
use crate::session::{LogLine, LogSource, SessionRegistry, StreamStatus};
use crate::stores::{
    EncodeSettings, HistoryStore, InvocationBuilder, SessionHistory, StreamStatusKind, StreamStore,
    TerminationScheduler, VideoStore,
};
use crate::subscribers::{Subscribe, SubscriberSet};

/// What a successful [`StreamSupervisor::start`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartOutcome {
    /// The encoder was launched at a nonzero playback offset.
    pub resumed: bool,
    /// Absolute playback offset the encoder was launched at.
    pub position: u64,
}

/// Builder wiring a [`StreamSupervisor`] from its injected collaborators.
///
/// Stream store, video store, and invocation builder are mandatory; the
/// history store and termination scheduler default to no-ops for
/// deployments that do not use them.
pub struct SupervisorBuilder {
    cfg: SupervisorConfig,
    streams: Arc<dyn StreamStore>,
    videos: Arc<dyn VideoStore>,
    invocations: Arc<dyn InvocationBuilder>,
    history: Option<Arc<dyn HistoryStore>>,
    scheduler: Option<Arc<dyn TerminationScheduler>>,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl SupervisorBuilder {
    /// Creates a builder over the mandatory collaborators.
    pub fn new(
        cfg: SupervisorConfig,
        streams: Arc<dyn StreamStore>,
        videos: Arc<dyn VideoStore>,
        invocations: Arc<dyn InvocationBuilder>,
    ) -> Self {
        Self {
            cfg,
            streams,
            videos,
            invocations,
            history: None,
            scheduler: None,
            subscribers: Vec::new(),
        }
    }

    /// Sets the completed-session history sink.
    pub fn with_history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    /// Sets the duration-limit termination scheduler.
    pub fn with_scheduler(mut self, scheduler: Arc<dyn TerminationScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive runtime events (session lifecycle, retries,
    /// recovery) through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds the supervisor and starts the subscriber fan-out listener.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Arc<StreamSupervisor> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let subs = Arc::new(SubscriberSet::new(self.subscribers, bus.clone()));

        // Forward bus events to the subscriber set (fire-and-forget).
        {
            let mut rx = bus.subscribe();
            let set = Arc::clone(&subs);
            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(ev) => set.emit_arc(Arc::new(ev)),
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
        }

        let policy = RetryPolicy {
            max_retries: self.cfg.max_retries,
            crash_delay: self.cfg.crash_delay,
            base_delay: self.cfg.retry_base_delay,
            max_delay: self.cfg.retry_max_delay,
            jitter: self.cfg.jitter,
        };
        let registry = SessionRegistry::new(self.cfg.log_capacity);

        Arc::new(StreamSupervisor {
            cfg: self.cfg,
            policy,
            bus,
            _subs: subs,
            registry,
            streams: self.streams,
            videos: self.videos,
            invocations: self.invocations,
            history: self.history.unwrap_or_else(|| Arc::new(NoopHistory)),
            scheduler: self.scheduler.unwrap_or_else(|| Arc::new(NoopScheduler)),
        })
    }
}

/// Orchestrates encoder sessions: start, stop, exit handling, retries.
pub struct StreamSupervisor {
    pub(super) cfg: SupervisorConfig,
    pub(super) policy: RetryPolicy,
    pub(super) bus: Bus,
    /// Keeps subscriber workers alive for the supervisor's lifetime.
    _subs: Arc<SubscriberSet>,
    pub(super) registry: SessionRegistry,
    pub(super) streams: Arc<dyn StreamStore>,
    pub(super) videos: Arc<dyn VideoStore>,
    pub(super) invocations: Arc<dyn InvocationBuilder>,
    pub(super) history: Arc<dyn HistoryStore>,
    pub(super) scheduler: Arc<dyn TerminationScheduler>,
}

impl StreamSupervisor {
    /// Starts an encoder session for `stream_id`.
    ///
    /// `resume = None` is a fresh start: playback begins at zero and the
    /// retry counter resets. `resume = Some(secs)` relaunches from an
    /// absolute offset (retry and recovery paths) and preserves the
    /// counter.
    ///
    /// On success the process is running, the session is registered, the
    /// durable status is live, and a duration limit (when configured) has
    /// been handed to the scheduler.
    pub async fn start(
        self: Arc<Self>,
        stream_id: &str,
        resume: Option<u64>,
    ) -> Result<StartOutcome, StartError> {
        let cfg = self
            .streams
            .find(stream_id)
            .await?
            .ok_or_else(|| StartError::NotFound(stream_id.to_string()))?;
        let video = self
            .videos
            .find(&cfg.video_id)
            .await?
            .ok_or_else(|| StartError::NotFound(cfg.video_id.clone()))?;
        if tokio::fs::metadata(&video.filepath).await.is_err() {
            return Err(StartError::MediaMissing(video.filepath));
        }

        let fresh = resume.is_none();
        let created = self.registry.begin_start(stream_id, fresh).await?;
        let position = resume.unwrap_or(0);

        self.bus.publish(
            Event::now(EventKind::SessionStarting)
                .with_stream(stream_id)
                .with_position(position),
        );

        let invocation =
            self.invocations
                .build(&video.filepath, &cfg.destination_url, position, &cfg.settings);
        let mut child = match spawn::spawn_encoder(&invocation) {
            Ok(child) => child,
            Err(source) => {
                self.registry.abort_start(stream_id, created).await;
                return Err(StartError::Spawn {
                    stream: stream_id.to_string(),
                    source,
                });
            }
        };
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let pid = child.id();

        let Some(epoch) = self.registry.commit_start(stream_id, pid, resume).await else {
            // The reservation vanished mid-spawn (force drop). Tear down.
            if let Some(pid) = pid {
                spawn::terminate(pid);
            }
            return Err(StartError::AlreadyActive(stream_id.to_string()));
        };

        if let Some(out) = stdout {
            spawn::spawn_output_pump(
                Arc::clone(&self),
                stream_id.to_string(),
                LogSource::Stdout,
                out,
            );
        }
        if let Some(err) = stderr {
            spawn::spawn_output_pump(
                Arc::clone(&self),
                stream_id.to_string(),
                LogSource::Stderr,
                err,
            );
        }
        spawn::spawn_watcher(Arc::clone(&self), stream_id.to_string(), epoch, child);

        self.set_status_absorbed(stream_id, StreamStatusKind::Live)
            .await;
        if let Some(limit) = cfg.duration_limit_secs {
            self.scheduler.schedule_stop(stream_id, limit).await;
        }

        let resumed = position > 0;
        self.bus.publish(
            Event::now(EventKind::SessionStarted)
                .with_stream(stream_id)
                .with_position(position)
                .with_reason(if resumed { "resumed" } else { "fresh" }),
        );
        Ok(StartOutcome { resumed, position })
    }

    /// Deliberately stops the stream's session.
    ///
    /// Cancels any pending scheduled restart, terminates the live process,
    /// marks the durable status offline, records a completed-session
    /// history entry, and clears tracked state. Manual stop always wins:
    /// the exit notification that follows the kill is recognized as
    /// deliberate and never schedules a retry.
    ///
    /// When nothing is tracked but the durable record still claims live
    /// (a crashed previous supervisor), the record is repaired to offline
    /// and the call still succeeds.
    pub async fn stop(&self, stream_id: &str) -> Result<(), StopError> {
        let Some(ms) = self.registry.begin_manual_stop(stream_id).await else {
            return self.repair_untracked_stop(stream_id).await;
        };

        if let Some(token) = ms.retry_cancel {
            token.cancel();
        }
        if let Some(pid) = ms.pid {
            spawn::terminate(pid);
        }

        self.set_status_absorbed(stream_id, StreamStatusKind::Offline)
            .await;
        self.scheduler.cancel(stream_id).await;

        if let Some(ran) = ms.ran_secs {
            self.record_history(stream_id, ran, ms.final_position).await;
        }
        self.bus
            .publish(Event::now(EventKind::SessionStopped).with_stream(stream_id));
        Ok(())
    }

    /// Stop requested for an untracked stream: either repair a stale live
    /// record or reject the request.
    async fn repair_untracked_stop(&self, stream_id: &str) -> Result<(), StopError> {
        match self.streams.find(stream_id).await {
            Ok(Some(cfg)) if cfg.status == StreamStatusKind::Live => {
                self.set_status_absorbed(stream_id, StreamStatusKind::Offline)
                    .await;
                self.scheduler.cancel(stream_id).await;
                self.bus.publish(
                    Event::now(EventKind::StatusRepaired)
                        .with_stream(stream_id)
                        .with_reason("stale_live_record"),
                );
                Ok(())
            }
            _ => Err(StopError::NotActive(stream_id.to_string())),
        }
    }

    // --- queries -----------------------------------------------------------

    /// True while a live process (or in-flight start) exists for this id.
    pub async fn is_active(&self, stream_id: &str) -> bool {
        self.registry.is_active(stream_id).await
    }

    /// Sorted identifiers of currently active streams.
    pub async fn list_active(&self) -> Vec<String> {
        self.registry.list_active().await
    }

    /// Composite status for one stream, or `None` when untracked.
    pub async fn status(&self, stream_id: &str) -> Option<StreamStatus> {
        self.registry.status(stream_id).await
    }

    /// Recent log lines for one stream (oldest first).
    pub async fn logs(&self, stream_id: &str) -> Vec<LogLine> {
        self.registry.logs(stream_id).await
    }

    /// Current absolute resume offset, or `None` when untracked.
    pub async fn resume_position(&self, stream_id: &str) -> Option<u64> {
        self.registry.resume_position(stream_id).await
    }

    /// Observes subsequent runtime events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Runtime configuration the supervisor was built with.
    pub fn config(&self) -> &SupervisorConfig {
        &self.cfg
    }

    // --- crate-internal plumbing ------------------------------------------

    pub(crate) fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub(crate) fn bus(&self) -> &Bus {
        &self.bus
    }

    pub(crate) fn streams(&self) -> &Arc<dyn StreamStore> {
        &self.streams
    }

    pub(crate) fn scheduler(&self) -> &Arc<dyn TerminationScheduler> {
        &self.scheduler
    }

    /// Drops a tracked session that has no durable record: terminates any
    /// live process, cancels pending scheduled stops, removes the row.
    pub(crate) async fn drop_orphan(&self, stream_id: &str) {
        if let Some(token) = self.registry.take_retry_cancel(stream_id).await {
            token.cancel();
        }
        if let Some(pid) = self.registry.drop_orphan(stream_id).await {
            spawn::terminate(pid);
        }
        self.scheduler.cancel(stream_id).await;
        self.bus
            .publish(Event::now(EventKind::OrphanDropped).with_stream(stream_id));
    }

    /// Writes the durable status, absorbing failures into a
    /// [`EventKind::StoreFailure`] event. Used on paths where nobody is
    /// waiting on the result and in-memory state must converge regardless.
    pub(crate) async fn set_status_absorbed(&self, stream_id: &str, status: StreamStatusKind) {
        if let Err(e) = self.streams.update_status(stream_id, status).await {
            self.bus.publish(
                Event::now(EventKind::StoreFailure)
                    .with_stream(stream_id)
                    .with_reason(format!("status update failed: {e}")),
            );
        }
    }

    /// Records a completed session, best effort. Sessions shorter than the
    /// configured minimum are skipped; store failures are absorbed.
    pub(super) async fn record_history(&self, stream_id: &str, ran_secs: u64, final_position: u64) {
        if ran_secs < self.cfg.min_history_secs {
            return;
        }
        let (title, settings) = match self.streams.find(stream_id).await {
            Ok(Some(cfg)) => {
                let title = match self.videos.find(&cfg.video_id).await {
                    Ok(Some(v)) => Some(v.title),
                    _ => None,
                };
                (title, cfg.settings)
            }
            _ => (None, EncodeSettings::default()),
        };
        let entry = SessionHistory {
            stream_id: stream_id.to_string(),
            title,
            duration_secs: ran_secs,
            final_position,
            settings,
        };
        if let Err(e) = self.history.record(entry).await {
            self.bus.publish(
                Event::now(EventKind::StoreFailure)
                    .with_stream(stream_id)
                    .with_reason(format!("history record failed: {e}")),
            );
        }
    }
}

/// Default history sink: drops every record.
struct NoopHistory;

#[async_trait::async_trait]
impl HistoryStore for NoopHistory {
    async fn record(&self, _history: SessionHistory) -> Result<(), crate::error::StoreError> {
        Ok(())
    }
}

/// Default scheduler: duration limits are ignored.
struct NoopScheduler;

#[async_trait::async_trait]
impl TerminationScheduler for NoopScheduler {
    async fn schedule_stop(&self, _stream_id: &str, _duration_secs: u64) {}
    async fn cancel(&self, _stream_id: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{expect_event, fast_config, fixture};
    use std::time::Duration;

    #[tokio::test]
    async fn second_start_is_rejected_while_active() {
        let fx = fixture("sleep 30", fast_config()).await;

        fx.sup.clone().start("s1", None).await.unwrap();
        assert!(matches!(
            fx.sup.clone().start("s1", None).await,
            Err(StartError::AlreadyActive(_))
        ));
        fx.sup.stop("s1").await.unwrap();
    }

    #[tokio::test]
    async fn start_unknown_stream_fails() {
        let fx = fixture("true", fast_config()).await;
        assert!(matches!(
            fx.sup.clone().start("nope", None).await,
            Err(StartError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn start_missing_media_fails() {
        let fx = fixture("true", fast_config()).await;
        fx.videos
            .set_path("v1", std::path::PathBuf::from("/nonexistent/movie.mp4"))
            .await;
        assert!(matches!(
            fx.sup.clone().start("s1", None).await,
            Err(StartError::MediaMissing(_))
        ));
        assert!(!fx.sup.is_active("s1").await);
    }

    #[tokio::test]
    async fn stop_terminates_and_clears_state() {
        let fx = fixture("sleep 30", fast_config()).await;
        let mut rx = fx.sup.subscribe();

        fx.sup.clone().start("s1", None).await.unwrap();
        assert!(fx.sup.is_active("s1").await);
        assert_eq!(
            fx.streams.status_of("s1").await,
            Some(StreamStatusKind::Live)
        );

        fx.sup.stop("s1").await.unwrap();
        expect_event(&mut rx, EventKind::SessionStopped).await;

        assert_eq!(
            fx.streams.status_of("s1").await,
            Some(StreamStatusKind::Offline)
        );
        assert!(fx.scheduler.cancelled().contains(&"s1".to_string()));

        // The watcher observes the kill and removes the session row.
        fx.wait_until_untracked("s1").await;
        // Stopping again: nothing tracked, record already offline.
        assert!(matches!(
            fx.sup.stop("s1").await,
            Err(StopError::NotActive(_))
        ));
    }

    #[tokio::test]
    async fn duration_limit_is_handed_to_scheduler() {
        let fx = fixture("sleep 30", fast_config()).await;
        fx.streams.set_duration_limit("s1", Some(3600)).await;

        fx.sup.clone().start("s1", None).await.unwrap();
        assert_eq!(fx.scheduler.scheduled(), vec![("s1".to_string(), 3600)]);
        fx.sup.stop("s1").await.unwrap();
    }

    #[tokio::test]
    async fn clean_exit_goes_offline_without_retry() {
        let fx = fixture("exit 0", fast_config()).await;
        let mut rx = fx.sup.subscribe();

        fx.sup.clone().start("s1", None).await.unwrap();
        let exited = expect_event(&mut rx, EventKind::ProcessExited).await;
        assert_eq!(exited.reason.as_deref(), Some("clean"));

        fx.wait_until_untracked("s1").await;
        assert_eq!(
            fx.streams.status_of("s1").await,
            Some(StreamStatusKind::Offline)
        );
        // No restart was attempted.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fx.builder.resumes().len(), 1);
    }

    #[tokio::test]
    async fn failed_exits_retry_with_bounded_budget() {
        let fx = fixture("exit 1", fast_config()).await;
        let mut rx = fx.sup.subscribe();

        fx.sup.clone().start("s1", None).await.unwrap();

        for expected in 1..=3u32 {
            let ev = expect_event(&mut rx, EventKind::RetryScheduled).await;
            assert_eq!(ev.attempt, Some(expected));
            assert_eq!(ev.reason.as_deref(), Some("process_error"));
        }
        let exhausted = expect_event(&mut rx, EventKind::RetryExhausted).await;
        assert_eq!(exhausted.attempt, Some(3));

        // Initial launch plus three retries, no more.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(fx.builder.resumes().len(), 4);

        // Retry count stays frozen at the budget; status goes offline.
        assert_eq!(fx.sup.status("s1").await.unwrap().retry_count, 3);
        assert_eq!(
            fx.streams.status_of("s1").await,
            Some(StreamStatusKind::Offline)
        );
    }

    #[tokio::test]
    async fn fresh_start_after_exhaustion_launches_at_zero() {
        let fx = fixture("exit 1", fast_config()).await;
        let mut rx = fx.sup.subscribe();

        // Run a mid-video session into the ground.
        fx.sup.clone().start("s1", Some(500)).await.unwrap();
        expect_event(&mut rx, EventKind::RetryExhausted).await;

        // The fresh start must launch at 0 and the session must report 0,
        // not the dead incarnation's offset.
        fx.sup.clone().start("s1", None).await.unwrap();
        assert_eq!(fx.builder.resumes().last(), Some(&0));
        let st = fx.sup.status("s1").await.unwrap();
        assert_eq!(st.base_position, 0);
        assert!(st.video_position < 500);
        fx.sup.stop("s1").await.unwrap();
    }

    #[tokio::test]
    async fn start_at_offset_zero_is_not_a_resume() {
        let fx = fixture("sleep 30", fast_config()).await;

        let out = fx.sup.clone().start("s1", Some(0)).await.unwrap();
        assert_eq!(out.position, 0);
        assert!(!out.resumed);
        fx.sup.stop("s1").await.unwrap();
    }

    #[tokio::test]
    async fn manual_stop_cancels_pending_retry() {
        let mut cfg = fast_config();
        cfg.retry_base_delay = Duration::from_secs(30);
        let fx = fixture("exit 1", cfg).await;
        let mut rx = fx.sup.subscribe();

        fx.sup.clone().start("s1", None).await.unwrap();
        expect_event(&mut rx, EventKind::RetryScheduled).await;

        fx.sup.stop("s1").await.unwrap();
        let aborted = expect_event(&mut rx, EventKind::RetryAborted).await;
        assert_eq!(aborted.reason.as_deref(), Some("cancelled"));

        // The pending restart never fired.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fx.builder.resumes().len(), 1);
        assert!(!fx.sup.is_active("s1").await);
    }

    #[tokio::test]
    async fn stop_untracked_repairs_stale_live_record() {
        let fx = fixture("true", fast_config()).await;
        let mut rx = fx.sup.subscribe();
        fx.streams.set_status("s1", StreamStatusKind::Live).await;

        fx.sup.stop("s1").await.unwrap();
        let repaired = expect_event(&mut rx, EventKind::StatusRepaired).await;
        assert_eq!(repaired.reason.as_deref(), Some("stale_live_record"));
        assert_eq!(
            fx.streams.status_of("s1").await,
            Some(StreamStatusKind::Offline)
        );

        assert!(matches!(
            fx.sup.stop("s1").await,
            Err(StopError::NotActive(_))
        ));
    }

    #[tokio::test]
    async fn stop_records_session_history() {
        let mut cfg = fast_config();
        cfg.min_history_secs = 0;
        let fx = fixture("sleep 30", cfg).await;

        fx.sup.clone().start("s1", None).await.unwrap();
        fx.sup.stop("s1").await.unwrap();

        let records = fx.history.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].stream_id, "s1");
        assert_eq!(records[0].title.as_deref(), Some("test clip"));
    }
}
