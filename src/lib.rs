//! # streamvisor
//!
//! **Streamvisor** supervises long-running media-encoder processes that
//! push video to remote ingest endpoints.
//!
//! It keeps each stream's encoder alive across crashes and transient
//! endpoint failures, resumes playback where the previous instance left
//! off, detects silent stalls, and keeps the durable "live/offline" record
//! honest. The crate is storage-agnostic: databases, HTTP APIs, and the
//! encoder command line all enter through injected traits.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   start(id) / stop(id)                     durable stores (injected)
//!          │                              ┌──────────────────────────────┐
//!          ▼                              │ StreamStore   VideoStore     │
//! ┌────────────────────────────────┐      │ HistoryStore  TermScheduler  │
//! │  StreamSupervisor              │◄────►│ InvocationBuilder            │
//! │  - SessionRegistry (one row    │      └──────────────────────────────┘
//! │    per stream: process handle, │
//! │    position, retry count, log) │            ┌───────────────────┐
//! │  - RetryPolicy (crash/error)   │◄─ sweeps ──│  HealthMonitor    │
//! │  - Bus (broadcast events)      │            │  (stall + checks) │
//! │  - SubscriberSet (fan-out)     │            └───────────────────┘
//! └──────┬─────────────────────────┘            ┌───────────────────┐
//!        ▼ per session                 ◄─ scans │ StatusReconciler  │
//! ┌──────────────┐ ┌──────────────┐             │ (record ↔ state)  │
//! │ encoder proc │ │ encoder proc │             └───────────────────┘
//! │ + out pumps  │ │ + out pumps  │
//! │ + watcher    │ │ + watcher    │
//! └──────────────┘ └──────────────┘
//! ```
//!
//! ### Session lifecycle
//! ```text
//! start(id, resume)
//!   ├─► config + media lookup
//!   ├─► registry reservation          (refuses a second live session)
//!   ├─► spawn encoder (own session, piped output)
//!   └─► commit: epoch += 1, durable status = live
//!
//! watcher: child.wait() ──► handle_exit(id, epoch)
//!   ├─ stale epoch        ─► ignored (a newer instance owns the session)
//!   ├─ manual stop        ─► row removed, done (stop() did the rest)
//!   ├─ clean exit (0)     ─► offline, history recorded, done
//!   ├─ crash (signal)     ─► retry after fixed crash delay
//!   └─ error (code != 0)  ─► retry after exponential backoff
//!
//! retry (cancellable, bounded by max_retries):
//!   sleep(delay) ─► re-validate record ─► start(id, Some(position))
//!   exhausted    ─► RetryExhausted, offline, counter frozen
//! ```
//!
//! ## Features
//! | Area               | Description                                                   | Key types / traits                          |
//! |--------------------|---------------------------------------------------------------|---------------------------------------------|
//! | **Supervision**    | Start/stop encoder sessions, bounded retries, resume offsets. | [`StreamSupervisor`], [`SupervisorBuilder`] |
//! | **Health**         | Stall detection and forced stop/restart recovery.             | [`HealthMonitor`]                           |
//! | **Reconciliation** | Repairs drift between durable records and live state.         | [`StatusReconciler`]                        |
//! | **Stores**         | Injected persistence and encoder contracts.                   | [`StreamStore`], [`VideoStore`], [`InvocationBuilder`] |
//! | **Subscriber API** | Hook into runtime events (logging, metrics, alerting).        | [`Subscribe`], [`SubscriberSet`]            |
//! | **Policies**       | Per-failure-class restart delays with optional jitter.        | [`RetryPolicy`], [`JitterPolicy`]           |
//! | **Errors**         | Typed caller-facing errors with stable labels.                | [`StartError`], [`StopError`]               |
//! | **Configuration**  | Centralized runtime settings.                                 | [`SupervisorConfig`]                        |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] _(demo/reference only)_.
//!
//! ## Example
//! ```rust,no_run
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use streamvisor::{
//!     EncodeSettings, FfmpegBuilder, StoreError, StreamConfig, StreamStatusKind, StreamStore,
//!     SupervisorBuilder, SupervisorConfig, VideoRecord, VideoStore,
//! };
//!
//! struct Streams;
//!
//! #[async_trait]
//! impl StreamStore for Streams {
//!     async fn find(&self, id: &str) -> Result<Option<StreamConfig>, StoreError> {
//!         Ok(Some(StreamConfig {
//!             id: id.to_string(),
//!             video_id: "clip".into(),
//!             destination_url: "rtmp://ingest.example/live/key".into(),
//!             status: StreamStatusKind::Offline,
//!             duration_limit_secs: None,
//!             settings: EncodeSettings::default(),
//!         }))
//!     }
//!     async fn list(&self) -> Result<Vec<StreamConfig>, StoreError> {
//!         Ok(Vec::new())
//!     }
//!     async fn update_status(&self, _id: &str, _s: StreamStatusKind) -> Result<(), StoreError> {
//!         Ok(())
//!     }
//! }
//!
//! struct Videos;
//!
//! #[async_trait]
//! impl VideoStore for Videos {
//!     async fn find(&self, _id: &str) -> Result<Option<VideoRecord>, StoreError> {
//!         Ok(Some(VideoRecord {
//!             filepath: PathBuf::from("/media/clip.mp4"),
//!             title: "clip".into(),
//!         }))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sup = SupervisorBuilder::new(
//!         SupervisorConfig::default(),
//!         Arc::new(Streams),
//!         Arc::new(Videos),
//!         Arc::new(FfmpegBuilder::default()),
//!     )
//!     .build();
//!
//!     sup.clone().start("demo", None).await?;
//!     println!("live: {:?}", sup.list_active().await);
//!     sup.stop("demo").await?;
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod events;
mod health;
mod policies;
mod reconcile;
mod session;
mod stores;
mod subscribers;
mod supervisor;

#[cfg(test)]
pub(crate) mod testutil;

// ---- Public re-exports ----

pub use config::SupervisorConfig;
pub use error::{StartError, StopError, StoreError};
pub use events::{Bus, Event, EventKind};
pub use health::HealthMonitor;
pub use policies::{FailureKind, JitterPolicy, RetryPolicy};
pub use reconcile::StatusReconciler;
pub use session::{LogBuffer, LogLine, LogSource, StreamStatus};
pub use stores::{
    EncodeSettings, FfmpegBuilder, HistoryStore, Invocation, InvocationBuilder, SessionHistory,
    StreamConfig, StreamStatusKind, StreamStore, TerminationScheduler, VideoRecord, VideoStore,
};
pub use subscribers::{Subscribe, SubscriberSet};
pub use supervisor::{StartOutcome, StreamSupervisor, SupervisorBuilder};

// Optional: expose a simple built-in logger subscriber (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
