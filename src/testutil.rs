//! Shared test fixtures: in-memory stores, a recording invocation builder
//! that launches shell scripts instead of an encoder, and event helpers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};

use crate::config::SupervisorConfig;
use crate::error::StoreError;
use crate::events::{Event, EventKind};
use crate::stores::{
    EncodeSettings, HistoryStore, Invocation, InvocationBuilder, SessionHistory, StreamConfig,
    StreamStatusKind, StreamStore, TerminationScheduler, VideoRecord, VideoStore,
};
use crate::supervisor::{StreamSupervisor, SupervisorBuilder};

/// In-memory stream store with a write counter and injectable read failures.
pub(crate) struct MemoryStreamStore {
    rows: Mutex<HashMap<String, StreamConfig>>,
    update_calls: AtomicUsize,
    fail_reads: AtomicBool,
}

impl MemoryStreamStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rows: Mutex::new(HashMap::new()),
            update_calls: AtomicUsize::new(0),
            fail_reads: AtomicBool::new(false),
        })
    }

    pub async fn insert(&self, cfg: StreamConfig) {
        self.rows.lock().await.insert(cfg.id.clone(), cfg);
    }

    pub async fn remove(&self, id: &str) {
        self.rows.lock().await.remove(id);
    }

    pub async fn set_status(&self, id: &str, status: StreamStatusKind) {
        if let Some(row) = self.rows.lock().await.get_mut(id) {
            row.status = status;
        }
    }

    pub async fn set_duration_limit(&self, id: &str, limit: Option<u64>) {
        if let Some(row) = self.rows.lock().await.get_mut(id) {
            row.duration_limit_secs = limit;
        }
    }

    pub async fn status_of(&self, id: &str) -> Option<StreamStatusKind> {
        self.rows.lock().await.get(id).map(|r| r.status)
    }

    /// Number of `update_status` calls observed so far.
    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    /// Makes every `find`/`list` fail until switched off again.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn check_reads(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            Err(StoreError::new("injected read failure"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StreamStore for MemoryStreamStore {
    async fn find(&self, id: &str) -> Result<Option<StreamConfig>, StoreError> {
        self.check_reads()?;
        Ok(self.rows.lock().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<StreamConfig>, StoreError> {
        self.check_reads()?;
        Ok(self.rows.lock().await.values().cloned().collect())
    }

    async fn update_status(&self, id: &str, status: StreamStatusKind) -> Result<(), StoreError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(row) = self.rows.lock().await.get_mut(id) {
            row.status = status;
        }
        Ok(())
    }
}

/// In-memory video store.
pub(crate) struct MemoryVideoStore {
    rows: Mutex<HashMap<String, VideoRecord>>,
}

impl MemoryVideoStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rows: Mutex::new(HashMap::new()),
        })
    }

    pub async fn insert(&self, id: &str, video: VideoRecord) {
        self.rows.lock().await.insert(id.to_string(), video);
    }

    pub async fn set_path(&self, id: &str, filepath: PathBuf) {
        if let Some(row) = self.rows.lock().await.get_mut(id) {
            row.filepath = filepath;
        }
    }
}

#[async_trait]
impl VideoStore for MemoryVideoStore {
    async fn find(&self, id: &str) -> Result<Option<VideoRecord>, StoreError> {
        Ok(self.rows.lock().await.get(id).cloned())
    }
}

/// History sink collecting records in memory.
pub(crate) struct MemoryHistory {
    records: StdMutex<Vec<SessionHistory>>,
}

impl MemoryHistory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            records: StdMutex::new(Vec::new()),
        })
    }

    pub fn records(&self) -> Vec<SessionHistory> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistory {
    async fn record(&self, history: SessionHistory) -> Result<(), StoreError> {
        self.records.lock().unwrap().push(history);
        Ok(())
    }
}

/// Scheduler recording every call instead of scheduling anything.
pub(crate) struct RecordingScheduler {
    scheduled: StdMutex<Vec<(String, u64)>>,
    cancelled: StdMutex<Vec<String>>,
}

impl RecordingScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            scheduled: StdMutex::new(Vec::new()),
            cancelled: StdMutex::new(Vec::new()),
        })
    }

    pub fn scheduled(&self) -> Vec<(String, u64)> {
        self.scheduled.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl TerminationScheduler for RecordingScheduler {
    async fn schedule_stop(&self, stream_id: &str, duration_secs: u64) {
        self.scheduled
            .lock()
            .unwrap()
            .push((stream_id.to_string(), duration_secs));
    }

    async fn cancel(&self, stream_id: &str) {
        self.cancelled.lock().unwrap().push(stream_id.to_string());
    }
}

/// Invocation builder that runs a shell script as the "encoder" and records
/// the resume position of every launch.
pub(crate) struct ScriptBuilder {
    script: String,
    resumes: StdMutex<Vec<u64>>,
}

impl ScriptBuilder {
    pub fn new(script: &str) -> Arc<Self> {
        Arc::new(Self {
            script: script.to_string(),
            resumes: StdMutex::new(Vec::new()),
        })
    }

    /// Resume positions of every launch, in order.
    pub fn resumes(&self) -> Vec<u64> {
        self.resumes.lock().unwrap().clone()
    }
}

impl InvocationBuilder for ScriptBuilder {
    fn build(
        &self,
        _video_path: &Path,
        _destination_url: &str,
        resume_position: u64,
        _settings: &EncodeSettings,
    ) -> Invocation {
        self.resumes.lock().unwrap().push(resume_position);
        Invocation {
            program: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), self.script.clone()],
        }
    }
}

/// A supervisor wired to in-memory stores with one stream ("s1") backed by
/// one video ("v1") whose media file exists on disk.
pub(crate) struct Fixture {
    pub streams: Arc<MemoryStreamStore>,
    pub videos: Arc<MemoryVideoStore>,
    pub history: Arc<MemoryHistory>,
    pub scheduler: Arc<RecordingScheduler>,
    pub builder: Arc<ScriptBuilder>,
    pub sup: Arc<StreamSupervisor>,
    _media: tempfile::NamedTempFile,
}

impl Fixture {
    /// Polls until the stream leaves the registry entirely.
    pub async fn wait_until_untracked(&self, id: &str) {
        for _ in 0..100 {
            if self.sup.status(id).await.is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("stream {id:?} still tracked after 5s");
    }
}

/// Millisecond-scale configuration so failure scenarios run fast.
pub(crate) fn fast_config() -> SupervisorConfig {
    SupervisorConfig {
        max_retries: 3,
        crash_delay: Duration::from_millis(200),
        retry_base_delay: Duration::from_millis(100),
        retry_max_delay: Duration::from_secs(1),
        health_interval: Duration::from_millis(100),
        failure_threshold: 3,
        stall_settle: Duration::from_millis(10),
        failure_settle: Duration::from_millis(10),
        reconcile_interval: Duration::from_millis(200),
        log_capacity: 100,
        min_history_secs: 0,
        bus_capacity: 256,
        ..SupervisorConfig::default()
    }
}

/// Builds a [`Fixture`] whose encoder is `/bin/sh -c <script>`.
pub(crate) async fn fixture(script: &str, cfg: SupervisorConfig) -> Fixture {
    let media = tempfile::NamedTempFile::new().unwrap();

    let streams = MemoryStreamStore::new();
    let videos = MemoryVideoStore::new();
    let history = MemoryHistory::new();
    let scheduler = RecordingScheduler::new();
    let builder = ScriptBuilder::new(script);

    videos
        .insert(
            "v1",
            VideoRecord {
                filepath: media.path().to_path_buf(),
                title: "test clip".to_string(),
            },
        )
        .await;
    streams
        .insert(StreamConfig {
            id: "s1".to_string(),
            video_id: "v1".to_string(),
            destination_url: "rtmp://127.0.0.1/live/test".to_string(),
            status: StreamStatusKind::Offline,
            duration_limit_secs: None,
            settings: EncodeSettings::default(),
        })
        .await;

    let sup = SupervisorBuilder::new(
        cfg,
        streams.clone(),
        videos.clone(),
        builder.clone(),
    )
    .with_history(history.clone())
    .with_scheduler(scheduler.clone())
    .build();

    Fixture {
        streams,
        videos,
        history,
        scheduler,
        builder,
        sup,
        _media: media,
    }
}

/// Receives events until one of the wanted kind arrives (5 s limit).
pub(crate) async fn expect_event(
    rx: &mut broadcast::Receiver<Event>,
    kind: EventKind,
) -> Event {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(ev) if ev.kind == kind => return ev,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {kind:?}"))
}
