//! # External collaborator contracts.
//!
//! The supervisor core never talks to a database, an HTTP API, or a
//! command-line encoder directly. Everything durable or external enters
//! through the traits in this module, injected as `Arc<dyn _>` at
//! construction time:
//!
//! - [`StreamStore`] — stream configuration and the durable "live/offline"
//!   status record.
//! - [`VideoStore`] — resolves a stream's backing media file.
//! - [`InvocationBuilder`] — pure function from settings to an encoder
//!   command line.
//! - [`HistoryStore`] — completed-session records for analytics.
//! - [`TerminationScheduler`] — external duration-limit stop scheduling.
//!
//! [`FfmpegBuilder`] is a reference [`InvocationBuilder`] producing an
//! ffmpeg push invocation; deployments with different encoders supply their
//! own.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::StoreError;

/// Durable stream status as recorded by the [`StreamStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatusKind {
    /// A supervisor instance claims a running encoder for this stream.
    Live,
    /// No encoder should be running.
    Offline,
}

impl StreamStatusKind {
    /// Stable lowercase label ("live" / "offline").
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamStatusKind::Live => "live",
            StreamStatusKind::Offline => "offline",
        }
    }
}

/// Declarative encoder settings attached to a stream configuration.
///
/// All fields are optional; the invocation builder substitutes defaults for
/// missing or invalid combinations rather than failing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodeSettings {
    /// Video bitrate in kbit/s.
    pub bitrate_kbps: Option<u32>,
    /// Output resolution as "WIDTHxHEIGHT".
    pub resolution: Option<String>,
    /// Output frame rate.
    pub fps: Option<u32>,
    /// Loop the source file indefinitely.
    pub loop_playback: bool,
    /// Raw extra arguments appended verbatim (advanced mode).
    pub advanced: Option<Vec<String>>,
}

/// One stream's configuration record.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Opaque stream identifier, stable across restarts.
    pub id: String,
    /// Identifier of the backing video record.
    pub video_id: String,
    /// Remote ingest endpoint the encoder pushes to.
    pub destination_url: String,
    /// Current durable status.
    pub status: StreamStatusKind,
    /// Optional wall-clock duration limit; when set, a successful start
    /// notifies the [`TerminationScheduler`].
    pub duration_limit_secs: Option<u64>,
    /// Declarative encoder settings.
    pub settings: EncodeSettings,
}

/// One video record.
#[derive(Debug, Clone)]
pub struct VideoRecord {
    /// Location of the media file on disk.
    pub filepath: PathBuf,
    /// Display title.
    pub title: String,
}

/// A fully-formed encoder invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// Program to execute.
    pub program: String,
    /// Ordered argument list.
    pub args: Vec<String>,
}

/// A completed-session record handed to the [`HistoryStore`].
#[derive(Debug, Clone)]
pub struct SessionHistory {
    /// Stream the session belonged to.
    pub stream_id: String,
    /// Title of the video that was pushed, when known.
    pub title: Option<String>,
    /// Wall-clock run length of the final process instance, in seconds.
    pub duration_secs: u64,
    /// Absolute playback position when the session ended.
    pub final_position: u64,
    /// Settings the session ran with.
    pub settings: EncodeSettings,
}

/// Stream configuration and durable status store.
#[async_trait]
pub trait StreamStore: Send + Sync + 'static {
    /// Looks up one stream configuration.
    async fn find(&self, id: &str) -> Result<Option<StreamConfig>, StoreError>;

    /// Lists all stream configurations (used by the reconciler's scan).
    async fn list(&self) -> Result<Vec<StreamConfig>, StoreError>;

    /// Updates the durable status. Must be idempotent and tolerate rapid
    /// alternating calls.
    async fn update_status(&self, id: &str, status: StreamStatusKind) -> Result<(), StoreError>;
}

/// Video record store.
#[async_trait]
pub trait VideoStore: Send + Sync + 'static {
    /// Looks up one video record.
    async fn find(&self, id: &str) -> Result<Option<VideoRecord>, StoreError>;
}

/// Completed-session history sink. Failures here are logged by the caller
/// and never propagated.
#[async_trait]
pub trait HistoryStore: Send + Sync + 'static {
    /// Records one completed session.
    async fn record(&self, history: SessionHistory) -> Result<(), StoreError>;
}

/// External scheduler for duration-limited streams.
///
/// `cancel` is invoked on every transition to offline (manual stop, normal
/// exit, retry exhaustion, orphan drop) so a stale scheduled stop never
/// fires against a since-restarted session.
#[async_trait]
pub trait TerminationScheduler: Send + Sync + 'static {
    /// Arranges a stop after `duration_secs` of wall-clock time.
    async fn schedule_stop(&self, stream_id: &str, duration_secs: u64);

    /// Drops any pending scheduled stop for this stream.
    async fn cancel(&self, stream_id: &str);
}

/// Pure function from declarative settings to an encoder command line.
///
/// Implementations must be side-effect free and must always return an
/// invocation, substituting defaults for invalid combinations.
pub trait InvocationBuilder: Send + Sync + 'static {
    /// Builds the invocation for one process instance.
    fn build(
        &self,
        video_path: &Path,
        destination_url: &str,
        resume_position: u64,
        settings: &EncodeSettings,
    ) -> Invocation;
}

/// Reference [`InvocationBuilder`] producing an ffmpeg RTMP push.
#[derive(Debug, Clone, Default)]
pub struct FfmpegBuilder {
    /// Override for the ffmpeg binary path; defaults to `ffmpeg` on PATH.
    pub program: Option<String>,
}

impl FfmpegBuilder {
    const DEFAULT_BITRATE_KBPS: u32 = 4500;
    const DEFAULT_RESOLUTION: &'static str = "1920x1080";
    const DEFAULT_FPS: u32 = 30;

    fn bitrate(settings: &EncodeSettings) -> u32 {
        match settings.bitrate_kbps {
            Some(b) if (300..=20_000).contains(&b) => b,
            _ => Self::DEFAULT_BITRATE_KBPS,
        }
    }

    fn resolution(settings: &EncodeSettings) -> String {
        match settings.resolution.as_deref() {
            Some(r) if Self::looks_like_resolution(r) => r.to_string(),
            _ => Self::DEFAULT_RESOLUTION.to_string(),
        }
    }

    fn fps(settings: &EncodeSettings) -> u32 {
        match settings.fps {
            Some(f) if (10..=60).contains(&f) => f,
            _ => Self::DEFAULT_FPS,
        }
    }

    fn looks_like_resolution(r: &str) -> bool {
        let mut parts = r.split('x');
        matches!(
            (
                parts.next().map(|w| w.parse::<u32>()),
                parts.next().map(|h| h.parse::<u32>()),
                parts.next(),
            ),
            (Some(Ok(w)), Some(Ok(h)), None) if w > 0 && h > 0
        )
    }
}

impl InvocationBuilder for FfmpegBuilder {
    fn build(
        &self,
        video_path: &Path,
        destination_url: &str,
        resume_position: u64,
        settings: &EncodeSettings,
    ) -> Invocation {
        let mut args: Vec<String> = Vec::new();

        args.push("-re".into());
        if resume_position > 0 {
            args.push("-ss".into());
            args.push(resume_position.to_string());
        }
        if settings.loop_playback {
            args.push("-stream_loop".into());
            args.push("-1".into());
        }
        args.push("-i".into());
        args.push(video_path.display().to_string());

        let bitrate = Self::bitrate(settings);
        args.push("-c:v".into());
        args.push("libx264".into());
        args.push("-b:v".into());
        args.push(format!("{bitrate}k"));
        args.push("-maxrate".into());
        args.push(format!("{bitrate}k"));
        args.push("-bufsize".into());
        args.push(format!("{}k", bitrate * 2));
        args.push("-s".into());
        args.push(Self::resolution(settings));
        args.push("-r".into());
        args.push(Self::fps(settings).to_string());
        args.push("-c:a".into());
        args.push("aac".into());
        args.push("-ar".into());
        args.push("44100".into());

        if let Some(extra) = &settings.advanced {
            args.extend(extra.iter().cloned());
        }

        args.push("-f".into());
        args.push("flv".into());
        args.push(destination_url.to_string());

        Invocation {
            program: self.program.clone().unwrap_or_else(|| "ffmpeg".into()),
            args,
        }
    }
}
