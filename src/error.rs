//! Error types used by the streamvisor runtime.
//!
//! This module defines the caller-facing error enums:
//!
//! - [`StartError`] — why a stream session could not be started.
//! - [`StopError`] — why a stop request was rejected.
//! - [`StoreError`] — a durable-store call failed.
//!
//! Caller-facing operations (`start`, `stop`) return these as structured
//! results. Internal lifecycle callbacks (exit handlers, retry timers, the
//! monitor loops) never propagate errors to a caller: they publish a
//! [`StoreFailure`](crate::events::EventKind::StoreFailure) event and
//! continue, because nobody is synchronously waiting on them. In particular
//! a failed durable-status write after a process has already exited must not
//! prevent registry cleanup — losing one status write is preferable to
//! leaking an in-memory session forever.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by [`StreamSupervisor::start`](crate::StreamSupervisor::start).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum StartError {
    /// No stream configuration exists for this identifier.
    #[error("no stream configuration for {0:?}")]
    NotFound(String),

    /// The stream's backing media file could not be located on disk.
    #[error("media file missing: {0}")]
    MediaMissing(PathBuf),

    /// A session for this stream is already active (or mid-start).
    ///
    /// This is the start-in-flight guard: at most one live encoder process
    /// per stream identifier at any instant.
    #[error("stream {0:?} already has an active session")]
    AlreadyActive(String),

    /// The encoder process could not be launched.
    #[error("failed to spawn encoder for {stream:?}: {source}")]
    Spawn {
        /// Stream the spawn was attempted for.
        stream: String,
        /// Underlying I/O error from the OS.
        source: io::Error,
    },

    /// A durable-store lookup failed before any process was launched.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl StartError {
    /// Returns a short stable label (snake_case) for use in logs/events.
    pub fn as_label(&self) -> &'static str {
        match self {
            StartError::NotFound(_) => "start_not_found",
            StartError::MediaMissing(_) => "start_media_missing",
            StartError::AlreadyActive(_) => "start_already_active",
            StartError::Spawn { .. } => "start_spawn_failure",
            StartError::Store(_) => "start_store_failure",
        }
    }
}

/// Errors produced by [`StreamSupervisor::stop`](crate::StreamSupervisor::stop).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum StopError {
    /// No live process is tracked and the durable status is already offline.
    #[error("stream {0:?} is not active")]
    NotActive(String),
}

impl StopError {
    /// Returns a short stable label (snake_case) for use in logs/events.
    pub fn as_label(&self) -> &'static str {
        match self {
            StopError::NotActive(_) => "stop_not_active",
        }
    }
}

/// A durable-store call failed.
///
/// Store implementations wrap their backend errors (database, HTTP, ...)
/// into this type; the supervisor treats all of them uniformly.
#[derive(Error, Debug)]
#[error("durable store failure: {message}")]
pub struct StoreError {
    /// Human-readable description of the backend failure.
    pub message: String,
}

impl StoreError {
    /// Creates a store error from any displayable backend error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
