//! # LogWriter — simple event printer
//!
//! A minimal subscriber that prints incoming [`Event`]s to stdout.
//! Use it for tests, demos, or as a reference implementation.
//!
//! ## Example output
//! ```text
//! [starting] stream="movie-night" resume=0
//! [started] stream="movie-night" mode="fresh"
//! [exited] stream="movie-night" class="process_error" code=Some(1)
//! [retry] stream="movie-night" attempt=1 delay_ms=3000 resume=12
//! [exhausted] stream="movie-night" retries=3
//! [stopped] stream="movie-night"
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        match e.kind {
            EventKind::SessionStarting => {
                println!(
                    "[starting] stream={:?} resume={:?}",
                    e.stream, e.position
                );
            }
            EventKind::SessionStarted => {
                println!("[started] stream={:?} mode={:?}", e.stream, e.reason);
            }
            EventKind::SessionStopped => {
                println!("[stopped] stream={:?}", e.stream);
            }
            EventKind::ProcessOutput => {
                println!(
                    "[output] stream={:?} channel={:?} line={:?}",
                    e.stream, e.reason, e.line
                );
            }
            EventKind::ProcessExited => {
                println!(
                    "[exited] stream={:?} class={:?} code={:?}",
                    e.stream, e.reason, e.exit_code
                );
            }
            EventKind::RetryScheduled => {
                println!(
                    "[retry] stream={:?} attempt={:?} delay_ms={:?} resume={:?}",
                    e.stream, e.attempt, e.delay_ms, e.position
                );
            }
            EventKind::RetryAborted => {
                println!("[retry-aborted] stream={:?} reason={:?}", e.stream, e.reason);
            }
            EventKind::RetryExhausted => {
                println!("[exhausted] stream={:?} retries={:?}", e.stream, e.attempt);
            }
            EventKind::StallDetected => {
                println!("[stalled] stream={:?} resume={:?}", e.stream, e.position);
            }
            EventKind::HealthCheckFailed => {
                println!(
                    "[health-failed] stream={:?} consecutive={:?} reason={:?}",
                    e.stream, e.attempt, e.reason
                );
            }
            EventKind::RecoverySucceeded => {
                println!("[recovered] stream={:?} resume={:?}", e.stream, e.position);
            }
            EventKind::RecoveryFailed => {
                println!(
                    "[recovery-failed] stream={:?} reason={:?}",
                    e.stream, e.reason
                );
            }
            EventKind::StatusRepaired => {
                println!("[repaired] stream={:?} reason={:?}", e.stream, e.reason);
            }
            EventKind::OrphanDropped => {
                println!("[orphan-dropped] stream={:?}", e.stream);
            }
            EventKind::StoreFailure => {
                println!("[store-failure] stream={:?} reason={:?}", e.stream, e.reason);
            }
            EventKind::SubscriberOverflow => {
                println!(
                    "[subscriber-overflow] subscriber={:?} reason={:?}",
                    e.stream, e.reason
                );
            }
            EventKind::SubscriberPanicked => {
                println!(
                    "[subscriber-panicked] subscriber={} info={}",
                    e.stream.as_deref().unwrap_or("unknown"),
                    e.reason.as_deref().unwrap_or("unknown"),
                );
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
