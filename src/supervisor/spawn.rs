//! # Encoder process plumbing.
//!
//! Spawning, output pumping, and termination for one encoder instance. The
//! supervisor core stays free of OS details; everything `tokio::process`
//! and signal-related lives here.
//!
//! ## Rules
//! - The child runs in its own session (`setsid`) so a supervisor crash
//!   never takes a healthy encoder down with it, and `kill_on_drop` is off
//!   for the same reason.
//! - Both pipes are drained for the life of the process; an undrained pipe
//!   would eventually block the encoder on a full buffer.
//! - Periodic progress chatter is kept in the session log ring but not
//!   published as events.

use std::io;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

use super::core::StreamSupervisor;
use crate::events::{Event, EventKind};
use crate::session::LogSource;
use crate::stores::Invocation;

/// Launches the encoder with both output pipes captured.
pub(super) fn spawn_encoder(invocation: &Invocation) -> io::Result<Child> {
    let mut cmd = Command::new(&invocation.program);
    cmd.args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(false);

    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            // Detach into its own process group / session.
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    cmd.spawn()
}

/// Sends SIGTERM to the process. Best effort: a stale or reused pid is the
/// caller's race to lose, and an already-gone process is not an error.
pub(super) fn terminate(pid: u32) {
    #[cfg(unix)]
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
    #[cfg(not(unix))]
    let _ = pid;
}

/// Periodic encoder progress chatter.
///
/// These lines arrive several times per second while healthy; publishing
/// each one as an event would drown every subscriber. They still land in
/// the session log ring (so "last output at" stays fresh for stall
/// detection) — they are only excluded from the bus.
pub(super) fn is_noisy_progress(line: &str) -> bool {
    const PREFIXES: [&str; 5] = ["frame=", "size=", "time=", "bitrate=", "speed="];
    let trimmed = line.trim_start();
    PREFIXES.iter().any(|p| trimmed.starts_with(p))
}

/// Spawns a task draining one output pipe line by line.
///
/// Every line is appended to the stream's log ring; non-noisy lines are
/// also published as [`EventKind::ProcessOutput`]. The task ends when the
/// pipe closes or the session leaves the registry.
pub(super) fn spawn_output_pump<R>(
    sup: Arc<StreamSupervisor>,
    stream_id: String,
    source: LogSource,
    reader: R,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if !sup.registry().append_output(&stream_id, source, &line).await {
                break;
            }
            if !is_noisy_progress(&line) {
                sup.bus().publish(
                    Event::now(EventKind::ProcessOutput)
                        .with_stream(stream_id.as_str())
                        .with_reason(source.as_str())
                        .with_line(line),
                );
            }
        }
    });
}

/// Spawns the watcher that owns the child for the rest of its life.
///
/// Awaits termination, then hands the wait result to the exit handler
/// together with the instance epoch the child belongs to.
pub(super) fn spawn_watcher(
    sup: Arc<StreamSupervisor>,
    stream_id: String,
    epoch: u64,
    mut child: Child,
) {
    tokio::spawn(async move {
        let status = child.wait().await;
        sup.handle_exit(&stream_id, epoch, status).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_chatter_is_noisy() {
        assert!(is_noisy_progress(
            "frame= 1234 fps= 30 q=28.0 size=    4096kB time=00:00:41.16"
        ));
        assert!(is_noisy_progress("size=    4096kB"));
        assert!(is_noisy_progress("  speed=1.01x"));
    }

    #[test]
    fn diagnostics_are_not_noisy() {
        assert!(!is_noisy_progress(
            "rtmp://ingest.example/live: Connection refused"
        ));
        assert!(!is_noisy_progress("[libx264 @ 0x5618] using cpu caps"));
        assert!(!is_noisy_progress(""));
    }
}
