//! # Bounded per-session log ring.
//!
//! [`LogBuffer`] keeps the most recent timestamped lines from a session's
//! process output and lifecycle transitions. Fixed capacity, FIFO eviction:
//! once full, pushing a new line drops the oldest.

use std::collections::VecDeque;
use std::time::SystemTime;

/// Origin of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSource {
    /// Encoder process stdout.
    Stdout,
    /// Encoder process stderr.
    Stderr,
    /// Supervisor lifecycle transition.
    Lifecycle,
}

impl LogSource {
    /// Stable lowercase label.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogSource::Stdout => "stdout",
            LogSource::Stderr => "stderr",
            LogSource::Lifecycle => "lifecycle",
        }
    }
}

/// One timestamped log line.
#[derive(Debug, Clone)]
pub struct LogLine {
    /// When the line was recorded.
    pub at: SystemTime,
    /// Where it came from.
    pub source: LogSource,
    /// The raw text.
    pub text: String,
}

/// Bounded FIFO ring of [`LogLine`]s.
#[derive(Debug)]
pub struct LogBuffer {
    cap: usize,
    lines: VecDeque<LogLine>,
}

impl LogBuffer {
    /// Creates an empty buffer holding at most `cap` lines (min 1).
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            cap,
            lines: VecDeque::with_capacity(cap),
        }
    }

    /// Appends a line, evicting the oldest when at capacity.
    pub fn push(&mut self, source: LogSource, text: impl Into<String>) {
        if self.lines.len() == self.cap {
            self.lines.pop_front();
        }
        self.lines.push_back(LogLine {
            at: SystemTime::now(),
            source,
            text: text.into(),
        });
    }

    /// Timestamp of the newest line, if any.
    pub fn last_at(&self) -> Option<SystemTime> {
        self.lines.back().map(|l| l.at)
    }

    /// The newest line, if any.
    pub fn last(&self) -> Option<&LogLine> {
        self.lines.back()
    }

    /// Ordered copy of the buffered lines (oldest first).
    pub fn snapshot(&self) -> Vec<LogLine> {
        self.lines.iter().cloned().collect()
    }

    /// Drops all buffered lines.
    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Number of buffered lines.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// True when no lines are buffered.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
