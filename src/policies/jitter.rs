//! # Jitter policy for retry delays.
//!
//! [`JitterPolicy`] adds randomness to backoff delays so that many streams
//! failing at once (for example when a remote ingest endpoint drops) do not
//! retry in lockstep.
//!
//! - [`JitterPolicy::None`] — no randomization, exact delays (default).
//! - [`JitterPolicy::Full`] — random delay in `[0, delay]`.
//! - [`JitterPolicy::Equal`] — `delay/2 + random[0, delay/2]`.

use std::time::Duration;

use rand::Rng;

/// Policy controlling randomization of retry delays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum JitterPolicy {
    /// No jitter: use the exact backoff delay.
    #[default]
    None,
    /// Random delay in `[0, delay]` — maximum load spreading.
    Full,
    /// `delay/2 + random[0, delay/2]` — balanced spreading that preserves
    /// at least half the delay.
    Equal,
}

impl JitterPolicy {
    /// Applies jitter to the given delay.
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            JitterPolicy::None => delay,
            JitterPolicy::Full => {
                let ms = delay.as_millis() as u64;
                if ms == 0 {
                    return delay;
                }
                Duration::from_millis(rand::thread_rng().gen_range(0..=ms))
            }
            JitterPolicy::Equal => {
                let half = delay.as_millis() as u64 / 2;
                if half == 0 {
                    return delay;
                }
                Duration::from_millis(half + rand::thread_rng().gen_range(0..=half))
            }
        }
    }
}
