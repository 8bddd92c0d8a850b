//! Bounded exponential backoff.
//!
//! Most of what the e2e scenarios observe is eventually consistent: pods take
//! time to schedule, writes take time to cross the mount, downloads take time
//! to land on disk. [`retry`] runs an operation until it succeeds or the
//! policy's stop condition is reached, doubling the delay between attempts.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::error::Error;

const MULTIPLIER: u32 = 2;

/// When to give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCondition {
    /// Give up once the next attempt would start after this much wall-clock time.
    Elapsed(Duration),
    /// Give up after this many attempts.
    Attempts(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    initial_delay: Duration,
    stop: StopCondition,
}

impl RetryPolicy {
    pub fn exponential(initial_delay: Duration, max_duration: Duration) -> Self {
        Self::new(initial_delay, StopCondition::Elapsed(max_duration))
    }

    pub fn attempts(initial_delay: Duration, max_attempts: u32) -> Self {
        Self::new(initial_delay, StopCondition::Attempts(max_attempts))
    }

    fn new(initial_delay: Duration, stop: StopCondition) -> Self {
        RetryPolicy {
            initial_delay: initial_delay.max(Duration::from_millis(1)),
            stop,
        }
    }

    /// Pod scheduling, pod readiness and mount propagation.
    pub fn eventual() -> Self {
        Self::exponential(Duration::from_millis(500), Duration::from_secs(4 * 60))
    }

    /// The local filesystem catching up with an in-flight download.
    pub fn local_file() -> Self {
        Self::attempts(Duration::from_secs(1), 3)
    }

    fn exhausted(&self, attempts: u32, elapsed: Duration, next_delay: Duration) -> bool {
        match self.stop {
            StopCondition::Elapsed(max) => elapsed.saturating_add(next_delay) > max,
            StopCondition::Attempts(max) => attempts >= max,
        }
    }
}

/// Run `operation` until it succeeds or `policy` gives up.
///
/// The first attempt runs immediately. On exhaustion the error of the last
/// attempt is returned inside [`Error::RetryExhausted`].
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let start = Instant::now();
    let mut delay = policy.initial_delay;
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        let elapsed = start.elapsed();
        if policy.exhausted(attempts, elapsed, delay) {
            warn!(attempts, ?elapsed, "giving up: {}", err);
            return Err(Error::RetryExhausted {
                attempts,
                elapsed,
                source: Box::new(err),
            });
        }
        debug!(attempt = attempts, next_delay = ?delay, "will retry: {}", err);
        sleep(delay).await;
        delay = delay.saturating_mul(MULTIPLIER);
    }
}
