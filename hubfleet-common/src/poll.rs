//! Bounded fixed-interval polling shared by the reachability wait and the
//! remote-command connect wait.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    pub const fn from_secs(interval_secs: u64, timeout_secs: u64) -> Self {
        Self::new(
            Duration::from_secs(interval_secs),
            Duration::from_secs(timeout_secs),
        )
    }
}

/// Result of a single probe.
#[derive(Debug)]
pub enum Attempt<T> {
    Ready(T),
    /// Not there yet; the message is kept for the timeout error.
    Pending(String),
    /// Stop polling, nothing will change by waiting.
    Abort(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PollError {
    #[error("gave up after {waited:?} (last: {})", last.as_deref().unwrap_or("no attempt"))]
    TimedOut {
        waited: Duration,
        last: Option<String>,
    },
    #[error("aborted: {0}")]
    Aborted(String),
    #[error("cancelled by shutdown")]
    Cancelled,
}

/// Call `probe` every `policy.interval` until it reports ready, aborts, the
/// overall `policy.timeout` elapses, or `cancel` fires.
pub async fn poll_until<T, F, Fut>(
    policy: PollPolicy,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<T, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let deadline = Instant::now() + policy.timeout;
    let mut last = None;

    loop {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled);
        }

        let attempt = tokio::select! {
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            attempt = probe() => attempt,
        };
        match attempt {
            Attempt::Ready(value) => return Ok(value),
            Attempt::Abort(reason) => return Err(PollError::Aborted(reason)),
            Attempt::Pending(reason) => last = Some(reason),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(PollError::TimedOut {
                waited: policy.timeout,
                last,
            });
        }
        let nap = policy.interval.min(deadline - now);
        tokio::select! {
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            _ = tokio::time::sleep(nap) => {}
        }
    }
}
