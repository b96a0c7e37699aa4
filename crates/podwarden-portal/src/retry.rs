//! Retry combinator for portal transport calls.
//!
//! Retries an operation until it succeeds or the retry window closes,
//! doubling the pause between attempts up to `max_pause`.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total time allowed for all attempts.
    pub window: Duration,
    /// Pause before the second attempt.
    pub pause: Duration,
    /// Cap for the doubled pause.
    pub max_pause: Duration,
}

impl RetryPolicy {
    pub fn new(window: Duration, pause: Duration) -> Self {
        Self {
            window,
            pause,
            max_pause: Duration::from_secs(2),
        }
    }

    /// A single attempt, no retries.
    pub fn once() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_millis(250))
    }
}

/// Run `op` until it returns `Ok`, `retryable` rejects the error, or the
/// next attempt would start after the window closes. The last error is
/// returned.
pub async fn retry<T, E, F, Fut>(
    policy: RetryPolicy,
    retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let deadline = Instant::now() + policy.window;
    let mut pause = policy.pause;
    let mut attempt = 1u32;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if !retryable(&e) || Instant::now() + pause >= deadline {
                    return Err(e);
                }
                debug!(attempt, error = %e, pause_ms = pause.as_millis() as u64, "retrying");
                tokio::time::sleep(pause).await;
                pause = (pause * 2).min(policy.max_pause);
                attempt += 1;
            }
        }
    }
}
