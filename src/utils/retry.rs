use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::Span;

// ============================================================================
// Exponential Backoff Retry
// ============================================================================
//
// Used at startup only, for dependencies that may come up a little after us
// (the database container in particular). The message path never retries in
// session: a failed message is left uncommitted for redelivery instead.
//
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Few, slow attempts. Suits a dependency that either comes up soon or
    /// should fail startup.
    pub fn conservative() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        delay.mul_f64(self.multiplier).min(self.max_delay)
    }
}

/// Runs `operation` until it succeeds or `max_attempts` is exhausted,
/// returning the last error in the latter case.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    span: &Span,
    what: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(parent: span, attempt, what, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) if attempt >= config.max_attempts => {
                tracing::error!(
                    parent: span,
                    attempt,
                    error = %error,
                    what,
                    "Giving up after all attempts"
                );
                return Err(error);
            }
            Err(error) => {
                tracing::warn!(
                    parent: span,
                    attempt,
                    max_attempts = config.max_attempts,
                    error = %error,
                    delay_ms = delay.as_millis() as u64,
                    what,
                    "Attempt failed, retrying after delay"
                );
                sleep(delay).await;
                delay = config.next_delay(delay);
            }
        }
    }
}
