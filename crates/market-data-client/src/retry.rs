//! Retry-on-429 policy and the sleep seam it runs through.

use async_trait::async_trait;
use reqwest::header::HeaderValue;
use std::time::Duration;

/// Decides whether a throttled request is retried and after how long.
pub trait RetryPolicy: Send + Sync + std::fmt::Debug {
    /// `attempt` is 1 for the first retry. `retry_after` is the server hint, if any.
    /// Returning `None` gives up.
    fn next_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Option<Duration>;
}

/// Retry a bounded number of times, waiting for `Retry-After` (or a default).
#[derive(Debug, Clone)]
pub struct RetryAfterPolicy {
    pub max_retries: u32,
    pub default_backoff: Duration,
    /// Upper bound on any server-provided wait.
    pub max_backoff: Duration,
}

impl Default for RetryAfterPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            default_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy for RetryAfterPolicy {
    fn next_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Option<Duration> {
        if attempt > self.max_retries {
            return None;
        }
        Some(retry_after.unwrap_or(self.default_backoff).min(self.max_backoff))
    }
}

/// Parse a `Retry-After` header given in seconds. HTTP-date values are ignored.
pub fn parse_retry_after(value: Option<&HeaderValue>) -> Option<Duration> {
    let secs: f64 = value?.to_str().ok()?.trim().parse().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}

#[async_trait]
pub trait Sleeper: Send + Sync + std::fmt::Debug {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
