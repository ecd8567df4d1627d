//! Concurrency-limited JSON fetching with per-call timeouts and 429 retry.

use analysis_core::AnalysisError;
use futures_util::stream::{self, StreamExt};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::rate_limiter::RateLimiter;
use crate::retry::{parse_retry_after, RetryAfterPolicy, RetryPolicy, Sleeper, TokioSleeper};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(8);

/// Run `f` over `items` with at most `limit` futures in flight.
///
/// Output order matches input order regardless of completion order. Errors are
/// ordinary values of `R`, so one failed item never aborts the batch.
pub async fn map_limit<I, T, R, F, Fut>(items: I, limit: usize, f: F) -> Vec<R>
where
    I: IntoIterator<Item = T>,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = R>,
{
    stream::iter(items).map(f).buffered(limit.max(1)).collect().await
}

enum Attempt {
    Done(Value),
    Throttled(Option<Duration>),
}

/// Shared HTTP client with rate limiting, explicit timeouts, and retry on 429.
#[derive(Clone, Debug)]
pub struct BoundedFetcher {
    client: Client,
    timeout: Duration,
    retry: Arc<dyn RetryPolicy>,
    sleeper: Arc<dyn Sleeper>,
    rate_limiter: Option<RateLimiter>,
}

impl Default for BoundedFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl BoundedFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            timeout,
            retry: Arc::new(RetryAfterPolicy::default()),
            sleeper: Arc::new(TokioSleeper),
            rate_limiter: None,
        }
    }

    pub fn with_retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_rate_limit(mut self, requests_per_minute: usize) -> Self {
        self.rate_limiter = Some(RateLimiter::per_minute(requests_per_minute));
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn fetch(&self, url: &str) -> Result<Value, AnalysisError> {
        self.fetch_with_query(url, &[]).await
    }

    /// GET `url` and decode the body as JSON.
    ///
    /// A 429 is retried according to the retry policy; once the policy gives up
    /// the call fails with `RateLimited`. Any other non-2xx is `UpstreamUnavailable`.
    pub async fn fetch_with_query(&self, url: &str, query: &[(&str, String)]) -> Result<Value, AnalysisError> {
        let mut retries = 0u32;
        loop {
            if let Some(limiter) = &self.rate_limiter {
                limiter.acquire().await;
            }

            let attempt = tokio::time::timeout(self.timeout, self.attempt(url, query))
                .await
                .map_err(|_| AnalysisError::Timeout(format!("{} after {:?}", url, self.timeout)))??;

            match attempt {
                Attempt::Done(value) => return Ok(value),
                Attempt::Throttled(retry_after) => {
                    retries += 1;
                    match self.retry.next_delay(retries, retry_after) {
                        Some(delay) => {
                            tracing::warn!(
                                "Upstream 429 for {}, waiting {:.1}s before retry {}",
                                url,
                                delay.as_secs_f64(),
                                retries
                            );
                            self.sleeper.sleep(delay).await;
                        }
                        None => {
                            return Err(AnalysisError::RateLimited(format!(
                                "{} still throttled after {} retries",
                                url,
                                retries - 1
                            )));
                        }
                    }
                }
            }
        }
    }

    async fn attempt(&self, url: &str, query: &[(&str, String)]) -> Result<Attempt, AnalysisError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| request_error(url, e))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(Attempt::Throttled(parse_retry_after(response.headers().get(RETRY_AFTER))));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::UpstreamUnavailable(format!(
                "HTTP {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let bytes = response.bytes().await.map_err(|e| request_error(url, e))?;
        serde_json::from_slice(&bytes)
            .map(Attempt::Done)
            .map_err(|e| AnalysisError::ParseIncomplete(format!("{url}: {e}")))
    }
}

fn request_error(url: &str, err: reqwest::Error) -> AnalysisError {
    if err.is_timeout() {
        AnalysisError::Timeout(format!("{url}: {err}"))
    } else {
        AnalysisError::UpstreamUnavailable(format!("{url}: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Default)]
    struct RecordingSleeper {
        calls: Mutex<Vec<Duration>>,
    }

    #[async_trait::async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.calls.lock().unwrap().push(duration);
        }
    }

    fn fetcher_with(sleeper: Arc<RecordingSleeper>) -> BoundedFetcher {
        BoundedFetcher::new(Duration::from_secs(2)).with_sleeper(sleeper)
    }

    #[tokio::test]
    async fn test_fetch_decodes_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/quote"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"c": 101.5})))
            .mount(&server)
            .await;

        let value = BoundedFetcher::default().fetch(&format!("{}/quote", server.uri())).await.unwrap();
        assert_eq!(value["c"], 101.5);
    }

    #[tokio::test]
    async fn test_429_retried_once_after_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metric"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "2"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/metric"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let sleeper = Arc::new(RecordingSleeper::default());
        let value = fetcher_with(sleeper.clone())
            .fetch(&format!("{}/metric", server.uri()))
            .await
            .unwrap();

        assert_eq!(value["ok"], true);
        assert_eq!(*sleeper.calls.lock().unwrap(), vec![Duration::from_secs(2)]);
    }

    #[tokio::test]
    async fn test_second_429_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metric"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "2"))
            .expect(2)
            .mount(&server)
            .await;

        let sleeper = Arc::new(RecordingSleeper::default());
        let err = fetcher_with(sleeper.clone())
            .fetch(&format!("{}/metric", server.uri()))
            .await
            .unwrap_err();

        assert!(err.is_rate_limited());
        assert_eq!(sleeper.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_retry_after_defaults_to_one_second() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "soon"))
            .mount(&server)
            .await;

        let sleeper = Arc::new(RecordingSleeper::default());
        let _ = fetcher_with(sleeper.clone()).fetch(&server.uri()).await;
        assert_eq!(*sleeper.calls.lock().unwrap(), vec![Duration::from_secs(1)]);
    }

    #[tokio::test]
    async fn test_non_2xx_is_upstream_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .expect(1)
            .mount(&server)
            .await;

        let err = BoundedFetcher::default().fetch(&server.uri()).await.unwrap_err();
        assert!(matches!(err, AnalysisError::UpstreamUnavailable(ref m) if m.contains("503")));
    }

    #[tokio::test]
    async fn test_slow_upstream_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let err = BoundedFetcher::new(Duration::from_millis(50))
            .fetch(&server.uri())
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_invalid_json_is_parse_incomplete() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = BoundedFetcher::default().fetch(&server.uri()).await.unwrap_err();
        assert!(matches!(err, AnalysisError::ParseIncomplete(_)));
    }

    #[tokio::test]
    async fn test_map_limit_bounds_concurrency_and_keeps_order() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let items: Vec<u64> = (0..12).collect();

        let results = map_limit(items, 3, |i| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                // Later items finish first.
                tokio::time::sleep(Duration::from_millis(30 - 2 * i)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                i * 10
            }
        })
        .await;

        assert_eq!(results, (0..12).map(|i| i * 10).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_map_limit_larger_than_batch_and_errors_stay_per_item() {
        let results: Vec<Result<u32, AnalysisError>> = map_limit(vec![1u32, 2, 3], 50, |i| async move {
            if i == 2 {
                Err(AnalysisError::Timeout("item 2".into()))
            } else {
                Ok(i)
            }
        })
        .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0], Ok(1));
        assert!(results[1].as_ref().unwrap_err().is_timeout());
        assert_eq!(results[2], Ok(3));
    }

    #[tokio::test]
    async fn test_map_limit_zero_limit_still_progresses() {
        let results = map_limit(vec!["a", "b"], 0, |s| async move { s.len() }).await;
        assert_eq!(results, vec![1, 1]);
    }
}
