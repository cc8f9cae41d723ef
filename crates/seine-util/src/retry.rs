//! Retry with jittered exponential backoff.

use rand::Rng;
use seine_types::{CrawlConfig, ErrorKind, FetchResult};
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Classifies fetch outcomes and paces re-attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    retryable_statuses: HashSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            retryable_statuses: [408, 429, 500, 502, 503, 504].into_iter().collect(),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &CrawlConfig) -> Self {
        Self {
            max_attempts: config.retry_attempts.max(1),
            initial_backoff: Duration::from_millis(config.retry_backoff_ms.max(1)),
            ..Default::default()
        }
    }

    /// Decision table: attempt budget first; then the status code when one
    /// exists (4xx other than 408/429 never retries); otherwise the error
    /// kind (transient transport failures and timeouts retry).
    pub fn should_retry(&self, attempt: u32, status: u16, error_kind: Option<ErrorKind>) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        if status > 0 {
            return self.retryable_statuses.contains(&status);
        }
        matches!(error_kind, Some(kind) if kind.is_retryable())
    }

    /// Backoff for the given zero-based attempt: exponential, capped at
    /// `max_backoff`, perturbed by uniform jitter in plus or minus 25 percent,
    /// floored at `initial_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = (self.initial_backoff.as_millis() as f64
            * self.multiplier.powi(attempt as i32))
        .min(self.max_backoff.as_millis() as f64);
        let jittered = base * rand::thread_rng().gen_range(0.75..=1.25);
        Duration::from_millis((jittered as u64).max(self.initial_backoff.as_millis() as u64))
    }

    /// Drive `op` until it succeeds, exhausts the attempt budget, or hits a
    /// non-retryable outcome. The closure receives the zero-based attempt
    /// number; sleeps are cancellable.
    pub async fn execute<F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> FetchResult
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = FetchResult>,
    {
        let mut attempt: u32 = 0;
        loop {
            let result = op(attempt).await;
            if result.is_success() {
                return result;
            }

            let completed = attempt + 1;
            if !self.should_retry(completed, result.status, result.error_kind) {
                return result;
            }

            let pause = self.backoff(attempt);
            debug!(
                url = %result.url,
                attempt = completed,
                max_attempts = self.max_attempts,
                status = result.status,
                pause_ms = pause.as_millis() as u64,
                "retrying fetch"
            );
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = cancel.cancelled() => {
                    let mut cancelled = result;
                    cancelled.error = Some("cancelled during retry backoff".into());
                    cancelled.error_kind = Some(ErrorKind::Cancelled);
                    return cancelled;
                }
            }
            attempt = completed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use url::Url;

    fn url() -> Url {
        Url::parse("https://example.com/x").unwrap()
    }

    fn with_status(status: u16) -> FetchResult {
        let mut result = FetchResult::new(url());
        result.status = status;
        if let Some(kind) = ErrorKind::from_status(status) {
            result.error = Some(format!("HTTP {status}"));
            result.error_kind = Some(kind);
        }
        result
    }

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
            ..Default::default()
        }
    }

    #[test]
    fn decision_table() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(1, 503, None));
        assert!(policy.should_retry(1, 429, None));
        assert!(policy.should_retry(1, 408, None));
        assert!(!policy.should_retry(1, 404, None));
        assert!(!policy.should_retry(1, 401, None));
        assert!(!policy.should_retry(3, 503, None));
        assert!(policy.should_retry(1, 0, Some(ErrorKind::Transport)));
        assert!(!policy.should_retry(1, 0, Some(ErrorKind::Parse)));
        assert!(!policy.should_retry(1, 0, None));
    }

    #[test]
    fn backoff_grows_and_clamps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1000),
            multiplier: 2.0,
            ..Default::default()
        };
        for attempt in 0..10 {
            let backoff = policy.backoff(attempt);
            assert!(backoff >= Duration::from_millis(100), "below floor at {attempt}");
            assert!(backoff <= Duration::from_millis(1250), "above cap at {attempt}");
        }
    }

    #[tokio::test]
    async fn success_returns_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = quick_policy()
            .execute(&CancellationToken::new(), move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    with_status(200)
                }
            })
            .await;
        assert!(result.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_retryable_status_exits_after_one_call() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = quick_policy()
            .execute(&CancellationToken::new(), move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    with_status(404)
                }
            })
            .await;
        assert_eq!(result.status, 404);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_exactly_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = quick_policy()
            .execute(&CancellationToken::new(), move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    with_status(503)
                }
            })
            .await;
        assert_eq!(result.status, 503);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn recovers_midway() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = quick_policy()
            .execute(&CancellationToken::new(), move |attempt| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if attempt < 1 {
                        with_status(502)
                    } else {
                        with_status(200)
                    }
                }
            })
            .await;
        assert!(result.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
