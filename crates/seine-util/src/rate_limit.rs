//! Per-host request spacing.

use dashmap::DashMap;
use seine_types::CrawlError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::trace;
use url::Url;

#[derive(Debug)]
struct HostSlot {
    last: Option<Instant>,
    delay: Duration,
}

/// Spaces requests to the same host by at least a configured delay.
///
/// Each host gets its own slot; waiting holds the per-host lock across the
/// sleep so back-to-back callers against one host are strictly serialized.
/// URLs without a parseable host bypass the limiter entirely.
pub struct RateLimiter {
    hosts: DashMap<String, Arc<Mutex<HostSlot>>>,
    default_delay: Duration,
}

impl RateLimiter {
    pub fn new(default_delay: Duration) -> Self {
        Self {
            hosts: DashMap::new(),
            default_delay,
        }
    }

    /// Override the spacing for one host.
    pub async fn set_delay(&self, host: &str, delay: Duration) {
        let slot = self.slot(host);
        slot.lock().await.delay = delay;
    }

    /// Sleep until this URL's host is allowed another request, then stamp the
    /// request time. Returns immediately for host-less URLs and zero delays.
    pub async fn wait(&self, cancel: &CancellationToken, url: &Url) -> Result<(), CrawlError> {
        let Some(host) = url.host_str() else {
            return Ok(());
        };

        let slot = self.slot(host);
        let mut guard = slot.lock().await;
        if let Some(last) = guard.last {
            let earliest = last + guard.delay;
            let now = Instant::now();
            if earliest > now {
                let pause = earliest - now;
                trace!(host = %host, pause_ms = pause.as_millis() as u64, "rate limit pause");
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = cancel.cancelled() => return Err(CrawlError::Cancelled),
                }
            }
        }
        guard.last = Some(Instant::now());
        Ok(())
    }

    pub fn tracked_hosts(&self) -> usize {
        self.hosts.len()
    }

    fn slot(&self, host: &str) -> Arc<Mutex<HostSlot>> {
        self.hosts
            .entry(host.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(HostSlot {
                    last: None,
                    delay: self.default_delay,
                }))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test]
    async fn zero_delay_never_sleeps() {
        let limiter = RateLimiter::new(Duration::ZERO);
        let cancel = CancellationToken::new();
        let url = parse("https://example.com/a");

        let start = Instant::now();
        for _ in 0..10 {
            limiter.wait(&cancel, &url).await.unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn spaces_back_to_back_requests() {
        let limiter = RateLimiter::new(Duration::from_millis(80));
        let cancel = CancellationToken::new();
        let url = parse("https://example.com/a");

        limiter.wait(&cancel, &url).await.unwrap();
        let start = Instant::now();
        limiter.wait(&cancel, &url).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(75));
    }

    #[tokio::test]
    async fn different_hosts_are_independent() {
        let limiter = RateLimiter::new(Duration::from_millis(200));
        let cancel = CancellationToken::new();

        limiter.wait(&cancel, &parse("https://a.example/x")).await.unwrap();
        let start = Instant::now();
        limiter.wait(&cancel, &parse("https://b.example/x")).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(limiter.tracked_hosts(), 2);
    }

    #[tokio::test]
    async fn per_host_override_applies() {
        let limiter = RateLimiter::new(Duration::from_secs(5));
        let cancel = CancellationToken::new();
        let url = parse("https://slow.example/x");

        limiter.set_delay("slow.example", Duration::ZERO).await;
        limiter.wait(&cancel, &url).await.unwrap();
        let start = Instant::now();
        limiter.wait(&cancel, &url).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn cancellation_interrupts_wait() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let url = parse("https://example.com/a");

        limiter.wait(&cancel, &url).await.unwrap();
        cancel.cancel();
        let result = limiter.wait(&cancel, &url).await;
        assert!(matches!(result, Err(CrawlError::Cancelled)));
    }
}
