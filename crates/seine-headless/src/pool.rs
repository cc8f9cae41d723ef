//! Fixed-size browser slot pool.

use futures::StreamExt;
use seine_types::CrawlError;
use spider_chrome::{Browser, BrowserConfig};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Pool construction and shutdown knobs.
#[derive(Debug, Clone)]
pub struct BrowserPoolConfig {
    /// Hard cap on time spent closing browsers at shutdown.
    pub shutdown_timeout: Duration,
    /// Optional base directory for per-slot profile dirs (system temp when
    /// unset).
    pub profile_base_dir: Option<PathBuf>,
}

impl Default for BrowserPoolConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(10),
            profile_base_dir: None,
        }
    }
}

/// One long-lived headless browser, reused across URLs by a single worker.
pub struct BrowserSlot {
    index: usize,
    browser: Browser,
    handler_task: tokio::task::JoinHandle<()>,
    // Chrome locks the profile directory; every slot needs its own, kept
    // alive for the browser's lifetime.
    _profile_dir: TempDir,
}

impl BrowserSlot {
    async fn launch(index: usize, config: &BrowserPoolConfig) -> Result<Self, CrawlError> {
        let profile_dir = match &config.profile_base_dir {
            Some(base) => TempDir::new_in(base),
            None => TempDir::new(),
        }
        .map_err(|e| CrawlError::browser_pool(format!("profile dir for slot {index}: {e}")))?;

        let mut browser_config = BrowserConfig::builder()
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg("--disable-extensions")
            .arg("--disable-background-timer-throttling")
            .build()
            .map_err(|e| CrawlError::browser_pool(format!("browser config: {e}")))?;
        browser_config.user_data_dir = Some(profile_dir.path().to_path_buf());

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| CrawlError::browser_pool(format!("launch slot {index}: {e}")))?;

        // Drain CDP events for the browser's lifetime.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(error) = event {
                    warn!(slot = index, error = %error, "browser event error");
                }
            }
            debug!(slot = index, "browser event handler ended");
        });

        debug!(slot = index, "browser slot launched");
        Ok(Self {
            index,
            browser,
            handler_task,
            _profile_dir: profile_dir,
        })
    }

    /// Navigate, give scripts `js_wait` to settle, and dump the rendered
    /// outer HTML.
    pub async fn render(
        &self,
        url: &str,
        js_wait: Duration,
        navigation_timeout: Duration,
    ) -> Result<String, CrawlError> {
        let page = timeout(navigation_timeout, self.browser.new_page(url))
            .await
            .map_err(|_| CrawlError::transport(format!("navigation timed out: {url}")))?
            .map_err(|e| CrawlError::transport(format!("navigation failed: {e}")))?;

        tokio::time::sleep(js_wait).await;

        let html = timeout(Duration::from_secs(10), page.content())
            .await
            .map_err(|_| CrawlError::transport("content dump timed out"))?
            .map_err(|e| CrawlError::transport(format!("content dump failed: {e}")))?;

        if let Err(error) = page.close().await {
            debug!(slot = self.index, error = %error, "page close failed");
        }
        Ok(html)
    }

    async fn close(&mut self) {
        if let Err(error) = self.browser.close().await {
            warn!(slot = self.index, error = %error, "error closing browser");
        }
        self.handler_task.abort();
    }
}

impl Drop for BrowserSlot {
    fn drop(&mut self) {
        self.handler_task.abort();
    }
}

/// Fixed pool of browser slots handed out by worker index.
///
/// Slots are created once at launch and never replaced. A worker always gets
/// the slot at `worker_index % pool size`, so a slot is only ever driven by
/// one worker at a time and its pages never interleave.
pub struct BrowserPool {
    slots: Vec<Arc<Mutex<BrowserSlot>>>,
    config: BrowserPoolConfig,
    closed: AtomicBool,
}

impl BrowserPool {
    /// Launch `size` slots. Individual launch failures shrink the pool; only
    /// zero surviving slots is an initialization error.
    pub async fn launch(size: usize, config: BrowserPoolConfig) -> Result<Self, CrawlError> {
        let mut slots = Vec::with_capacity(size);
        for index in 0..size {
            match BrowserSlot::launch(index, &config).await {
                Ok(slot) => slots.push(Arc::new(Mutex::new(slot))),
                Err(error) => {
                    warn!(slot = index, error = %error, "browser slot failed to launch");
                }
            }
        }
        if slots.is_empty() {
            return Err(CrawlError::browser_pool(format!(
                "all {size} browser slots failed to launch"
            )));
        }
        info!(requested = size, launched = slots.len(), "browser pool ready");
        Ok(Self {
            slots,
            config,
            closed: AtomicBool::new(false),
        })
    }

    /// The slot pinned to `worker_index`, keeping a worker on the same
    /// browser across URLs. Errors after shutdown.
    pub fn get(&self, worker_index: usize) -> Result<Arc<Mutex<BrowserSlot>>, CrawlError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CrawlError::browser_pool("pool is shut down"));
        }
        Ok(self.slots[worker_index % self.slots.len()].clone())
    }

    /// Return a slot to the pool. Intentionally a no-op: slots are pinned per
    /// worker, so there is no in-flight count to release yet.
    pub fn release(&self, _worker_index: usize) {}

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Close every browser under the configured timeout; `get` errors
    /// afterwards.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let deadline = self.config.shutdown_timeout;
        let close_all = async {
            for slot in &self.slots {
                slot.lock().await.close().await;
            }
        };
        if timeout(deadline, close_all).await.is_err() {
            warn!(
                timeout_ms = deadline.as_millis() as u64,
                "browser pool shutdown timed out"
            );
        }
        info!(slots = self.slots.len(), "browser pool shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = BrowserPoolConfig::default();
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
        assert!(config.profile_base_dir.is_none());
    }

    // Launching real browsers needs a Chrome binary; the pinning contract is
    // covered through the modulo arithmetic here.
    #[test]
    fn worker_pinning_is_modulo() {
        for pool_size in 1..5usize {
            for worker in 0..10usize {
                assert!(worker % pool_size < pool_size);
            }
        }
    }
}
