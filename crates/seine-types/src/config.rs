//! Per-job crawl policy.

use crate::errors::CrawlError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How much of a page the persister keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    /// Title and metadata only.
    Metadata,
    /// Full converted content.
    #[default]
    Full,
}

/// Numeric and boolean crawl policy, snapshotted into the job at submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Maximum link depth; 0 means unlimited.
    pub max_depth: u32,
    /// Page budget; 0 means unlimited.
    pub max_pages: u64,
    /// Worker count per job.
    pub concurrency: usize,
    /// Minimum spacing between requests to the same host.
    pub rate_limit_ms: u64,
    pub retry_attempts: u32,
    /// Initial retry backoff.
    pub retry_backoff_ms: u64,
    /// Keep only URLs matching one of these (empty = keep all).
    pub include: Vec<String>,
    /// Drop URLs matching any of these.
    pub exclude: Vec<String>,
    pub follow_links: bool,
    pub detail: DetailLevel,
    /// Route fetches through the headless browser pool.
    pub render_js: bool,
    /// Settle time after navigation before dumping HTML.
    pub js_wait_ms: u64,
    pub max_body_bytes: usize,
    pub request_timeout_ms: u64,
    /// Cap on the per-job archived result list; 0 keeps everything.
    pub max_results_kept: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_pages: 0,
            concurrency: num_cpus::get().clamp(2, 8),
            rate_limit_ms: 1000,
            retry_attempts: 3,
            retry_backoff_ms: 500,
            include: Vec::new(),
            exclude: Vec::new(),
            follow_links: true,
            detail: DetailLevel::Full,
            render_js: false,
            js_wait_ms: 2000,
            max_body_bytes: 10 * 1024 * 1024,
            request_timeout_ms: 30_000,
            max_results_kept: 1000,
        }
    }
}

impl CrawlConfig {
    pub fn validate(&self) -> Result<(), CrawlError> {
        if self.concurrency == 0 {
            return Err(CrawlError::fatal_config("concurrency must be at least 1"));
        }
        if self.max_body_bytes == 0 {
            return Err(CrawlError::fatal_config("max_body_bytes must be positive"));
        }
        if self.request_timeout_ms == 0 {
            return Err(CrawlError::fatal_config(
                "request_timeout_ms must be positive",
            ));
        }
        Ok(())
    }

    /// Depth gate. A zero `max_depth` admits every depth.
    pub fn depth_allows(&self, depth: u32) -> bool {
        self.max_depth == 0 || depth <= self.max_depth
    }

    /// Whether discovery from a page at `depth` may still enqueue children.
    pub fn can_descend_from(&self, depth: u32) -> bool {
        self.follow_links && (self.max_depth == 0 || depth < self.max_depth)
    }

    /// Page-budget gate on the completed counter.
    pub fn under_page_budget(&self, completed: u64) -> bool {
        self.max_pages == 0 || completed < self.max_pages
    }

    pub fn rate_limit(&self) -> Duration {
        Duration::from_millis(self.rate_limit_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn js_wait(&self) -> Duration {
        Duration::from_millis(self.js_wait_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_roundtrip_is_field_exact() {
        let config = CrawlConfig {
            max_depth: 5,
            max_pages: 200,
            concurrency: 8,
            rate_limit_ms: 250,
            retry_attempts: 4,
            retry_backoff_ms: 100,
            include: vec!["docs/".into()],
            exclude: vec![r"\.pdf$".into()],
            follow_links: false,
            detail: DetailLevel::Metadata,
            render_js: true,
            js_wait_ms: 500,
            max_body_bytes: 1024,
            request_timeout_ms: 5000,
            max_results_kept: 0,
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: CrawlConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn zero_depth_is_unlimited() {
        let config = CrawlConfig {
            max_depth: 0,
            ..Default::default()
        };
        assert!(config.depth_allows(0));
        assert!(config.depth_allows(10_000));
        assert!(config.can_descend_from(10_000));
    }

    #[test]
    fn bounded_depth_discards_beyond() {
        let config = CrawlConfig {
            max_depth: 2,
            ..Default::default()
        };
        assert!(config.depth_allows(2));
        assert!(!config.depth_allows(3));
        assert!(config.can_descend_from(1));
        assert!(!config.can_descend_from(2));
    }

    #[test]
    fn page_budget() {
        let config = CrawlConfig {
            max_pages: 3,
            ..Default::default()
        };
        assert!(config.under_page_budget(2));
        assert!(!config.under_page_budget(3));
        let unlimited = CrawlConfig {
            max_pages: 0,
            ..Default::default()
        };
        assert!(unlimited.under_page_budget(u64::MAX - 1));
    }

    #[test]
    fn zero_concurrency_rejected() {
        let config = CrawlConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
