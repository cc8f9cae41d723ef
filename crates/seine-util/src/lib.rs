//! Shared utilities for the Seine crawl engine: URL normalization, per-host
//! request spacing, and retry with jittered exponential backoff.

pub mod rate_limit;
pub mod retry;
pub mod url_norm;

pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;
pub use url_norm::{normalize_url, normalized_key};
