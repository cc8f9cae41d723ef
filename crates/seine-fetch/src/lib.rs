//! Fetching layer: per-job HTTP client construction and the single-attempt
//! URL fetcher that the retry policy wraps.

pub mod client;
pub mod fetch;

pub use client::build_job_client;
pub use fetch::{Fetcher, Transport};
