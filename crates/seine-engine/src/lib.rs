//! Crawl orchestration for Seine.
//!
//! The engine owns every running job: its deduplicating URL queue, its
//! workers, its monitor task, and its per-job HTTP client. Persistence and
//! event emission go through the ports in `seine_types`; the engine itself
//! keeps only in-memory state plus the coarse job-state lock.

pub mod controller;
pub mod queue;
mod state;
mod worker;

pub use controller::{Engine, EngineConfig, Environment, StartCrawlRequest};
pub use queue::{Popped, UrlQueue};
