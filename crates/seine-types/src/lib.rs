//! Shared data model for the Seine crawl engine.
//!
//! Everything the engine persists, emits, or hands across a crate boundary
//! lives here: the job record and its lifecycle, crawl configuration,
//! progress counters, queue items, fetch results, auth snapshots, event
//! payloads, the error taxonomy, and the collaborator ports (job store,
//! document store, event sink, source registry, content pipeline).

pub mod auth;
pub mod config;
pub mod errors;
pub mod events;
pub mod job;
pub mod ports;
pub mod progress;
pub mod request;
pub mod result;

pub use auth::{AuthSnapshot, CookieSpec};
pub use config::{CrawlConfig, DetailLevel};
pub use errors::{CrawlError, ErrorKind};
pub use events::{CrawlEvent, ProgressEvent};
pub use job::{CrawlJob, JobStatus};
pub use ports::{
    ContentPipeline, DocumentDraft, DocumentStore, EventSink, JobFilter, JobStore, LogLevel,
    SourceRegistry, StoredDocument,
};
pub use progress::Progress;
pub use request::{SourceKind, UrlRequest};
pub use result::{FetchResult, PageContent};
