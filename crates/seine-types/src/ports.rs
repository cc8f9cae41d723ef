//! Collaborator ports.
//!
//! The engine talks to durable storage, the document store, the event bus,
//! the source/credential registry, and the HTML content pipeline exclusively
//! through these traits. Adapters live outside the engine (in-memory
//! implementations ship in `seine-storage`).

use crate::auth::AuthSnapshot;
use crate::config::DetailLevel;
use crate::errors::CrawlError;
use crate::events::CrawlEvent;
use crate::job::{CrawlJob, JobStatus};
use crate::progress::Progress;
use crate::request::SourceKind;
use crate::result::PageContent;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::broadcast;
use url::Url;
use uuid::Uuid;

/// Severity of a per-job log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Filters for job listings.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub source_type: Option<SourceKind>,
    pub limit: usize,
    pub offset: usize,
}

/// Durable job persistence.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn save_job(&self, job: &CrawlJob) -> Result<(), CrawlError>;

    async fn get_job(&self, id: Uuid) -> Result<Option<CrawlJob>, CrawlError>;

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<CrawlJob>, CrawlError>;

    async fn count_jobs(&self, filter: &JobFilter) -> Result<usize, CrawlError>;

    async fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<(), CrawlError>;

    async fn update_progress(&self, id: Uuid, progress: &Progress) -> Result<(), CrawlError>;

    async fn append_job_log(
        &self,
        id: Uuid,
        level: LogLevel,
        message: &str,
    ) -> Result<(), CrawlError>;

    async fn update_heartbeat(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), CrawlError>;

    /// Jobs whose heartbeat is older than `threshold`, for an external
    /// stale-job detector.
    async fn get_stale_jobs(&self, threshold: Duration) -> Result<Vec<CrawlJob>, CrawlError>;

    /// Durably record a normalized URL as seen for this job. Returns whether
    /// the URL was newly added.
    async fn mark_url_seen(&self, id: Uuid, normalized_url: &str) -> Result<bool, CrawlError>;

    /// Startup recovery: flip every `running` job back to `pending` so it is
    /// eligible for re-execution after an ungraceful shutdown. Returns the
    /// number of jobs flipped.
    async fn mark_running_jobs_as_pending(&self, reason: &str) -> Result<usize, CrawlError>;
}

/// A persisted document row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: Uuid,
    pub job_id: Uuid,
    pub parent_job_id: Option<Uuid>,
    pub source_type: SourceKind,
    /// Dedup key: the normalized source URL.
    pub source_id: String,
    pub title: String,
    pub markdown: String,
    pub detail: DetailLevel,
    pub meta: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The engine-side input to a document save.
#[derive(Debug, Clone)]
pub struct DocumentDraft {
    pub job_id: Uuid,
    pub parent_job_id: Option<Uuid>,
    pub source_type: SourceKind,
    pub source_id: String,
    pub title: String,
    pub markdown: String,
    pub detail: DetailLevel,
    pub meta: HashMap<String, String>,
}

/// Document persistence.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn save_document(&self, doc: &StoredDocument) -> Result<(), CrawlError>;

    async fn update_document(&self, doc: &StoredDocument) -> Result<(), CrawlError>;

    async fn get_document_by_source(
        &self,
        source_type: SourceKind,
        source_id: &str,
    ) -> Result<Option<StoredDocument>, CrawlError>;

    async fn count_documents_by_source(
        &self,
        source_type: SourceKind,
    ) -> Result<usize, CrawlError>;

    async fn full_text_search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<StoredDocument>, CrawlError>;
}

/// Event publication. Subscribers receive every event and filter by
/// [`CrawlEvent::event_type`].
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: CrawlEvent) -> Result<(), CrawlError>;

    fn subscribe(&self) -> broadcast::Receiver<CrawlEvent>;
}

/// Lookup of source configuration and credentials by source id, used when the
/// caller does not supply snapshots at submission.
#[async_trait]
pub trait SourceRegistry: Send + Sync {
    async fn source_config(&self, source_id: &str)
        -> Result<Option<serde_json::Value>, CrawlError>;

    async fn auth_snapshot(&self, source_id: &str) -> Result<Option<AuthSnapshot>, CrawlError>;
}

/// HTML post-processing: metadata harvesting, link extraction, and markdown
/// conversion. CPU-bound and synchronous.
pub trait ContentPipeline: Send + Sync {
    fn process(&self, html: &str, base: &Url) -> Result<PageContent, CrawlError>;
}
