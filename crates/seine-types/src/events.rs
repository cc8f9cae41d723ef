//! Lifecycle and progress event payloads.

use crate::job::JobStatus;
use crate::request::SourceKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Snapshot of a job's counters, published on ten-URL boundaries, on final
/// completion, and on terminal transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: Uuid,
    pub source_type: SourceKind,
    pub entity_type: String,
    pub status: JobStatus,
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub pending: u64,
    pub current_url: Option<String>,
    pub percentage: f64,
    pub estimated_completion: Option<DateTime<Utc>>,
}

/// Everything the engine publishes to the event sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CrawlEvent {
    JobCreated {
        job_id: Uuid,
        source_type: SourceKind,
        entity_type: String,
    },
    JobStarted {
        job_id: Uuid,
    },
    CrawlProgress(ProgressEvent),
    JobCompleted {
        job_id: Uuid,
        documents_saved: u64,
    },
    JobFailed {
        job_id: Uuid,
        error: String,
    },
    JobCancelled {
        job_id: Uuid,
    },
    DocumentSaved {
        job_id: Uuid,
        document_id: Uuid,
        source_id: String,
        saved_at: DateTime<Utc>,
    },
}

impl CrawlEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::JobCreated { .. } => "job_created",
            Self::JobStarted { .. } => "job_started",
            Self::CrawlProgress(_) => "crawl_progress",
            Self::JobCompleted { .. } => "job_completed",
            Self::JobFailed { .. } => "job_failed",
            Self::JobCancelled { .. } => "job_cancelled",
            Self::DocumentSaved { .. } => "document_saved",
        }
    }

    pub fn job_id(&self) -> Uuid {
        match self {
            Self::JobCreated { job_id, .. }
            | Self::JobStarted { job_id }
            | Self::JobCompleted { job_id, .. }
            | Self::JobFailed { job_id, .. }
            | Self::JobCancelled { job_id }
            | Self::DocumentSaved { job_id, .. } => *job_id,
            Self::CrawlProgress(p) => p.job_id,
        }
    }
}
