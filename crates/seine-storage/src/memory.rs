//! In-memory port adapters.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use seine_types::{
    AuthSnapshot, CrawlError, CrawlJob, DocumentStore, JobFilter, JobStatus, JobStore, LogLevel,
    Progress, SourceKind, SourceRegistry, StoredDocument,
};
use std::collections::{HashMap, HashSet};
use tracing::info;
use uuid::Uuid;

/// One per-job log line kept by the in-memory store.
#[derive(Debug, Clone)]
pub struct JobLogEntry {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// DashMap-backed [`JobStore`] for single-instance deployments and tests.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: DashMap<Uuid, CrawlJob>,
    seen: DashMap<Uuid, HashSet<String>>,
    logs: DashMap<Uuid, Vec<JobLogEntry>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn logs_for(&self, id: Uuid) -> Vec<JobLogEntry> {
        self.logs.get(&id).map(|l| l.clone()).unwrap_or_default()
    }

    pub fn seen_count(&self, id: Uuid) -> usize {
        self.seen.get(&id).map(|s| s.len()).unwrap_or(0)
    }

    fn matches(job: &CrawlJob, filter: &JobFilter) -> bool {
        filter.status.map_or(true, |s| job.status == s)
            && filter.source_type.map_or(true, |s| job.source_type == s)
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn save_job(&self, job: &CrawlJob) -> Result<(), CrawlError> {
        self.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<CrawlJob>, CrawlError> {
        Ok(self.jobs.get(&id).map(|j| j.clone()))
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<CrawlJob>, CrawlError> {
        let mut jobs: Vec<CrawlJob> = self
            .jobs
            .iter()
            .filter(|entry| Self::matches(entry.value(), filter))
            .map(|entry| entry.value().clone())
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let jobs = jobs.into_iter().skip(filter.offset);
        Ok(if filter.limit > 0 {
            jobs.take(filter.limit).collect()
        } else {
            jobs.collect()
        })
    }

    async fn count_jobs(&self, filter: &JobFilter) -> Result<usize, CrawlError> {
        Ok(self
            .jobs
            .iter()
            .filter(|entry| Self::matches(entry.value(), filter))
            .count())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<(), CrawlError> {
        let mut job = self.jobs.get_mut(&id).ok_or(CrawlError::JobNotFound(id))?;
        job.status = status;
        if let Some(error) = error {
            job.error = Some(error);
        }
        match status {
            JobStatus::Running if job.started_at.is_none() => job.started_at = Some(Utc::now()),
            s if s.is_terminal() => job.completed_at = Some(Utc::now()),
            _ => {}
        }
        Ok(())
    }

    async fn update_progress(&self, id: Uuid, progress: &Progress) -> Result<(), CrawlError> {
        let mut job = self.jobs.get_mut(&id).ok_or(CrawlError::JobNotFound(id))?;
        job.progress = progress.clone();
        job.result_count = progress.completed;
        job.failed_count = progress.failed;
        Ok(())
    }

    async fn append_job_log(
        &self,
        id: Uuid,
        level: LogLevel,
        message: &str,
    ) -> Result<(), CrawlError> {
        self.logs.entry(id).or_default().push(JobLogEntry {
            at: Utc::now(),
            level,
            message: message.to_string(),
        });
        Ok(())
    }

    async fn update_heartbeat(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), CrawlError> {
        let mut job = self.jobs.get_mut(&id).ok_or(CrawlError::JobNotFound(id))?;
        job.last_heartbeat = Some(at);
        Ok(())
    }

    async fn get_stale_jobs(&self, threshold: Duration) -> Result<Vec<CrawlJob>, CrawlError> {
        let cutoff = Utc::now() - threshold;
        Ok(self
            .jobs
            .iter()
            .filter(|entry| {
                let job = entry.value();
                job.status == JobStatus::Running
                    && job.last_heartbeat.map_or(true, |hb| hb < cutoff)
            })
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn mark_url_seen(&self, id: Uuid, normalized_url: &str) -> Result<bool, CrawlError> {
        Ok(self
            .seen
            .entry(id)
            .or_default()
            .insert(normalized_url.to_string()))
    }

    async fn mark_running_jobs_as_pending(&self, reason: &str) -> Result<usize, CrawlError> {
        let mut flipped = 0;
        for mut entry in self.jobs.iter_mut() {
            if entry.value().status == JobStatus::Running {
                // Recovery sweep bypasses the lifecycle guard on purpose: the
                // process that owned these jobs is gone.
                entry.value_mut().status = JobStatus::Pending;
                flipped += 1;
                let id = *entry.key();
                self.logs.entry(id).or_default().push(JobLogEntry {
                    at: Utc::now(),
                    level: LogLevel::Warn,
                    message: format!("requeued as pending: {reason}"),
                });
            }
        }
        if flipped > 0 {
            info!(flipped, reason, "recovered orphaned running jobs");
        }
        Ok(flipped)
    }
}

/// DashMap-backed [`DocumentStore`].
#[derive(Default)]
pub struct InMemoryDocumentStore {
    docs: DashMap<Uuid, StoredDocument>,
    by_source: DashMap<(SourceKind, String), Uuid>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn save_document(&self, doc: &StoredDocument) -> Result<(), CrawlError> {
        self.by_source
            .insert((doc.source_type, doc.source_id.clone()), doc.id);
        self.docs.insert(doc.id, doc.clone());
        Ok(())
    }

    async fn update_document(&self, doc: &StoredDocument) -> Result<(), CrawlError> {
        if !self.docs.contains_key(&doc.id) {
            return Err(CrawlError::persistence(format!(
                "document {} not found",
                doc.id
            )));
        }
        self.docs.insert(doc.id, doc.clone());
        Ok(())
    }

    async fn get_document_by_source(
        &self,
        source_type: SourceKind,
        source_id: &str,
    ) -> Result<Option<StoredDocument>, CrawlError> {
        Ok(self
            .by_source
            .get(&(source_type, source_id.to_string()))
            .and_then(|id| self.docs.get(&id).map(|d| d.clone())))
    }

    async fn count_documents_by_source(
        &self,
        source_type: SourceKind,
    ) -> Result<usize, CrawlError> {
        Ok(self
            .by_source
            .iter()
            .filter(|entry| entry.key().0 == source_type)
            .count())
    }

    async fn full_text_search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<StoredDocument>, CrawlError> {
        let needle = query.to_lowercase();
        let mut hits: Vec<StoredDocument> = self
            .docs
            .iter()
            .filter(|entry| {
                let doc = entry.value();
                doc.title.to_lowercase().contains(&needle)
                    || doc.markdown.to_lowercase().contains(&needle)
            })
            .map(|entry| entry.value().clone())
            .collect();
        hits.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        hits.truncate(limit);
        Ok(hits)
    }
}

/// Fixed-map [`SourceRegistry`] for tests and embedded deployments.
#[derive(Default)]
pub struct StaticSourceRegistry {
    configs: HashMap<String, serde_json::Value>,
    auth: HashMap<String, AuthSnapshot>,
}

impl StaticSourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, id: impl Into<String>, config: serde_json::Value) -> Self {
        self.configs.insert(id.into(), config);
        self
    }

    pub fn with_auth(mut self, id: impl Into<String>, auth: AuthSnapshot) -> Self {
        self.auth.insert(id.into(), auth);
        self
    }
}

#[async_trait]
impl SourceRegistry for StaticSourceRegistry {
    async fn source_config(
        &self,
        source_id: &str,
    ) -> Result<Option<serde_json::Value>, CrawlError> {
        Ok(self.configs.get(source_id).cloned())
    }

    async fn auth_snapshot(&self, source_id: &str) -> Result<Option<AuthSnapshot>, CrawlError> {
        Ok(self.auth.get(source_id).cloned())
    }
}
