//! Job submission, lifecycle, and the per-job monitor.

use crate::queue::UrlQueue;
use crate::state::JobState;
use crate::worker::{run_worker, WorkerContext};
use chrono::Utc;
use parking_lot::Mutex;
use seine_extract::{HtmlPipeline, LinkFilter};
use seine_fetch::{build_job_client, Fetcher};
use seine_headless::{BrowserPool, BrowserPoolConfig};
use seine_storage::DocumentPersister;
use seine_types::{
    ContentPipeline, CrawlError, CrawlEvent, CrawlJob, DocumentStore, EventSink, FetchResult,
    JobFilter, JobStatus, JobStore, LogLevel, SourceKind, SourceRegistry, UrlRequest,
};
use seine_util::{normalized_key, RateLimiter, RetryPolicy};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::{Host, Url};
use uuid::Uuid;

/// Deployment environment; production refuses loopback seeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn from_label(label: &str) -> Self {
        if label.eq_ignore_ascii_case("production") {
            Self::Production
        } else {
            Self::Development
        }
    }
}

/// Engine-level tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub environment: Environment,
    /// Monitor tick interval.
    pub monitor_interval: Duration,
    /// Heartbeat is written every this-many monitor ticks.
    pub heartbeat_every_ticks: u64,
    /// Worker pop timeout before it runs diagnostics and retries.
    pub pop_timeout: Duration,
    /// Minimum spacing between worker consistency diagnostics.
    pub diagnostics_interval: Duration,
    /// Poll interval for [`Engine::wait_for_job`].
    pub wait_poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            monitor_interval: Duration::from_secs(2),
            heartbeat_every_ticks: 15,
            pop_timeout: Duration::from_secs(5),
            diagnostics_interval: Duration::from_secs(30),
            wait_poll_interval: Duration::from_millis(500),
        }
    }
}

/// Submission parameters for [`Engine::start_crawl`].
#[derive(Debug, Clone, Default)]
pub struct StartCrawlRequest {
    /// Free-form source-category label (`jira`, `confluence`, anything else
    /// crawls as plain web).
    pub source_type: String,
    pub entity_type: String,
    pub seed_urls: Vec<String>,
    pub config: seine_types::CrawlConfig,
    /// Source to resolve snapshots from when none are supplied inline.
    pub source_id: Option<String>,
    /// Re-fetch both snapshots from the registry even when supplied.
    pub refresh_source: bool,
    pub source_config: Option<serde_json::Value>,
    pub auth: Option<seine_types::AuthSnapshot>,
}

pub(crate) struct EngineInner {
    pub config: EngineConfig,
    pub jobs: Mutex<HashMap<Uuid, JobState>>,
    /// Result lists of jobs that already left the live map, so
    /// [`Engine::get_results`] keeps working after the monitor cleans up.
    pub finished: Mutex<HashMap<Uuid, Vec<FetchResult>>>,
    pub store: Arc<dyn JobStore>,
    pub persister: Arc<DocumentPersister>,
    pub events: Arc<dyn EventSink>,
    pub registry: Option<Arc<dyn SourceRegistry>>,
    pub pipeline: Arc<dyn ContentPipeline>,
    pub root_cancel: CancellationToken,
}

impl EngineInner {
    /// Read a job's state under the coarse lock. The closure must not block.
    pub fn with_job<R>(&self, id: Uuid, f: impl FnOnce(&JobState) -> R) -> Option<R> {
        self.jobs.lock().get(&id).map(f)
    }

    /// Mutate a job's state under the coarse lock. The closure must not
    /// block; all store and event I/O happens after release.
    pub fn with_job_mut<R>(&self, id: Uuid, f: impl FnOnce(&mut JobState) -> R) -> Option<R> {
        self.jobs.lock().get_mut(&id).map(f)
    }
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    config: EngineConfig,
    store: Arc<dyn JobStore>,
    documents: Arc<dyn DocumentStore>,
    events: Arc<dyn EventSink>,
    registry: Option<Arc<dyn SourceRegistry>>,
    pipeline: Option<Arc<dyn ContentPipeline>>,
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn source_registry(mut self, registry: Arc<dyn SourceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn content_pipeline(mut self, pipeline: Arc<dyn ContentPipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn build(self) -> Engine {
        let persister = Arc::new(DocumentPersister::new(
            self.documents.clone(),
            self.events.clone(),
        ));
        Engine {
            inner: Arc::new(EngineInner {
                config: self.config,
                jobs: Mutex::new(HashMap::new()),
                finished: Mutex::new(HashMap::new()),
                store: self.store,
                persister,
                events: self.events,
                registry: self.registry,
                pipeline: self
                    .pipeline
                    .unwrap_or_else(|| Arc::new(HtmlPipeline::new())),
                root_cancel: CancellationToken::new(),
            }),
        }
    }
}

/// The crawl engine: submission surface, job lifecycle, and recovery.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn builder(
        store: Arc<dyn JobStore>,
        documents: Arc<dyn DocumentStore>,
        events: Arc<dyn EventSink>,
    ) -> EngineBuilder {
        EngineBuilder {
            config: EngineConfig::default(),
            store,
            documents,
            events,
            registry: None,
            pipeline: None,
        }
    }

    /// Startup recovery: flip orphaned `running` jobs back to `pending` so
    /// they are eligible for re-execution. Returns the number recovered.
    pub async fn start(&self) -> Result<usize, CrawlError> {
        self.inner
            .store
            .mark_running_jobs_as_pending("engine restart")
            .await
    }

    /// Submit a crawl job: validate seeds, snapshot config and credentials,
    /// persist, seed the queue, and launch workers plus the monitor.
    pub async fn start_crawl(&self, request: StartCrawlRequest) -> Result<Uuid, CrawlError> {
        request.config.validate()?;
        let seeds = validate_seeds(&request.seed_urls, self.inner.config.environment)?;

        let source = SourceKind::parse(&request.source_type);
        let mut job = CrawlJob::new(
            source,
            request.entity_type.clone(),
            request.seed_urls.clone(),
            request.config.clone(),
        );
        job.refresh_source = request.refresh_source;

        let (source_config, auth) = self
            .resolve_snapshots(
                request.source_config,
                request.auth,
                request.source_id.as_deref(),
                request.refresh_source,
            )
            .await?;
        job.source_config = source_config;
        job.auth = auth;

        self.inner.store.save_job(&job).await?;
        let _ = self
            .inner
            .events
            .publish(CrawlEvent::JobCreated {
                job_id: job.id,
                source_type: job.source_type,
                entity_type: job.entity_type.clone(),
            })
            .await;

        self.launch(job, seeds).await
    }

    /// Relaunch a pending job from its stored record (fresh progress, fresh
    /// queue reseeded from the stored seed URLs).
    pub async fn resume_job(&self, id: Uuid) -> Result<(), CrawlError> {
        let mut job = self
            .inner
            .store
            .get_job(id)
            .await?
            .ok_or(CrawlError::JobNotFound(id))?;
        if job.status != JobStatus::Pending {
            return Err(CrawlError::invalid_state(
                id,
                format!("cannot resume a {:?} job", job.status),
            ));
        }
        job.progress = Default::default();
        job.error = None;
        job.started_at = None;
        job.completed_at = None;

        let seeds = validate_seeds(&job.seed_urls, self.inner.config.environment)?;
        self.launch(job, seeds).await.map(|_| ())
    }

    pub async fn get_status(&self, id: Uuid) -> Result<JobStatus, CrawlError> {
        if let Some(status) = self.inner.with_job(id, |state| state.job.status) {
            return Ok(status);
        }
        self.inner
            .store
            .get_job(id)
            .await?
            .map(|job| job.status)
            .ok_or(CrawlError::JobNotFound(id))
    }

    pub async fn get_job(&self, id: Uuid) -> Result<CrawlJob, CrawlError> {
        if let Some(job) = self.inner.with_job(id, |state| state.job.clone()) {
            return Ok(job);
        }
        self.inner
            .store
            .get_job(id)
            .await?
            .ok_or(CrawlError::JobNotFound(id))
    }

    /// Archived per-URL results, surviving job cleanup for this process's
    /// lifetime. A job that completed in another instance has no local
    /// results; asking for them is an error that carries the summary
    /// counters.
    pub async fn get_results(&self, id: Uuid) -> Result<Vec<FetchResult>, CrawlError> {
        if let Some(results) = self.inner.with_job(id, |state| state.results.clone()) {
            return Ok(results);
        }
        if let Some(results) = self.inner.finished.lock().get(&id).cloned() {
            return Ok(results);
        }
        let job = self
            .inner
            .store
            .get_job(id)
            .await?
            .ok_or(CrawlError::JobNotFound(id))?;
        Err(CrawlError::invalid_state(
            id,
            format!(
                "results no longer in memory ({:?}: {} completed, {} failed, {} total)",
                job.status, job.progress.completed, job.progress.failed, job.progress.total
            ),
        ))
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<CrawlJob>, CrawlError> {
        self.inner.store.list_jobs(filter).await
    }

    /// Cancel a running job. Terminal within one call; the monitor retries
    /// persistence if the terminal write fails.
    pub async fn cancel_job(&self, id: Uuid) -> Result<(), CrawlError> {
        self.end_job(id, JobStatus::Cancelled, None).await
    }

    /// Explicitly fail a running job with a reason (used by stale-job
    /// detectors).
    pub async fn fail_job(&self, id: Uuid, reason: &str) -> Result<(), CrawlError> {
        self.end_job(id, JobStatus::Failed, Some(reason.to_string()))
            .await
    }

    /// Copy a job's immutable fields into a new pending job with a fresh id
    /// and zeroed progress. The copy is not executed by this call.
    pub async fn rerun_job(
        &self,
        id: Uuid,
        config_override: Option<seine_types::CrawlConfig>,
    ) -> Result<Uuid, CrawlError> {
        let job = self
            .inner
            .store
            .get_job(id)
            .await?
            .ok_or(CrawlError::JobNotFound(id))?;
        let copy = job.rerun(config_override);
        self.inner.store.save_job(&copy).await?;
        let _ = self
            .inner
            .events
            .publish(CrawlEvent::JobCreated {
                job_id: copy.id,
                source_type: copy.source_type,
                entity_type: copy.entity_type.clone(),
            })
            .await;
        info!(job_id = %id, new_job_id = %copy.id, "job rerun created");
        Ok(copy.id)
    }

    /// Poll until the job is terminal, then return its archived results.
    pub async fn wait_for_job(
        &self,
        cancel: &CancellationToken,
        id: Uuid,
    ) -> Result<Vec<FetchResult>, CrawlError> {
        loop {
            if self.get_status(id).await?.is_terminal() {
                return self.get_results(id).await;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.inner.config.wait_poll_interval) => {}
                _ = cancel.cancelled() => return Err(CrawlError::Cancelled),
            }
        }
    }

    /// Stop everything: cancel workers and monitors, close queues, shut down
    /// browser pools. Jobs left running in the store are recovered by the
    /// next [`Engine::start`].
    pub async fn shutdown(&self) {
        self.inner.root_cancel.cancel();
        let states: Vec<(Arc<UrlQueue>, Option<Arc<BrowserPool>>)> = {
            let jobs = self.inner.jobs.lock();
            jobs.values()
                .map(|state| (state.queue.clone(), state.browser_pool.clone()))
                .collect()
        };
        for (queue, pool) in states {
            queue.close();
            if let Some(pool) = pool {
                pool.shutdown().await;
            }
        }
        info!("engine shut down");
    }

    async fn resolve_snapshots(
        &self,
        inline_config: Option<serde_json::Value>,
        inline_auth: Option<seine_types::AuthSnapshot>,
        source_id: Option<&str>,
        refresh: bool,
    ) -> Result<(Option<serde_json::Value>, Option<seine_types::AuthSnapshot>), CrawlError> {
        let mut source_config = inline_config;
        let mut auth = inline_auth;
        if let (Some(source_id), Some(registry)) = (source_id, &self.inner.registry) {
            if refresh {
                if let Some(fresh) = registry.source_config(source_id).await? {
                    source_config = Some(fresh);
                }
                if let Some(fresh) = registry.auth_snapshot(source_id).await? {
                    auth = Some(fresh);
                }
            } else {
                if source_config.is_none() {
                    source_config = registry.source_config(source_id).await?;
                }
                if auth.is_none() {
                    auth = registry.auth_snapshot(source_id).await?;
                }
            }
        }
        Ok((source_config, auth))
    }

    /// Shared launch path for submission and resume: queue seeding, the
    /// running transition, the browser pool, workers, and the monitor.
    async fn launch(&self, mut job: CrawlJob, seeds: Vec<Url>) -> Result<Uuid, CrawlError> {
        let job_id = job.id;
        let base = seeds[0].clone();
        let client = build_job_client(job.auth.as_ref(), &base, job.config.request_timeout())?;

        let queue = Arc::new(UrlQueue::new());
        let mut added: u64 = 0;
        let mut seeded: Vec<Url> = Vec::new();
        for url in &seeds {
            let request = UrlRequest::seed(url.clone(), job_id, job.source_type, &job.entity_type);
            if queue.push(request) {
                added += 1;
                seeded.push(url.clone());
            }
        }
        for url in &seeded {
            if let Err(err) = self
                .inner
                .store
                .mark_url_seen(job_id, &normalized_key(url))
                .await
            {
                warn!(job_id = %job_id, url = %url, error = %err, "mark_url_seen failed");
            }
        }

        job.progress.add_discovered(added);
        job.transition(JobStatus::Running)?;
        job.progress.start(job.started_at.unwrap_or_else(Utc::now));
        self.inner.store.save_job(&job).await?;

        let browser_pool = if job.config.render_js {
            match BrowserPool::launch(job.config.concurrency, BrowserPoolConfig::default()).await {
                Ok(pool) => Some(Arc::new(pool)),
                Err(error) => {
                    job.error = Some(error.to_string());
                    let _ = job.transition(JobStatus::Failed);
                    let _ = self.inner.store.save_job(&job).await;
                    return Err(error);
                }
            }
        } else {
            None
        };

        let cancel = self.inner.root_cancel.child_token();
        let config = Arc::new(job.config.clone());
        let state = JobState {
            job: job.clone(),
            queue: queue.clone(),
            results: Vec::new(),
            client: client.clone(),
            browser_pool: browser_pool.clone(),
            cancel: cancel.clone(),
            in_flight: 0,
        };
        self.inner.jobs.lock().insert(job_id, state);

        let limiter = Arc::new(RateLimiter::new(config.rate_limit()));
        let retry = RetryPolicy::from_config(&config);
        let filter = Arc::new(LinkFilter::new(&config.include, &config.exclude));
        let fetcher = Arc::new(Fetcher::new(self.inner.pipeline.clone()));

        for index in 0..config.concurrency {
            let ctx = WorkerContext {
                engine: self.inner.clone(),
                job_id,
                index,
                queue: queue.clone(),
                client: client.clone(),
                pool: browser_pool.clone(),
                limiter: limiter.clone(),
                retry: retry.clone(),
                config: config.clone(),
                filter: filter.clone(),
                seed: base.clone(),
                fetcher: fetcher.clone(),
                cancel: cancel.clone(),
            };
            tokio::spawn(run_worker(ctx));
        }
        tokio::spawn(run_monitor(self.inner.clone(), job_id, cancel));

        let _ = self
            .inner
            .events
            .publish(CrawlEvent::JobStarted { job_id })
            .await;
        if let Some(event) = self.inner.with_job(job_id, |state| state.progress_event()) {
            let _ = self
                .inner
                .events
                .publish(CrawlEvent::CrawlProgress(event))
                .await;
        }

        info!(
            job_id = %job_id,
            source = %job.source_type,
            seeds = added,
            workers = config.concurrency,
            render_js = config.render_js,
            "crawl job launched"
        );
        Ok(job_id)
    }

    /// Shared terminal path for cancellation and explicit failure. Legal only
    /// from `running`.
    async fn end_job(
        &self,
        id: Uuid,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<(), CrawlError> {
        let transition = self.inner.with_job_mut(id, |state| {
            state.job.transition(status).map(|_| {
                if let Some(error) = &error {
                    state.job.error = Some(error.clone());
                }
                state.queue.close();
                state.cancel.cancel();
                state.job.progress.clone()
            })
        });
        let progress = match transition {
            None => return Err(CrawlError::JobNotFound(id)),
            Some(Err(err)) => return Err(err),
            Some(Ok(progress)) => progress,
        };

        let _ = self
            .inner
            .store
            .append_job_log(
                id,
                LogLevel::Info,
                &format!(
                    "job {status:?}: completed {} failed {} pending {} of total {}",
                    progress.completed, progress.failed, progress.pending, progress.total
                ),
            )
            .await;

        // Persist and clean up; on store failure the monitor retries from the
        // in-memory terminal state.
        let _ = finalize(&self.inner, id).await;
        Ok(())
    }
}

fn validate_seeds(seed_urls: &[String], environment: Environment) -> Result<Vec<Url>, CrawlError> {
    if seed_urls.is_empty() {
        return Err(CrawlError::fatal_config("at least one seed URL is required"));
    }
    let mut seeds = Vec::with_capacity(seed_urls.len());
    for raw in seed_urls {
        let url = Url::parse(raw)
            .map_err(|e| CrawlError::fatal_config(format!("invalid seed URL {raw}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CrawlError::fatal_config(format!(
                "seed URL {raw} must be http or https"
            )));
        }
        let loopback = match url.host() {
            Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
            Some(Host::Ipv4(ip)) => ip.is_loopback(),
            Some(Host::Ipv6(ip)) => ip.is_loopback(),
            None => {
                return Err(CrawlError::fatal_config(format!(
                    "seed URL {raw} has no host"
                )))
            }
        };
        if loopback {
            if environment == Environment::Production {
                return Err(CrawlError::fatal_config(format!(
                    "loopback seed {raw} is not allowed in production"
                )));
            }
            warn!(url = %raw, "loopback seed accepted outside production");
        }
        seeds.push(url);
    }
    Ok(seeds)
}

/// Per-job monitor: heartbeats, completion detection, terminal persistence
/// with retry, and cleanup.
async fn run_monitor(inner: Arc<EngineInner>, job_id: Uuid, cancel: CancellationToken) {
    debug!(job_id = %job_id, "monitor started");
    let mut tick: u64 = 0;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(inner.config.monitor_interval) => {}
            _ = cancel.cancelled() => {
                debug!(job_id = %job_id, "monitor cancelled");
                // A terminal job must still reach the store; keep retrying
                // the persist until it lands or the state is gone.
                while inner
                    .with_job(job_id, |state| state.job.status.is_terminal())
                    .unwrap_or(false)
                {
                    if finalize(&inner, job_id).await {
                        break;
                    }
                    tokio::time::sleep(inner.config.monitor_interval).await;
                }
                return;
            }
        }
        tick += 1;

        let Some(status) = inner.with_job(job_id, |state| state.job.status) else {
            return; // cleaned up elsewhere
        };

        if status.is_terminal() {
            // Retry path for a terminal write that failed earlier.
            if finalize(&inner, job_id).await {
                return;
            }
            continue;
        }

        if tick % inner.config.heartbeat_every_ticks == 0 {
            let now = Utc::now();
            inner.with_job_mut(job_id, |state| state.job.last_heartbeat = Some(now));
            if let Err(err) = inner.store.update_heartbeat(job_id, now).await {
                warn!(job_id = %job_id, error = %err, "heartbeat persist failed");
            }
        }

        // The page-budget path additionally waits for in-flight fetches:
        // workers past their budget check may still be mid-fetch, and their
        // results must land in the counters before the job record freezes.
        let finished = inner
            .with_job(job_id, |state| {
                let progress = &state.job.progress;
                progress.is_drained()
                    || (!state.job.config.under_page_budget(progress.completed)
                        && state.in_flight == 0)
            })
            .unwrap_or(false);
        if finished {
            let transitioned = inner
                .with_job_mut(job_id, |state| {
                    state.queue.close();
                    // URLs still queued past the page budget are discarded;
                    // pending is reconciled so the terminal invariant holds.
                    state.job.progress.pending = 0;
                    state.job.progress.current_url = None;
                    state.job.transition(JobStatus::Completed).is_ok()
                })
                .unwrap_or(false);
            if transitioned && finalize(&inner, job_id).await {
                return;
            }
            // Persist failure keeps the job in memory; retried next tick.
        }
    }
}

/// Persist a terminal job record, publish the closing events, and drop the
/// in-memory state. Returns false when the persist failed and the state must
/// stay for a retry.
pub(crate) async fn finalize(inner: &Arc<EngineInner>, job_id: Uuid) -> bool {
    let Some(job) = inner.with_job(job_id, |state| state.job.clone()) else {
        return true;
    };

    if let Err(err) = inner.store.save_job(&job).await {
        warn!(job_id = %job_id, error = %err, "terminal persist failed, keeping job in memory");
        return false;
    }
    if let Err(err) = inner.store.update_progress(job_id, &job.progress).await {
        warn!(job_id = %job_id, error = %err, "terminal progress persist failed");
    }

    if let Some(event) = inner.with_job(job_id, |state| state.progress_event()) {
        let _ = inner.events.publish(CrawlEvent::CrawlProgress(event)).await;
    }
    let closing = match job.status {
        JobStatus::Completed => CrawlEvent::JobCompleted {
            job_id,
            documents_saved: job.documents_saved,
        },
        JobStatus::Failed => CrawlEvent::JobFailed {
            job_id,
            error: job.error.clone().unwrap_or_default(),
        },
        JobStatus::Cancelled => CrawlEvent::JobCancelled { job_id },
        _ => return true, // not terminal; nothing to finalize
    };
    let _ = inner.events.publish(closing).await;

    let state = inner.jobs.lock().remove(&job_id);
    if let Some(state) = state {
        state.cancel.cancel();
        state.queue.close();
        inner.finished.lock().insert(job_id, state.results);
        if let Some(pool) = state.browser_pool {
            pool.shutdown().await;
        }
        // The per-job HTTP client and its cookie jar go with the state.
        drop(state.client);
    }

    info!(
        job_id = %job_id,
        status = ?job.status,
        completed = job.progress.completed,
        failed = job.progress.failed,
        documents_saved = job.documents_saved,
        "job finalized"
    );
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parses_label() {
        assert_eq!(Environment::from_label("production"), Environment::Production);
        assert_eq!(Environment::from_label("PRODUCTION"), Environment::Production);
        assert_eq!(Environment::from_label("dev"), Environment::Development);
        assert_eq!(Environment::from_label(""), Environment::Development);
    }

    #[test]
    fn seed_validation_rejects_garbage() {
        let env = Environment::Development;
        assert!(validate_seeds(&[], env).is_err());
        assert!(validate_seeds(&["not a url".into()], env).is_err());
        assert!(validate_seeds(&["ftp://example.com".into()], env).is_err());
        assert!(validate_seeds(&["https://example.com".into()], env).is_ok());
    }

    #[test]
    fn loopback_seeds_gated_by_environment() {
        let seeds = vec!["http://localhost:8080/x".to_string()];
        assert!(validate_seeds(&seeds, Environment::Development).is_ok());
        assert!(validate_seeds(&seeds, Environment::Production).is_err());

        let ip_seeds = vec!["http://127.0.0.1/x".to_string()];
        assert!(validate_seeds(&ip_seeds, Environment::Development).is_ok());
        assert!(validate_seeds(&ip_seeds, Environment::Production).is_err());
    }
}
