//! In-memory per-job runtime state.

use crate::queue::UrlQueue;
use seine_headless::BrowserPool;
use seine_types::{CrawlJob, FetchResult, ProgressEvent};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything the engine keeps in memory for a live job. Owned by the
/// controller behind the coarse job-state lock; workers and the monitor read
/// and mutate through that lock and never hold it across I/O.
pub(crate) struct JobState {
    pub job: CrawlJob,
    pub queue: Arc<UrlQueue>,
    pub results: Vec<FetchResult>,
    pub client: reqwest::Client,
    pub browser_pool: Option<Arc<BrowserPool>>,
    pub cancel: CancellationToken,
    /// URLs popped by a worker whose outcome has not been recorded yet. The
    /// monitor's page-budget completion waits for this to reach zero so no
    /// in-flight result is dropped between the budget check and finalize.
    pub in_flight: usize,
}

impl JobState {
    /// Archive a result, honoring the per-job cap (0 keeps everything).
    pub fn push_result(&mut self, result: FetchResult) {
        let cap = self.job.config.max_results_kept;
        if cap == 0 || self.results.len() < cap {
            self.results.push(result);
        }
    }

    pub fn progress_event(&self) -> ProgressEvent {
        ProgressEvent {
            job_id: self.job.id,
            source_type: self.job.source_type,
            entity_type: self.job.entity_type.clone(),
            status: self.job.status,
            total: self.job.progress.total,
            completed: self.job.progress.completed,
            failed: self.job.progress.failed,
            pending: self.job.progress.pending,
            current_url: self.job.progress.current_url.clone(),
            percentage: self.job.progress.percentage,
            estimated_completion: self.job.progress.estimated_completion,
        }
    }
}
