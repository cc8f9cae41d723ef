//! The per-job worker loop.

use crate::controller::EngineInner;
use crate::queue::{Popped, UrlQueue};
use seine_extract::{extract_json_links, LinkFilter};
use seine_fetch::{Fetcher, Transport};
use seine_headless::BrowserPool;
use seine_types::{
    CrawlConfig, CrawlEvent, DocumentDraft, ErrorKind, FetchResult, LogLevel, Progress,
    SourceKind, UrlRequest,
};
use seine_util::{normalized_key, RateLimiter, RetryPolicy};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

/// Per-worker wiring, cloned out of the controller at spawn time so the loop
/// never needs the job-state lock for its own plumbing.
pub(crate) struct WorkerContext {
    pub engine: Arc<EngineInner>,
    pub job_id: Uuid,
    pub index: usize,
    pub queue: Arc<UrlQueue>,
    pub client: reqwest::Client,
    pub pool: Option<Arc<BrowserPool>>,
    pub limiter: Arc<RateLimiter>,
    pub retry: RetryPolicy,
    pub config: Arc<CrawlConfig>,
    pub filter: Arc<LinkFilter>,
    /// First seed; anchors the same-host rule for source-aware filtering.
    pub seed: Url,
    pub fetcher: Arc<Fetcher>,
    pub cancel: CancellationToken,
}

/// Outcome of the loop-top gate, taken atomically with the in-flight claim.
enum WorkerGate {
    /// The worker may pop; an in-flight slot is reserved.
    Claimed,
    /// The job reached a terminal state (or left memory).
    Terminal,
    /// The completed counter hit the page budget.
    Budget(u64),
}

pub(crate) async fn run_worker(ctx: WorkerContext) {
    info!(job_id = %ctx.job_id, worker = ctx.index, "worker started");
    let mut last_diagnostic = Instant::now();

    loop {
        // Terminal/budget gate and in-flight reservation in one critical
        // section: the monitor's budget completion fires only when no worker
        // holds a reservation, so it can never observe a gap between "worker
        // passed the budget check" and "worker recorded its outcome".
        let gate = ctx.engine.with_job_mut(ctx.job_id, |state| {
            if state.job.status.is_terminal() {
                WorkerGate::Terminal
            } else if !state.job.config.under_page_budget(state.job.progress.completed) {
                WorkerGate::Budget(state.job.progress.completed)
            } else {
                state.in_flight += 1;
                WorkerGate::Claimed
            }
        });
        match gate {
            None | Some(WorkerGate::Terminal) => break,
            Some(WorkerGate::Budget(completed)) => {
                info!(job_id = %ctx.job_id, worker = ctx.index, completed, "page budget reached");
                break;
            }
            Some(WorkerGate::Claimed) => {}
        }

        // Every path below must release the reservation exactly once.
        let popped = match ctx.queue.pop(&ctx.cancel, ctx.engine.config.pop_timeout).await {
            Ok(popped) => popped,
            Err(_) => {
                end_in_flight(&ctx);
                break; // cancelled
            }
        };
        let request = match popped {
            Popped::Closed => {
                end_in_flight(&ctx);
                break;
            }
            Popped::TimedOut => {
                end_in_flight(&ctx);
                maybe_diagnose(&ctx, &mut last_diagnostic).await;
                continue;
            }
            Popped::Item(request) => request,
        };

        // A queue is per-job, but the id check stays as a guard against
        // misrouted items.
        if request.job_id != ctx.job_id {
            warn!(
                job_id = %ctx.job_id,
                item_job_id = %request.job_id,
                url = %request.url,
                "discarding queue item for another job"
            );
            end_in_flight(&ctx);
            continue;
        }

        if !ctx.config.depth_allows(request.depth) {
            debug!(job_id = %ctx.job_id, url = %request.url, depth = request.depth, "depth limit exceeded");
            record_discard(&ctx).await;
            continue;
        }

        ctx.engine.with_job_mut(ctx.job_id, |state| {
            state.job.progress.current_url = Some(request.url.to_string());
        });

        if ctx.limiter.wait(&ctx.cancel, &request.url).await.is_err() {
            end_in_flight(&ctx);
            break;
        }

        let result = ctx
            .retry
            .execute(&ctx.cancel, |_attempt| fetch_once(&ctx, &request))
            .await;
        if result.error_kind == Some(ErrorKind::Cancelled) {
            // Record nothing; the monitor handles cancelled jobs.
            end_in_flight(&ctx);
            break;
        }

        process_result(&ctx, &request, result).await;
        maybe_diagnose(&ctx, &mut last_diagnostic).await;
    }

    info!(job_id = %ctx.job_id, worker = ctx.index, "worker stopped");
}

/// One fetch attempt over the transport this job is configured for.
async fn fetch_once(ctx: &WorkerContext, request: &UrlRequest) -> FetchResult {
    if ctx.config.render_js {
        if let Some(pool) = &ctx.pool {
            match pool.get(ctx.index) {
                Ok(slot) => {
                    let slot = slot.lock().await;
                    let result = ctx
                        .fetcher
                        .fetch(request, Transport::Browser(&*slot), &ctx.config)
                        .await;
                    drop(slot);
                    pool.release(ctx.index);
                    return result;
                }
                Err(error) => {
                    return FetchResult::failure(
                        request.url.clone(),
                        ErrorKind::Transport,
                        error.to_string(),
                    )
                }
            }
        }
    }
    ctx.fetcher
        .fetch(request, Transport::Http(&ctx.client), &ctx.config)
        .await
}

/// Steps 8-12 of the loop: archive the result, persist the document, discover
/// and enqueue links, and update the counters atomically.
async fn process_result(ctx: &WorkerContext, request: &UrlRequest, result: FetchResult) {
    let success = result.is_success();

    // Document persistence happens before the counters move so a crash never
    // reports a completed URL whose document write was skipped.
    let mut saved_new_document = false;
    if success {
        if let Some(markdown) = result.converted_text() {
            let mut meta = result
                .page
                .as_ref()
                .map(|p| p.meta.clone())
                .unwrap_or_default();
            if let Some(description) = result.page.as_ref().and_then(|p| p.description.clone()) {
                meta.entry("description".into()).or_insert(description);
            }
            let draft = DocumentDraft {
                job_id: ctx.job_id,
                parent_job_id: None,
                source_type: request.source,
                source_id: normalized_key(&result.url),
                title: result.title_or_fallback(),
                markdown: markdown.to_string(),
                detail: ctx.config.detail,
                meta,
            };
            match ctx.engine.persister.persist(draft).await {
                Ok(true) => saved_new_document = true,
                Ok(false) => {}
                // Persistence failures do not fail the URL and do not touch
                // documents_saved.
                Err(err) => {
                    error!(job_id = %ctx.job_id, url = %result.url, error = %err, "document save failed");
                    let _ = ctx
                        .engine
                        .store
                        .append_job_log(
                            ctx.job_id,
                            LogLevel::Error,
                            &format!("document save failed for {}: {err}", result.url),
                        )
                        .await;
                }
            }
        }
    }

    // Link discovery outside the lock; enqueue + counters inside it.
    let discovered = if success {
        discover_links(ctx, request, &result)
    } else {
        Vec::new()
    };

    let mut enqueued: Vec<UrlRequest> = Vec::new();
    let mut result_slot = Some(result);
    let snapshot = ctx.engine.with_job_mut(ctx.job_id, |state| {
        for url in discovered {
            let child = request.child(url);
            if state.queue.push(child.clone()) {
                state.job.progress.add_discovered(1);
                enqueued.push(child);
            }
        }
        if saved_new_document {
            state.job.documents_saved += 1;
        }
        if success {
            state.job.progress.record_success();
        } else {
            state.job.progress.record_failure();
        }
        state.job.result_count = state.job.progress.completed;
        state.job.failed_count = state.job.progress.failed;
        state.job.progress.current_url = None;
        state.in_flight = state.in_flight.saturating_sub(1);
        if let Some(result) = result_slot.take() {
            state.push_result(result);
        }
        (state.job.progress.clone(), state.progress_event())
    });

    let Some((progress, event)) = snapshot else {
        // The job left memory mid-flight (cancelled or failed). The counters
        // are frozen, but the fetched result stays retrievable: archive it
        // alongside the finalized results instead of dropping it.
        warn!(
            job_id = %ctx.job_id,
            url = %request.url,
            saved_new_document,
            "job state gone mid-flight; archiving orphaned result"
        );
        if let Some(orphan) = result_slot.take() {
            let mut finished = ctx.engine.finished.lock();
            let archived = finished.entry(ctx.job_id).or_default();
            let cap = ctx.config.max_results_kept;
            if cap == 0 || archived.len() < cap {
                archived.push(orphan);
            }
        }
        return;
    };

    // Mirror the in-memory seen set into the store, best effort.
    for child in &enqueued {
        if let Err(err) = ctx
            .engine
            .store
            .mark_url_seen(ctx.job_id, &normalized_key(&child.url))
            .await
        {
            warn!(job_id = %ctx.job_id, url = %child.url, error = %err, "mark_url_seen failed");
        }
    }

    if let Err(err) = ctx.engine.store.update_progress(ctx.job_id, &progress).await {
        warn!(job_id = %ctx.job_id, error = %err, "progress persist failed");
    }

    // Progress event on every tenth processed URL.
    let processed = progress.completed + progress.failed;
    if processed > 0 && processed % 10 == 0 {
        let _ = ctx
            .engine
            .events
            .publish(CrawlEvent::CrawlProgress(event))
            .await;
    }
}

/// Collect filtered child links for a successful result: HTML anchors from
/// the pipeline output, or source-specific pagination cursors for JSON
/// responses.
fn discover_links(ctx: &WorkerContext, request: &UrlRequest, result: &FetchResult) -> Vec<Url> {
    if !ctx.config.can_descend_from(request.depth) {
        return Vec::new();
    }

    // Pagination cursors from JSON bodies skip the source reject table (they
    // live under the API paths it drops) but still honor user regexes.
    let (candidates, pagination): (Vec<Url>, bool) = if result.page.is_some() {
        (result.links().to_vec(), false)
    } else if request.source != SourceKind::Web {
        let cursors = result
            .body
            .as_deref()
            .map(|body| extract_json_links(body, request.source, &request.url))
            .unwrap_or_default();
        (cursors, true)
    } else {
        (Vec::new(), false)
    };
    if candidates.is_empty() {
        return Vec::new();
    }

    let outcome = if pagination {
        ctx.filter.apply_generic(candidates)
    } else {
        ctx.filter.apply(candidates, &ctx.seed, request.source)
    };
    if !outcome.excluded_samples.is_empty() || !outcome.not_included_samples.is_empty() {
        debug!(
            job_id = %ctx.job_id,
            url = %request.url,
            passed = outcome.passed.len(),
            excluded = ?outcome.excluded_samples,
            not_included = ?outcome.not_included_samples,
            "link filter diagnostics"
        );
    }
    outcome.passed
}

/// Balance the in-flight count on a path that records no outcome.
fn end_in_flight(ctx: &WorkerContext) {
    ctx.engine.with_job_mut(ctx.job_id, |state| {
        state.in_flight = state.in_flight.saturating_sub(1);
    });
}

/// Count a popped-but-never-fetched URL (depth overflow) as a failure.
async fn record_discard(ctx: &WorkerContext) {
    let progress: Option<Progress> = ctx.engine.with_job_mut(ctx.job_id, |state| {
        state.job.progress.record_failure();
        state.job.failed_count = state.job.progress.failed;
        state.in_flight = state.in_flight.saturating_sub(1);
        state.job.progress.clone()
    });
    if let Some(progress) = progress {
        if let Err(err) = ctx.engine.store.update_progress(ctx.job_id, &progress).await {
            warn!(job_id = %ctx.job_id, error = %err, "progress persist failed");
        }
    }
}

/// Periodic consistency diagnostic: queue length, pending, processed, and
/// total must reconcile; inconsistencies are logged and persisted.
async fn maybe_diagnose(ctx: &WorkerContext, last: &mut Instant) {
    if last.elapsed() < ctx.engine.config.diagnostics_interval {
        return;
    }
    *last = Instant::now();

    let Some((progress, queue_len)) = ctx
        .engine
        .with_job(ctx.job_id, |state| (state.job.progress.clone(), state.queue.len()))
    else {
        return;
    };

    let processed = progress.completed + progress.failed;
    let mut findings: Vec<String> = Vec::new();
    if queue_len > 0 && progress.pending == 0 {
        findings.push(format!("queue has {queue_len} items but pending is 0"));
    }
    if progress.pending > 0 && queue_len == 0 {
        findings.push(format!(
            "pending is {} but the queue is empty (in-flight or lost)",
            progress.pending
        ));
    }
    if processed + progress.pending != progress.total {
        findings.push(format!(
            "counters do not reconcile: completed {} + failed {} + pending {} != total {}",
            progress.completed, progress.failed, progress.pending, progress.total
        ));
    }

    if findings.is_empty() {
        debug!(
            job_id = %ctx.job_id,
            queue_len,
            pending = progress.pending,
            processed,
            total = progress.total,
            "queue diagnostics clean"
        );
        return;
    }

    for finding in &findings {
        warn!(job_id = %ctx.job_id, finding = %finding, "queue diagnostics");
        let _ = ctx
            .engine
            .store
            .append_job_log(ctx.job_id, LogLevel::Warn, finding)
            .await;
    }
}
