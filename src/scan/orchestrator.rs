use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::fetch::error::FetchError;
use crate::fetch::fetcher::PageFetcher;
use crate::scan::cancel::CancelToken;
use crate::scan::item::{ScanReport, ScrapeResult, WorkItem};
use crate::scan::progress::{LogLevel, ProgressTracker};

/// Fans a batch of work items across a bounded worker pool.
///
/// Workers pull from a shared queue, so a handful of slow pages never
/// stalls the rest of the batch, and a thousand-item scan still runs on
/// `max_workers` tasks. Item failures are contained: they become failed
/// results and progress increments, never a batch abort. The scan is
/// complete when every item has produced exactly one result.
pub struct ScanOrchestrator {
    fetcher: Arc<dyn PageFetcher>,
    progress: Arc<ProgressTracker>,
    cancel: CancelToken,
}

impl ScanOrchestrator {
    pub fn new(fetcher: Arc<dyn PageFetcher>, progress: Arc<ProgressTracker>) -> Self {
        Self {
            fetcher,
            progress,
            cancel: CancelToken::new(),
        }
    }

    /// Token observers can use to stop the scan between attempts.
    /// Items not yet processed when the token fires complete as
    /// cancelled failures, keeping the one-result-per-item guarantee.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn progress(&self) -> Arc<ProgressTracker> {
        Arc::clone(&self.progress)
    }

    /// Run the batch to completion and aggregate a report. The only
    /// fatal error is a misconfigured pool size; everything else is
    /// per-item and lands in the result list.
    pub async fn run(&self, items: Vec<WorkItem>, max_workers: usize) -> Result<ScanReport> {
        if max_workers == 0 {
            bail!("max_workers must be at least 1");
        }

        let scan_id = Uuid::new_v4();
        let total = items.len();
        let started = Instant::now();

        self.progress.record_start(total).await;
        self.progress
            .log(
                LogLevel::Info,
                format!("starting scan {scan_id}: {total} items, {max_workers} workers"),
            )
            .await;

        let queue = Arc::new(Mutex::new(items.into_iter().collect::<VecDeque<_>>()));
        let results = Arc::new(Mutex::new(Vec::with_capacity(total)));

        let worker_count = max_workers.min(total).max(1);
        let mut handles = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let fetcher = Arc::clone(&self.fetcher);
            let progress = Arc::clone(&self.progress);
            let queue = Arc::clone(&queue);
            let results = Arc::clone(&results);
            let cancel = self.cancel.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    let item = { queue.lock().await.pop_front() };
                    let Some(item) = item else { break };

                    let result = process_item(&*fetcher, &cancel, item).await;

                    let message = if result.success {
                        format!(
                            "{} ok ({} ms, {} retries)",
                            result.id, result.duration_ms, result.retry_count
                        )
                    } else {
                        format!(
                            "{} failed: {}",
                            result.id,
                            result.error.as_deref().unwrap_or("unknown error")
                        )
                    };
                    progress.record_result(result.success, message).await;

                    let snapshot = progress.snapshot().await;
                    if snapshot.completed % 10 == 0 || snapshot.completed == snapshot.total {
                        progress
                            .log(
                                LogLevel::Info,
                                format!(
                                    "progress: {}/{} ({:.1}%), {:.2} items/s",
                                    snapshot.completed,
                                    snapshot.total,
                                    snapshot.percent,
                                    snapshot.throughput
                                ),
                            )
                            .await;
                    }

                    results.lock().await.push(result);
                }
                worker_id
            }));
        }

        for joined in join_all(handles).await {
            if let Err(err) = joined {
                warn!("scan worker terminated abnormally: {err}");
            }
        }

        let results = {
            let mut guard = results.lock().await;
            std::mem::take(&mut *guard)
        };
        let succeeded = results.iter().filter(|r| r.success).count();
        let failed = results.len() - succeeded;
        let elapsed = started.elapsed().as_secs_f64();
        let throughput = if elapsed > 0.0 {
            results.len() as f64 / elapsed
        } else {
            0.0
        };

        self.progress
            .log(
                LogLevel::Info,
                format!("scan {scan_id} complete: {succeeded} succeeded, {failed} failed"),
            )
            .await;
        self.progress
            .log(
                LogLevel::Info,
                format!("elapsed {elapsed:.1}s, {throughput:.2} items/s"),
            )
            .await;
        if failed > 0 {
            self.progress
                .log(LogLevel::Warning, format!("{failed} items failed"))
                .await;
        }
        info!("scan {scan_id} finished: {succeeded}/{} succeeded", results.len());

        Ok(ScanReport {
            scan_id,
            total,
            succeeded,
            failed,
            elapsed_seconds: elapsed,
            throughput,
            finished_at: Utc::now(),
            results,
        })
    }
}

/// Fetch and transform one item, producing its single result.
async fn process_item(
    fetcher: &dyn PageFetcher,
    cancel: &CancelToken,
    item: WorkItem,
) -> ScrapeResult {
    let started = Instant::now();

    let (outcome, retries) = if cancel.is_cancelled() {
        (Err(FetchError::Cancelled), 0)
    } else {
        let retried = fetcher
            .fetch(&item.url, &item.session_key, cancel.clone())
            .await;
        (retried.outcome, retried.retries)
    };

    // The fetch succeeded or failed; the caller transform can still turn
    // a fetched page into an item failure, but is never retried.
    let outcome = outcome.and_then(|page| {
        (item.transform)(&page).map_err(|err| FetchError::Transform(err.to_string()))
    });

    let duration_ms = started.elapsed().as_millis() as u64;
    match outcome {
        Ok(value) => ScrapeResult {
            id: item.id,
            url: item.url,
            success: true,
            value: Some(value),
            error: None,
            error_kind: None,
            duration_ms,
            retry_count: retries,
            finished_at: Utc::now(),
        },
        Err(err) => ScrapeResult {
            id: item.id,
            url: item.url,
            success: false,
            value: None,
            error: Some(err.to_string()),
            error_kind: Some(err.kind().to_string()),
            duration_ms,
            retry_count: retries,
            finished_at: Utc::now(),
        },
    }
}
