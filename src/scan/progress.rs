use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Severity of a progress log entry, mirroring what the UI renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Point-in-time view of a running scan. Derived metrics are computed
/// at snapshot time rather than stored, so pollers never see stale
/// percentages.
#[derive(Debug, Clone, Serialize)]
pub struct ScanProgress {
    pub total: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub percent: f64,
    pub elapsed_seconds: f64,
    /// Items completed per second so far.
    pub throughput: f64,
}

#[derive(Debug)]
struct Inner {
    total: usize,
    completed: usize,
    succeeded: usize,
    failed: usize,
    started_at: Option<Instant>,
    logs: VecDeque<LogEntry>,
}

/// Thread-safe scan progress: counters plus a bounded log stream.
///
/// Mutations come from every worker; reads come from an external poller
/// (the UI hits this roughly twice a second). Both sides hold the lock
/// only for bookkeeping, so progress reads never wait on an in-flight
/// fetch.
pub struct ProgressTracker {
    log_capacity: usize,
    inner: Mutex<Inner>,
}

impl ProgressTracker {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            log_capacity: log_capacity.max(1),
            inner: Mutex::new(Inner {
                total: 0,
                completed: 0,
                succeeded: 0,
                failed: 0,
                started_at: None,
                logs: VecDeque::new(),
            }),
        }
    }

    /// Begin a new scan of `total` items, discarding all previous state.
    pub async fn record_start(&self, total: usize) {
        let mut inner = self.inner.lock().await;
        inner.total = total;
        inner.completed = 0;
        inner.succeeded = 0;
        inner.failed = 0;
        inner.started_at = Some(Instant::now());
        inner.logs.clear();
    }

    /// Record one finished item. Exactly one call per work item.
    pub async fn record_result(&self, success: bool, message: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        inner.completed += 1;
        let level = if success {
            inner.succeeded += 1;
            LogLevel::Success
        } else {
            inner.failed += 1;
            LogLevel::Error
        };
        push_log(&mut inner, self.log_capacity, level, message.into());
    }

    /// Append a log entry without touching the counters.
    pub async fn log(&self, level: LogLevel, message: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        push_log(&mut inner, self.log_capacity, level, message.into());
    }

    pub async fn snapshot(&self) -> ScanProgress {
        let inner = self.inner.lock().await;
        let elapsed = inner
            .started_at
            .map(|at| at.elapsed().as_secs_f64())
            .unwrap_or(0.0);

        let percent = if inner.total > 0 {
            100.0 * inner.completed as f64 / inner.total as f64
        } else {
            0.0
        };
        let throughput = if elapsed > 0.0 {
            inner.completed as f64 / elapsed
        } else {
            0.0
        };

        ScanProgress {
            total: inner.total,
            completed: inner.completed,
            succeeded: inner.succeeded,
            failed: inner.failed,
            percent,
            elapsed_seconds: elapsed,
            throughput,
        }
    }

    /// The most recent `limit` log entries, newest last. Non-draining,
    /// so multiple observers see the same stream.
    pub async fn recent_logs(&self, limit: usize) -> Vec<LogEntry> {
        let inner = self.inner.lock().await;
        let skip = inner.logs.len().saturating_sub(limit);
        inner.logs.iter().skip(skip).cloned().collect()
    }
}

fn push_log(inner: &mut Inner, capacity: usize, level: LogLevel, message: String) {
    // Mirror to the process log so the stream is visible without a poller.
    match level {
        LogLevel::Info | LogLevel::Success => info!("{message}"),
        LogLevel::Warning => warn!("{message}"),
        LogLevel::Error => error!("{message}"),
    }

    inner.logs.push_back(LogEntry {
        timestamp: Utc::now(),
        level,
        message,
    });
    while inner.logs.len() > capacity {
        inner.logs.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counters_track_results() {
        let tracker = ProgressTracker::new(100);
        tracker.record_start(4).await;
        tracker.record_result(true, "a ok").await;
        tracker.record_result(true, "b ok").await;
        tracker.record_result(false, "c failed").await;

        let progress = tracker.snapshot().await;
        assert_eq!(progress.total, 4);
        assert_eq!(progress.completed, 3);
        assert_eq!(progress.succeeded, 2);
        assert_eq!(progress.failed, 1);
        assert_eq!(progress.succeeded + progress.failed, progress.completed);
        assert!((progress.percent - 75.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn empty_scan_reports_zero_percent() {
        let tracker = ProgressTracker::new(100);
        tracker.record_start(0).await;
        let progress = tracker.snapshot().await;
        assert_eq!(progress.percent, 0.0);
        assert_eq!(progress.throughput, 0.0);
    }

    #[tokio::test]
    async fn restart_resets_previous_scan() {
        let tracker = ProgressTracker::new(100);
        tracker.record_start(2).await;
        tracker.record_result(true, "done").await;

        tracker.record_start(5).await;
        let progress = tracker.snapshot().await;
        assert_eq!(progress.total, 5);
        assert_eq!(progress.completed, 0);
        assert!(tracker.recent_logs(10).await.is_empty());
    }

    #[tokio::test]
    async fn log_queue_drops_oldest_beyond_capacity() {
        let tracker = ProgressTracker::new(3);
        tracker.record_start(10).await;
        for i in 0..5 {
            tracker.log(LogLevel::Info, format!("entry {i}")).await;
        }

        let logs = tracker.recent_logs(10).await;
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[0].message, "entry 2");
        assert_eq!(logs[2].message, "entry 4");
    }

    #[tokio::test]
    async fn recent_logs_returns_newest_last_without_draining() {
        let tracker = ProgressTracker::new(100);
        tracker.log(LogLevel::Info, "first").await;
        tracker.log(LogLevel::Warning, "second").await;

        let once = tracker.recent_logs(1).await;
        assert_eq!(once.len(), 1);
        assert_eq!(once[0].message, "second");

        // A second observer still sees the full stream.
        assert_eq!(tracker.recent_logs(10).await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn throughput_derives_from_elapsed_time() {
        let tracker = ProgressTracker::new(100);
        tracker.record_start(10).await;
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        tracker.record_result(true, "one").await;
        tracker.record_result(true, "two").await;

        let progress = tracker.snapshot().await;
        assert!(progress.elapsed_seconds >= 5.0);
        assert!((progress.throughput - 2.0 / progress.elapsed_seconds).abs() < 1e-9);
    }
}
