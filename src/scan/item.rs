use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::fetch::fetcher::PageContent;

/// Caller-supplied extraction applied to a fetched page. The engine
/// never interprets the produced value, only whether extraction failed.
pub type Transform = Arc<dyn Fn(&PageContent) -> anyhow::Result<Value> + Send + Sync>;

/// One unit of fetch-and-transform work. Immutable once submitted;
/// owned by the orchestrator for the duration of the scan.
#[derive(Clone)]
pub struct WorkItem {
    /// Caller identity for the item, e.g. an ASIN.
    pub id: String,
    pub url: String,
    /// Session the fetch is attributed to; defaults to the item id so
    /// repeat visits to the same product share one browsing identity.
    pub session_key: String,
    pub transform: Transform,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, url: impl Into<String>, transform: Transform) -> Self {
        let id = id.into();
        Self {
            session_key: id.clone(),
            id,
            url: url.into(),
            transform,
        }
    }

    pub fn with_session_key(mut self, session_key: impl Into<String>) -> Self {
        self.session_key = session_key.into();
        self
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("session_key", &self.session_key)
            .finish()
    }
}

/// Outcome of one work item. Produced exactly once per item and never
/// mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeResult {
    pub id: String,
    pub url: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub duration_ms: u64,
    pub retry_count: u32,
    pub finished_at: DateTime<Utc>,
}

/// Final aggregate for a completed scan. Results are ordered by
/// completion, not submission.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub scan_id: Uuid,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed_seconds: f64,
    /// Items completed per second over the whole scan.
    pub throughput: f64,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<ScrapeResult>,
}
