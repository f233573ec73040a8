use thiserror::Error;

/// Failure taxonomy for a single page fetch.
///
/// The retry loop consults `is_retryable` to decide whether another
/// attempt is worth making; everything else is surfaced to the caller
/// as-is and recorded on the item's result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Network-level failure or an error reported by the render backend.
    #[error("transient fetch failure: {0}")]
    Transient(String),

    /// The render backend did not produce a page within the wait budget.
    #[error("render backend timed out after {timeout_secs}s")]
    RenderTimeout { timeout_secs: u64 },

    /// The circuit breaker is open; the downstream service was not touched.
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// The caller-supplied transform failed on an otherwise successful fetch.
    #[error("transform failed: {0}")]
    Transform(String),

    /// The scan was cancelled before or between attempts.
    #[error("scan cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether the retry loop may attempt this operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Transient(_) | FetchError::RenderTimeout { .. }
        )
    }

    /// Stable identifier recorded on scrape results and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Transient(_) => "transient",
            FetchError::RenderTimeout { .. } => "render_timeout",
            FetchError::CircuitOpen => "circuit_open",
            FetchError::Transform(_) => "transform",
            FetchError::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(FetchError::Transient("connection reset".into()).is_retryable());
        assert!(FetchError::RenderTimeout { timeout_secs: 30 }.is_retryable());
        assert!(!FetchError::CircuitOpen.is_retryable());
        assert!(!FetchError::Transform("missing title".into()).is_retryable());
        assert!(!FetchError::Cancelled.is_retryable());
    }

    #[test]
    fn kinds_are_stable() {
        assert_eq!(FetchError::CircuitOpen.kind(), "circuit_open");
        assert_eq!(
            FetchError::RenderTimeout { timeout_secs: 60 }.kind(),
            "render_timeout"
        );
    }
}
