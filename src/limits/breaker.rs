use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{error, info};

use crate::fetch::error::FetchError;

/// Observable breaker state, in the order transitions happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Circuit breaker guarding the render backend.
///
/// One instance is shared across all workers. After
/// `failure_threshold` consecutive failures the breaker opens and every
/// call is rejected for `reset_timeout` without touching the backend.
/// Once the timeout elapses exactly one trial call is admitted
/// (half-open); its outcome decides between closing again and
/// restarting the open period.
pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Gate a call. `Err(CircuitOpen)` means the backend must not be
    /// touched. While half-open, only the caller that performed the
    /// OPEN -> HALF_OPEN transition is admitted; concurrent callers are
    /// rejected until the trial resolves.
    pub async fn preflight(&self) -> Result<(), FetchError> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::HalfOpen => Err(FetchError::CircuitOpen),
            BreakerState::Open => {
                let waited = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if waited >= self.reset_timeout {
                    inner.state = BreakerState::HalfOpen;
                    info!("circuit breaker: OPEN -> HALF_OPEN, admitting trial call");
                    Ok(())
                } else {
                    Err(FetchError::CircuitOpen)
                }
            }
        }
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == BreakerState::HalfOpen {
            info!("circuit breaker: HALF_OPEN -> CLOSED");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            BreakerState::HalfOpen => {
                // Trial failed; restart the open period.
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                error!("circuit breaker: HALF_OPEN -> OPEN, trial call failed");
            }
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    error!(
                        "circuit breaker: CLOSED -> OPEN after {} consecutive failures",
                        inner.consecutive_failures
                    );
                }
            }
            // No calls are admitted while open; a straggler finishing
            // late must not refresh the open period.
            BreakerState::Open => {}
        }
    }

    pub async fn state(&self) -> BreakerState {
        self.inner.lock().await.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));

        for _ in 0..2 {
            breaker.preflight().await.unwrap();
            breaker.record_failure().await;
        }
        assert_eq!(breaker.state().await, BreakerState::Closed);

        breaker.preflight().await.unwrap();
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, BreakerState::Open);
        assert_eq!(breaker.preflight().await, Err(FetchError::CircuitOpen));
    }

    #[tokio::test]
    async fn success_resets_failure_streak() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));

        breaker.record_failure().await;
        breaker.record_failure().await;
        breaker.record_success().await;
        breaker.record_failure().await;
        breaker.record_failure().await;

        assert_eq!(breaker.state().await, BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn admits_single_trial_after_reset_timeout() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, BreakerState::Open);

        tokio::time::sleep(Duration::from_secs(61)).await;

        // First caller gets the trial slot, concurrent callers do not.
        assert!(breaker.preflight().await.is_ok());
        assert_eq!(breaker.state().await, BreakerState::HalfOpen);
        assert_eq!(breaker.preflight().await, Err(FetchError::CircuitOpen));

        breaker.record_success().await;
        assert_eq!(breaker.state().await, BreakerState::Closed);
        assert!(breaker.preflight().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_trial_restarts_open_period() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        breaker.record_failure().await;

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(breaker.preflight().await.is_ok());
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, BreakerState::Open);

        // Still open before the restarted timeout elapses.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(breaker.preflight().await, Err(FetchError::CircuitOpen));

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(breaker.preflight().await.is_ok());
    }
}
