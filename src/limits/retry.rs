use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::fetch::error::FetchError;
use crate::limits::breaker::CircuitBreaker;
use crate::scan::cancel::CancelToken;

/// Outcome of a retried operation plus how many retries it consumed.
/// `retries` counts attempts beyond the first, so a success on the
/// third attempt reports 2.
#[derive(Debug)]
pub struct Retried<T> {
    pub outcome: Result<T, FetchError>,
    pub retries: u32,
}

/// Bounded retry with exponential backoff.
///
/// Wraps a single downstream operation in up to `max_retries` attempts.
/// Before every attempt the circuit breaker and the cancellation token
/// are consulted; an open breaker or a cancelled scan aborts the loop
/// immediately without touching the downstream service. Attempt
/// outcomes are recorded into the breaker here so callers compose the
/// two without duplicating bookkeeping.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Backoff before the attempt after `attempt` failed: `base * 2^attempt`,
    /// capped at `max_delay` (2s, 4s, 8s... with the default base).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, exhausts attempts, or hits a
    /// non-retryable error. The closure receives the 0-based attempt
    /// index so callers can escalate per-attempt budgets.
    pub async fn run<T, F, Fut>(
        &self,
        breaker: &CircuitBreaker,
        cancel: &CancelToken,
        mut op: F,
    ) -> Retried<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempts_made: u32 = 0;
        let mut last_error = FetchError::Transient("no attempts made".to_string());

        for attempt in 0..self.max_retries {
            if cancel.is_cancelled() {
                return Retried {
                    outcome: Err(FetchError::Cancelled),
                    retries: attempts_made.saturating_sub(1),
                };
            }

            if let Err(err) = breaker.preflight().await {
                return Retried {
                    outcome: Err(err),
                    retries: attempts_made.saturating_sub(1),
                };
            }

            attempts_made += 1;
            match op(attempt).await {
                Ok(value) => {
                    breaker.record_success().await;
                    return Retried {
                        outcome: Ok(value),
                        retries: attempt,
                    };
                }
                Err(err) => {
                    breaker.record_failure().await;
                    warn!(
                        "attempt {}/{} failed: {}",
                        attempt + 1,
                        self.max_retries,
                        err
                    );

                    if !err.is_retryable() {
                        return Retried {
                            outcome: Err(err),
                            retries: attempt,
                        };
                    }

                    last_error = err;
                    if attempt + 1 < self.max_retries {
                        let delay = self.backoff_delay(attempt);
                        info!("retrying in {:.1}s", delay.as_secs_f64());
                        sleep(delay).await;
                    }
                }
            }
        }

        Retried {
            outcome: Err(last_error),
            retries: attempts_made.saturating_sub(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_retries,
            Duration::from_secs(2),
            Duration::from_secs(30),
        )
    }

    fn open_free_breaker() -> CircuitBreaker {
        CircuitBreaker::new(u32::MAX, Duration::from_secs(60))
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = policy(5);
        assert_eq!(p.backoff_delay(0), Duration::from_secs(2));
        assert_eq!(p.backoff_delay(1), Duration::from_secs(4));
        assert_eq!(p.backoff_delay(2), Duration::from_secs(8));
        assert_eq!(p.backoff_delay(10), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt_with_two_retries() {
        let breaker = open_free_breaker();
        let cancel = CancelToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let retried = policy(3)
            .run(&breaker, &cancel, move |_attempt| {
                let counter = Arc::clone(&counter);
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(FetchError::Transient("flaky".into()))
                    } else {
                        Ok("page")
                    }
                }
            })
            .await;

        assert_eq!(retried.outcome, Ok("page"));
        assert_eq!(retried.retries, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_exactly_max_retries_attempts() {
        let breaker = open_free_breaker();
        let cancel = CancelToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let retried = policy(3)
            .run(&breaker, &cancel, move |_attempt| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(FetchError::Transient("down".into()))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            retried.outcome,
            Err(FetchError::Transient("down".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_aborts_without_calling_downstream() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(600));
        breaker.record_failure().await;

        let cancel = CancelToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let retried = policy(3)
            .run(&breaker, &cancel, move |_attempt| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, FetchError>("unreachable")
                }
            })
            .await;

        assert_eq!(retried.outcome, Err(FetchError::CircuitOpen));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_short_circuits() {
        let breaker = open_free_breaker();
        let cancel = CancelToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let retried = policy(3)
            .run(&breaker, &cancel, move |_attempt| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(FetchError::Cancelled)
                }
            })
            .await;

        assert_eq!(retried.outcome, Err(FetchError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_checked_between_attempts() {
        let breaker = open_free_breaker();
        let cancel = CancelToken::new();

        let cancel_inner = cancel.clone();
        let retried = policy(3)
            .run(&breaker, &cancel, move |_attempt| {
                let cancel_inner = cancel_inner.clone();
                async move {
                    // First attempt fails and flips the token; the loop
                    // must notice before attempt two.
                    cancel_inner.cancel();
                    Err::<(), _>(FetchError::Transient("going down".into()))
                }
            })
            .await;

        assert_eq!(retried.outcome, Err(FetchError::Cancelled));
    }
}
