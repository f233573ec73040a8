use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::warn;

/// Sliding-window rate limiter shared by all scan workers.
///
/// Tracks the start instant of every request in the trailing window and
/// blocks callers (cooperative backpressure, never rejection) until the
/// oldest entry ages out. The lock guards only the bookkeeping; the
/// sleep happens outside it so waiting callers never serialize each
/// other.
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    slots: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Limiter admitting `per_minute` request starts per trailing minute.
    pub fn per_minute(per_minute: usize) -> Self {
        Self::with_window(per_minute, Duration::from_secs(60))
    }

    pub fn with_window(limit: usize, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window,
            slots: Mutex::new(VecDeque::new()),
        }
    }

    /// Block until a request may start, then claim a slot.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut slots = self.slots.lock().await;
                let now = Instant::now();

                // Age out entries that left the trailing window.
                while let Some(oldest) = slots.front() {
                    if now.duration_since(*oldest) >= self.window {
                        slots.pop_front();
                    } else {
                        break;
                    }
                }

                if slots.len() < self.limit {
                    slots.push_back(now);
                    None
                } else {
                    // Sleep until the oldest in-window entry expires, then
                    // re-check: another worker may have claimed the slot.
                    slots
                        .front()
                        .map(|oldest| self.window - now.duration_since(*oldest))
                }
            };

            match wait {
                None => return,
                Some(duration) => {
                    warn!(
                        "rate limit reached, waiting {:.1}s for a slot",
                        duration.as_secs_f64()
                    );
                    sleep(duration).await;
                }
            }
        }
    }

    /// Requests currently counted against the trailing window.
    pub async fn in_flight_window(&self) -> usize {
        let mut slots = self.slots.lock().await;
        let now = Instant::now();
        while let Some(oldest) = slots.front() {
            if now.duration_since(*oldest) >= self.window {
                slots.pop_front();
            } else {
                break;
            }
        }
        slots.len()
    }
}
