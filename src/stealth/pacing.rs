use std::time::Duration;

use rand::{thread_rng, Rng};
use tokio::time::sleep;
use tracing::debug;

use crate::cli::config::PacingSettings;

/// Human-like request pacing.
///
/// Most pauses are short; occasionally the simulated user gets
/// distracted and takes much longer, matching how people actually
/// browse. Applied before every stealth-mode fetch.
#[derive(Debug, Clone)]
pub struct Pacer {
    settings: PacingSettings,
}

impl Pacer {
    pub fn new(settings: PacingSettings) -> Self {
        Self { settings }
    }

    /// Sample a pause without sleeping.
    pub fn sample_delay(&self) -> Duration {
        let mut rng = thread_rng();
        let cfg = &self.settings;

        let min = cfg.min_delay_ms.min(cfg.max_delay_ms);
        let max = cfg.max_delay_ms.max(min + 1);
        let mut delay_ms = rng.gen_range(min..max);

        // Occasional long pause: the user wandered off.
        if rng.gen_bool(cfg.distracted_probability.clamp(0.0, 1.0)) {
            let extra_min = cfg.distracted_min_ms.min(cfg.distracted_max_ms);
            let extra_max = cfg.distracted_max_ms.max(extra_min + 1);
            delay_ms += rng.gen_range(extra_min..extra_max);
        }

        Duration::from_millis(delay_ms)
    }

    pub async fn pause(&self) {
        let delay = self.sample_delay();
        debug!("pausing {}ms before request", delay.as_millis());
        sleep(delay).await;
    }
}
