use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use rand::{thread_rng, Rng};
use tracing::debug;

use crate::cli::config::{RenderSettings, ScanConfig};
use crate::fetch::render::{RenderClient, RenderScriptRequest};
use crate::limits::{CircuitBreaker, RateLimiter, Retried, RetryPolicy};
use crate::scan::cancel::CancelToken;
use crate::stealth::script::stealth_page_script;
use crate::stealth::{realistic_headers, Pacer, SessionStore};

/// Rendered page handed to the caller-supplied transform.
#[derive(Debug, Clone, PartialEq)]
pub struct PageContent {
    /// Final URL after redirects.
    pub url: String,
    pub html: String,
    pub fetched_at: DateTime<Utc>,
}

/// One page fetch, retries included. Implementations compose the
/// circuit breaker, rate limiter, and retry policy; which one runs is a
/// configuration decision made at construction time.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        session_key: &str,
        cancel: CancelToken,
    ) -> Retried<PageContent>;
}

/// Anti-detection fetcher: consistent per-session fingerprint, realistic
/// headers, human pacing, and a scripted render that masks automation
/// markers. Cookies returned by the backend are written back to the
/// session so follow-up requests look like a continuing visit.
pub struct StealthFetcher {
    render: Arc<RenderClient>,
    sessions: Arc<SessionStore>,
    rate: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    pacer: Pacer,
    settings: RenderSettings,
}

impl StealthFetcher {
    pub fn new(
        render: Arc<RenderClient>,
        sessions: Arc<SessionStore>,
        rate: Arc<RateLimiter>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
        pacer: Pacer,
        settings: RenderSettings,
    ) -> Self {
        Self {
            render,
            sessions,
            rate,
            breaker,
            retry,
            pacer,
            settings,
        }
    }
}

#[async_trait]
impl PageFetcher for StealthFetcher {
    async fn fetch(
        &self,
        url: &str,
        session_key: &str,
        cancel: CancelToken,
    ) -> Retried<PageContent> {
        self.retry
            .run(&self.breaker, &cancel, |attempt| {
                let render = Arc::clone(&self.render);
                let sessions = Arc::clone(&self.sessions);
                let rate = Arc::clone(&self.rate);
                let pacer = self.pacer.clone();
                let settings = self.settings.clone();
                let url = url.to_string();
                let session_key = session_key.to_string();

                async move {
                    rate.acquire().await;

                    let session = sessions.session(&session_key).await;
                    let fingerprint = session.fingerprint;
                    let headers = realistic_headers(&fingerprint);

                    pacer.pause().await;
                    sessions.note_request(&session_key).await;

                    let timeout = escalated_timeout(&settings, attempt);
                    let request = RenderScriptRequest {
                        lua_source: stealth_page_script(&fingerprint),
                        url: url.clone(),
                        user_agent: fingerprint.user_agent.clone(),
                        headers,
                        screen_width: fingerprint.viewport.width,
                        screen_height: fingerprint.viewport.height,
                        wait: sample_wait(&settings),
                        timeout: timeout.as_secs(),
                        resource_timeout: settings.timeout_secs,
                    };

                    let rendered = render.render_with_script(&request, timeout).await?;

                    if !rendered.cookies.is_empty() {
                        sessions
                            .update_cookies(&session_key, rendered.cookies.clone())
                            .await;
                    }

                    debug!("fetched {} ({} bytes)", rendered.url, rendered.html.len());

                    Ok(PageContent {
                        url: rendered.url,
                        html: rendered.html,
                        fetched_at: Utc::now(),
                    })
                }
            })
            .await
    }
}

/// Plain fetcher: same breaker/rate/retry composition, but a bare
/// `render.html` call with no fingerprinting or pacing. Faster, and
/// sufficient for supplier sites that do not fight scrapers.
pub struct BasicFetcher {
    render: Arc<RenderClient>,
    rate: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    settings: RenderSettings,
}

impl BasicFetcher {
    pub fn new(
        render: Arc<RenderClient>,
        rate: Arc<RateLimiter>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
        settings: RenderSettings,
    ) -> Self {
        Self {
            render,
            rate,
            breaker,
            retry,
            settings,
        }
    }
}

#[async_trait]
impl PageFetcher for BasicFetcher {
    async fn fetch(
        &self,
        url: &str,
        _session_key: &str,
        cancel: CancelToken,
    ) -> Retried<PageContent> {
        self.retry
            .run(&self.breaker, &cancel, |attempt| {
                let render = Arc::clone(&self.render);
                let rate = Arc::clone(&self.rate);
                let settings = self.settings.clone();
                let url = url.to_string();

                async move {
                    rate.acquire().await;

                    let timeout = escalated_timeout(&settings, attempt);
                    let html = render
                        .render_basic(&url, settings.wait_secs, timeout)
                        .await?;

                    Ok(PageContent {
                        url,
                        html,
                        fetched_at: Utc::now(),
                    })
                }
            })
            .await
    }
}

/// Build the configured fetcher over shared scan-wide components.
pub fn fetcher_from_config(
    config: &ScanConfig,
    render: Arc<RenderClient>,
    rate: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    sessions: Arc<SessionStore>,
) -> Arc<dyn PageFetcher> {
    let retry = RetryPolicy::new(
        config.scan.max_retries,
        Duration::from_millis(config.scan.retry_base_delay_ms),
        Duration::from_millis(config.scan.retry_max_delay_ms),
    );

    if config.stealth.enabled {
        Arc::new(StealthFetcher::new(
            render,
            sessions,
            rate,
            breaker,
            retry,
            Pacer::new(config.stealth.pacing.clone()),
            config.render.clone(),
        ))
    } else {
        Arc::new(BasicFetcher::new(
            render,
            rate,
            breaker,
            retry,
            config.render.clone(),
        ))
    }
}

/// Wait budget for a given attempt: doubles each retry so pages the
/// backend rendered too slowly get a second chance with more room,
/// capped at the configured ceiling.
fn escalated_timeout(settings: &RenderSettings, attempt: u32) -> Duration {
    let base = settings.timeout_secs.max(1);
    let escalated = base.saturating_mul(1u64 << attempt.min(8));
    Duration::from_secs(escalated.min(settings.max_timeout_secs.max(base)))
}

fn sample_wait(settings: &RenderSettings) -> f64 {
    let (min, max) = settings.stealth_wait;
    if max > min {
        thread_rng().gen_range(min..max)
    } else {
        min
    }
}
