use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::fetch::error::FetchError;

/// Request body for the backend's script endpoint. Mirrors the
/// arguments a Splash-style service expects alongside a Lua program.
#[derive(Debug, Clone, Serialize)]
pub struct RenderScriptRequest {
    pub lua_source: String,
    pub url: String,
    pub user_agent: String,
    pub headers: HashMap<String, String>,
    pub screen_width: u32,
    pub screen_height: u32,
    pub wait: f64,
    pub timeout: u64,
    pub resource_timeout: u64,
}

/// What the script endpoint returns: the rendered page, the final URL
/// after redirects, and the session cookies the page set.
#[derive(Debug, Clone, Deserialize)]
pub struct RenderScriptResponse {
    pub html: String,
    pub url: String,
    #[serde(default)]
    pub cookies: Vec<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// HTTP client for the headless-render backend.
///
/// The backend is opaque to the engine: give it a URL (plus an optional
/// script and headers), get rendered HTML back. Timeouts are applied
/// per request so retry attempts can escalate their budget.
pub struct RenderClient {
    client: Client,
    base_url: String,
}

impl RenderClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .cookie_store(true)
            .build()
            .context("Failed to create render backend HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Plain render: no fingerprinting, no humanization. Used by the
    /// basic fetcher.
    pub async fn render_basic(
        &self,
        url: &str,
        wait: f64,
        timeout: Duration,
    ) -> Result<String, FetchError> {
        let endpoint = format!("{}/render.html", self.base_url);
        debug!("basic render of {url} (wait {wait}s)");

        let response = self
            .client
            .get(&endpoint)
            .query(&[("url", url), ("wait", &wait.to_string())])
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| classify_transport_error(err, timeout))?;

        check_status(response.status(), timeout)?;

        response
            .text()
            .await
            .map_err(|err| FetchError::Transient(format!("failed to read rendered page: {err}")))
    }

    /// Scripted render: ships the stealth Lua program plus fingerprint
    /// arguments and returns the page with session cookies.
    pub async fn render_with_script(
        &self,
        request: &RenderScriptRequest,
        timeout: Duration,
    ) -> Result<RenderScriptResponse, FetchError> {
        let endpoint = format!("{}/execute", self.base_url);
        debug!("scripted render of {} (wait {}s)", request.url, request.wait);

        let response = self
            .client
            .post(&endpoint)
            .json(request)
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| classify_transport_error(err, timeout))?;

        check_status(response.status(), timeout)?;

        let rendered: RenderScriptResponse = response
            .json()
            .await
            .map_err(|err| FetchError::Transient(format!("failed to parse render response: {err}")))?;

        if let Some(error) = &rendered.error {
            return Err(FetchError::Transient(format!(
                "render backend reported: {error}"
            )));
        }

        Ok(rendered)
    }
}

fn classify_transport_error(err: reqwest::Error, timeout: Duration) -> FetchError {
    if err.is_timeout() {
        FetchError::RenderTimeout {
            timeout_secs: timeout.as_secs(),
        }
    } else {
        FetchError::Transient(format!("render backend unreachable: {err}"))
    }
}

fn check_status(status: StatusCode, timeout: Duration) -> Result<(), FetchError> {
    if status == StatusCode::GATEWAY_TIMEOUT {
        // The backend gave up on the page, not on us.
        Err(FetchError::RenderTimeout {
            timeout_secs: timeout.as_secs(),
        })
    } else if !status.is_success() {
        Err(FetchError::Transient(format!(
            "render backend returned {status}"
        )))
    } else {
        Ok(())
    }
}
