use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::json;
use tracing::{info, warn};
use url::Url;

use crate::cli::config::ScanConfig;
use crate::fetch::{fetcher_from_config, PageContent, RenderClient};
use crate::limits::{CircuitBreaker, RateLimiter};
use crate::scan::{ScanOrchestrator, ScanReport, ProgressTracker, Transform, WorkItem};
use crate::stealth::SessionStore;

/// Run a scan over the given targets (ASINs or product URLs).
#[allow(clippy::too_many_arguments)]
pub async fn scan(
    targets: Vec<String>,
    input: Option<PathBuf>,
    profile: String,
    workers: Option<usize>,
    limit: Option<usize>,
    basic: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    let mut config = ScanConfig::load_profile(&profile)
        .context(format!("Failed to load profile: {}", profile))?;

    if basic {
        config.stealth.enabled = false;
    }

    let mut items = collect_work_items(targets, input)?;
    if let Some(limit) = limit {
        items.truncate(limit);
    }
    if items.is_empty() {
        bail!("No valid targets to scan");
    }

    let max_workers = config.effective_workers(workers);
    info!(
        "scanning {} items with {} workers ({} mode)",
        items.len(),
        max_workers,
        if config.stealth.enabled { "stealth" } else { "basic" }
    );

    // Shared scan-wide components: one rate budget and one breaker
    // across all workers.
    let render = Arc::new(RenderClient::new(&config.render.url)?);
    let rate = Arc::new(RateLimiter::per_minute(config.scan.rate_limit));
    let breaker = Arc::new(CircuitBreaker::new(
        config.scan.failure_threshold,
        Duration::from_secs(config.scan.reset_timeout_secs),
    ));
    let sessions = Arc::new(SessionStore::new(config.stealth.max_sessions));
    let fetcher = fetcher_from_config(&config, render, rate, breaker, sessions);

    let progress = Arc::new(ProgressTracker::new(config.scan.log_capacity));
    let orchestrator = ScanOrchestrator::new(fetcher, Arc::clone(&progress));

    // Ctrl-C stops the scan between attempts; in-flight fetches finish
    // and the report still covers every item.
    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling scan");
            cancel.cancel();
        }
    });

    // Live progress for the terminal, polling the same snapshot the
    // web UI would.
    let poll_progress = Arc::clone(&progress);
    let printer = tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(500)).await;
            let snapshot = poll_progress.snapshot().await;
            if snapshot.total > 0 {
                println!(
                    "[{}/{}] {:.1}% | ok {} | failed {} | {:.2} items/s",
                    snapshot.completed,
                    snapshot.total,
                    snapshot.percent,
                    snapshot.succeeded,
                    snapshot.failed,
                    snapshot.throughput
                );
            }
        }
    });

    let report = orchestrator.run(items, max_workers).await;
    printer.abort();
    let report = report?;

    print_report(&report);

    // Tail of the scan's log stream, same entries a polling UI reads.
    let logs = progress.recent_logs(20).await;
    if !logs.is_empty() {
        println!("Recent log entries:");
        for entry in logs {
            println!(
                "  [{}] {}",
                entry.timestamp.format("%H:%M:%S"),
                entry.message
            );
        }
    }

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&report)
            .context("Failed to serialize scan report")?;
        std::fs::write(&path, json)
            .context(format!("Failed to write report to: {}", path.display()))?;
        info!("Report written to: {}", path.display());
    }

    Ok(())
}

/// List all available configuration profiles
pub async fn list_profiles() -> Result<()> {
    let profiles = ScanConfig::list_profiles()?;

    println!("Available configuration profiles:");
    println!("  - default");
    for profile in profiles {
        println!("  - {}", profile);
    }

    Ok(())
}

/// Manage a specific configuration profile
pub async fn manage_profile(profile_name: String) -> Result<()> {
    match ScanConfig::load_profile(&profile_name) {
        Ok(config) => {
            println!("Profile: {}", profile_name);
            println!("{:#?}", config);
        }
        Err(_) => {
            warn!("Profile '{}' does not exist. Creating a default profile.", profile_name);
            let config = ScanConfig::default();
            config.save_as_profile(&profile_name)?;
            println!("Created default profile: {}", profile_name);
        }
    }

    Ok(())
}

/// Turn CLI targets plus an optional input file into work items.
/// Bare ASINs expand to marketplace product URLs; anything else must
/// parse as a URL or it is skipped with a warning.
fn collect_work_items(targets: Vec<String>, input: Option<PathBuf>) -> Result<Vec<WorkItem>> {
    let asin_pattern = Regex::new(r"^[A-Z0-9]{10}$").context("Invalid ASIN pattern")?;

    let mut raw = targets;
    if let Some(path) = input {
        let contents = std::fs::read_to_string(&path)
            .context(format!("Failed to read input file: {}", path.display()))?;
        raw.extend(
            contents
                .lines()
                .map(|line| line.trim().to_string())
                .filter(|line| !line.is_empty() && !line.starts_with('#')),
        );
    }

    let transform = product_summary();
    let mut items = Vec::new();
    for target in raw {
        if asin_pattern.is_match(&target) {
            let url = format!("https://www.amazon.com/dp/{}", target);
            items.push(WorkItem::new(target, url, Arc::clone(&transform)));
        } else {
            match Url::parse(&target) {
                Ok(parsed) => {
                    let id = asin_from_url(&parsed).unwrap_or_else(|| target.clone());
                    items.push(WorkItem::new(id, target, Arc::clone(&transform)));
                }
                Err(e) => {
                    warn!("Skipping target that is neither ASIN nor URL: {} ({})", target, e);
                }
            }
        }
    }

    Ok(items)
}

/// Pull the ASIN out of a `/dp/<asin>` product URL when present.
fn asin_from_url(url: &Url) -> Option<String> {
    let mut segments = url.path_segments()?;
    while let Some(segment) = segments.next() {
        if segment == "dp" {
            return segments.next().map(|s| s.to_string());
        }
    }
    None
}

/// Demo transform: pull title and buy-box price off a rendered product
/// page. A missing title is treated as extraction failure so bot walls
/// and error pages show up as failed items instead of empty rows.
fn product_summary() -> Transform {
    Arc::new(|page: &PageContent| {
        let document = Html::parse_document(&page.html);

        let title = select_text(&document, "#productTitle")
            .ok_or_else(|| anyhow::anyhow!("product title not found"))?;
        let price = select_text(&document, "span.a-price span.a-offscreen");

        Ok(json!({
            "url": page.url,
            "title": title,
            "price": price,
        }))
    })
}

fn select_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|text| !text.is_empty())
}

fn print_report(report: &ScanReport) {
    println!();
    println!("============================================================");
    println!("SCAN COMPLETE ({})", report.scan_id);
    println!("============================================================");
    println!("Total items:  {}", report.total);
    println!("Succeeded:    {}", report.succeeded);
    println!("Failed:       {}", report.failed);
    println!("Elapsed:      {:.1}s", report.elapsed_seconds);
    println!("Throughput:   {:.2} items/s", report.throughput);

    let failures: Vec<_> = report.results.iter().filter(|r| !r.success).collect();
    if !failures.is_empty() {
        println!("Failures:");
        for result in failures {
            println!(
                "  - {} ({}): {}",
                result.id,
                result.error_kind.as_deref().unwrap_or("unknown"),
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
    println!("============================================================");
}
