use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Viewport dimensions presented to the render backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Complete browser identity for one logical session.
///
/// Generated once per session key and never mutated afterwards so every
/// request in the session presents the same attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub user_agent: String,
    pub platform: String,
    pub viewport: Viewport,
    pub timezone: String,
    pub locale: String,
    pub color_depth: u32,
    pub device_memory: u32,
    pub hardware_concurrency: u32,
}

/// User-agent/platform combinations with sampling weights. Chrome on
/// Windows dominates real desktop traffic, so it dominates here too.
const USER_AGENTS: &[(&str, &str, u32)] = &[
    // Chrome on Windows
    ("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36", "Win32", 8),
    ("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36", "Win32", 6),
    ("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36", "Win32", 4),
    ("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/117.0.0.0 Safari/537.36", "Win32", 2),
    // Chrome on Mac
    ("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36", "MacIntel", 5),
    ("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36", "MacIntel", 3),
    ("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36", "MacIntel", 2),
    // Firefox on Windows
    ("Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0", "Win32", 3),
    ("Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) Gecko/20100101 Firefox/120.0", "Win32", 2),
    ("Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:119.0) Gecko/20100101 Firefox/119.0", "Win32", 1),
    // Firefox on Mac
    ("Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:121.0) Gecko/20100101 Firefox/121.0", "MacIntel", 2),
    ("Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:120.0) Gecko/20100101 Firefox/120.0", "MacIntel", 1),
    // Safari on Mac
    ("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15", "MacIntel", 3),
    ("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15", "MacIntel", 2),
    ("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15", "MacIntel", 1),
    // Edge on Windows
    ("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0", "Win32", 3),
    ("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36 Edg/119.0.0.0", "Win32", 2),
];

/// Common desktop viewports.
const VIEWPORTS: &[(u32, u32)] = &[
    (1920, 1080),
    (1366, 768),
    (1440, 900),
    (1536, 864),
    (2560, 1440),
    (1280, 720),
    (1680, 1050),
];

/// US timezones, matching the marketplace being scanned.
const US_TIMEZONES: &[&str] = &[
    "America/New_York",
    "America/Chicago",
    "America/Denver",
    "America/Los_Angeles",
    "America/Phoenix",
    "America/Anchorage",
];

const US_LOCALES: &[&str] = &["en-US", "en_US"];

const COLOR_DEPTHS: &[u32] = &[24, 30, 32];

const DEVICE_MEMORY_GB: &[u32] = &[2, 4, 8, 16, 32];

const HARDWARE_CONCURRENCY: &[u32] = &[2, 4, 6, 8, 12, 16];

/// Samples fresh browser identities from the fixed pools. Stateless;
/// per-session caching lives in the session store.
pub struct FingerprintProvider;

impl FingerprintProvider {
    /// Sample a new identity (with replacement; the pool never runs dry).
    pub fn sample() -> Fingerprint {
        let mut rng = thread_rng();

        let (user_agent, platform, _) = USER_AGENTS
            .choose_weighted(&mut rng, |entry| entry.2)
            .unwrap_or(&USER_AGENTS[0]);

        let (width, height) = *VIEWPORTS.choose(&mut rng).unwrap_or(&VIEWPORTS[0]);

        let fingerprint = Fingerprint {
            user_agent: (*user_agent).to_string(),
            platform: (*platform).to_string(),
            viewport: Viewport { width, height },
            timezone: pick(&mut rng, US_TIMEZONES).to_string(),
            locale: pick(&mut rng, US_LOCALES).to_string(),
            color_depth: *pick(&mut rng, COLOR_DEPTHS),
            device_memory: *pick(&mut rng, DEVICE_MEMORY_GB),
            hardware_concurrency: *pick(&mut rng, HARDWARE_CONCURRENCY),
        };

        debug!(
            "sampled fingerprint: {} / {}x{}",
            fingerprint.platform, width, height
        );

        fingerprint
    }
}

fn pick<'a, T>(rng: &mut impl Rng, pool: &'a [T]) -> &'a T {
    &pool[rng.gen_range(0..pool.len())]
}

/// Build realistic request headers for a fingerprint, imitating what the
/// matching browser actually sends.
pub fn realistic_headers(fingerprint: &Fingerprint) -> HashMap<String, String> {
    let ua = fingerprint.user_agent.as_str();
    let is_edge = ua.contains("Edg");
    let is_chrome = ua.contains("Chrome") && !is_edge;
    let is_firefox = ua.contains("Firefox");

    let mut headers = HashMap::new();
    headers.insert("User-Agent".to_string(), ua.to_string());
    headers.insert(
        "Accept".to_string(),
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8"
            .to_string(),
    );
    headers.insert(
        "Accept-Language".to_string(),
        format!("{},en;q=0.9", fingerprint.locale.replace('_', "-")),
    );
    headers.insert("Accept-Encoding".to_string(), "gzip, deflate, br".to_string());
    headers.insert("DNT".to_string(), "1".to_string());
    headers.insert("Connection".to_string(), "keep-alive".to_string());
    headers.insert("Upgrade-Insecure-Requests".to_string(), "1".to_string());

    if is_chrome || is_edge {
        let sec_platform = if fingerprint.platform == "MacIntel" {
            "\"macOS\""
        } else {
            "\"Windows\""
        };
        headers.insert(
            "sec-ch-ua".to_string(),
            "\"Not_A Brand\";v=\"8\", \"Chromium\";v=\"120\", \"Google Chrome\";v=\"120\""
                .to_string(),
        );
        headers.insert("sec-ch-ua-mobile".to_string(), "?0".to_string());
        headers.insert("sec-ch-ua-platform".to_string(), sec_platform.to_string());
        headers.insert("Sec-Fetch-Site".to_string(), "none".to_string());
        headers.insert("Sec-Fetch-Mode".to_string(), "navigate".to_string());
        headers.insert("Sec-Fetch-User".to_string(), "?1".to_string());
        headers.insert("Sec-Fetch-Dest".to_string(), "document".to_string());
    } else if is_firefox {
        headers.insert("TE".to_string(), "trailers".to_string());
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn pools_meet_minimum_sizes() {
        assert!(USER_AGENTS.len() >= 15);
        assert!(VIEWPORTS.len() >= 5);
        assert!(US_TIMEZONES.len() >= 5);
    }

    #[test]
    fn sampled_fields_come_from_pools() {
        for _ in 0..50 {
            let fp = FingerprintProvider::sample();
            assert!(USER_AGENTS
                .iter()
                .any(|(ua, platform, _)| *ua == fp.user_agent && *platform == fp.platform));
            assert!(VIEWPORTS
                .iter()
                .any(|(w, h)| *w == fp.viewport.width && *h == fp.viewport.height));
            assert!(US_TIMEZONES.contains(&fp.timezone.as_str()));
        }
    }

    #[test]
    fn samples_vary_across_draws() {
        let agents: HashSet<String> = (0..200)
            .map(|_| FingerprintProvider::sample().user_agent)
            .collect();
        assert!(agents.len() > 1);
    }

    #[test]
    fn chrome_headers_carry_client_hints() {
        let fp = Fingerprint {
            user_agent: USER_AGENTS[0].0.to_string(),
            platform: "Win32".to_string(),
            viewport: Viewport {
                width: 1920,
                height: 1080,
            },
            timezone: "America/New_York".to_string(),
            locale: "en-US".to_string(),
            color_depth: 24,
            device_memory: 8,
            hardware_concurrency: 8,
        };

        let headers = realistic_headers(&fp);
        assert!(headers.contains_key("sec-ch-ua"));
        assert_eq!(headers["sec-ch-ua-platform"], "\"Windows\"");
        assert_eq!(headers["User-Agent"], fp.user_agent);
    }

    #[test]
    fn firefox_headers_skip_client_hints() {
        let fp = Fingerprint {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0".to_string(),
            platform: "Win32".to_string(),
            viewport: Viewport {
                width: 1366,
                height: 768,
            },
            timezone: "America/Chicago".to_string(),
            locale: "en-US".to_string(),
            color_depth: 24,
            device_memory: 16,
            hardware_concurrency: 4,
        };

        let headers = realistic_headers(&fp);
        assert!(!headers.contains_key("sec-ch-ua"));
        assert_eq!(headers["TE"], "trailers");
    }
}
