use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ScanConfig {
    pub scan: ScanSettings,
    pub stealth: StealthSettings,
    pub render: RenderSettings,
}

/// Scan-engine settings: pool size, shared rate budget, retry and
/// breaker behavior.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ScanSettings {
    /// Concurrent workers pulling from the shared queue.
    pub max_workers: usize,
    /// Hard ceiling applied to `max_workers` overrides.
    pub worker_cap: usize,
    /// Requests permitted per trailing minute, across all workers.
    pub rate_limit: usize,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// Seconds the breaker stays open before probing.
    pub reset_timeout_secs: u64,
    /// Progress log entries kept for pollers.
    pub log_capacity: usize,
}

/// Anti-detection settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StealthSettings {
    /// false selects the plain fetcher (no fingerprinting or pacing).
    pub enabled: bool,
    /// Session cache cap; least-recently-used sessions are evicted.
    pub max_sessions: usize,
    pub pacing: PacingSettings,
}

/// Human-like pause between requests, in milliseconds.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PacingSettings {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Chance of an additional long "user wandered off" pause.
    pub distracted_probability: f64,
    pub distracted_min_ms: u64,
    pub distracted_max_ms: u64,
}

/// Render backend settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RenderSettings {
    pub url: String,
    /// In-page wait for basic renders, seconds.
    pub wait_secs: f64,
    /// Min and max in-page wait for stealth renders, seconds.
    pub stealth_wait: (f64, f64),
    /// Request timeout for the first attempt, seconds.
    pub timeout_secs: u64,
    /// Ceiling for escalated retry timeouts, seconds.
    pub max_timeout_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            scan: ScanSettings {
                max_workers: 20,
                worker_cap: 100,
                rate_limit: 30,
                max_retries: 3,
                retry_base_delay_ms: 2000,
                retry_max_delay_ms: 30_000,
                failure_threshold: 5,
                reset_timeout_secs: 60,
                log_capacity: 500,
            },
            stealth: StealthSettings {
                enabled: true,
                max_sessions: 512,
                pacing: PacingSettings {
                    min_delay_ms: 1000,
                    max_delay_ms: 5000,
                    distracted_probability: 0.2,
                    distracted_min_ms: 2000,
                    distracted_max_ms: 10_000,
                },
            },
            render: RenderSettings {
                url: "http://localhost:8050".to_string(),
                wait_secs: 2.0,
                stealth_wait: (2.0, 5.0),
                timeout_secs: 30,
                max_timeout_secs: 120,
            },
        }
    }
}

impl ScanConfig {
    /// Effective worker count after applying overrides and the cap.
    pub fn effective_workers(&self, override_workers: Option<usize>) -> usize {
        override_workers
            .unwrap_or(self.scan.max_workers)
            .min(self.scan.worker_cap.max(1))
    }

    /// Get the path to the config directory
    fn config_dir() -> PathBuf {
        let mut path = if let Some(proj_dirs) = directories::ProjectDirs::from("com", "arbiscan", "arbiscan") {
            proj_dirs.config_dir().to_path_buf()
        } else {
            PathBuf::from("./config")
        };

        // Create the profiles directory if it doesn't exist
        path.push("profiles");
        if !path.exists() {
            if let Err(e) = fs::create_dir_all(&path) {
                error!("Failed to create config directory: {}", e);
            }
        }

        // Move back up to the config directory
        path.pop();
        path
    }

    /// Load the default configuration
    pub fn load_default() -> Result<Self> {
        let config_dir = Self::config_dir();
        let config_path = config_dir.join("default.yaml");

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            // Create and save the default configuration
            info!("Default configuration not found. Creating...");
            let config = Self::default();
            config.save_as_default()?;
            Ok(config)
        }
    }

    /// Load a configuration profile
    pub fn load_profile(profile: &str) -> Result<Self> {
        if profile == "default" {
            return Self::load_default();
        }

        let config_dir = Self::config_dir();
        let profile_path = config_dir.join("profiles").join(format!("{}.yaml", profile));

        if profile_path.exists() {
            Self::load_from_file(&profile_path)
        } else {
            anyhow::bail!("Profile '{}' not found", profile)
        }
    }

    /// Load configuration from a file
    fn load_from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());
        let contents = fs::read_to_string(path)
            .context(format!("Failed to read configuration file: {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&contents)
            .context(format!("Failed to parse configuration file: {}", path.display()))?;

        Ok(config)
    }

    /// Save the configuration as the default
    pub fn save_as_default(&self) -> Result<()> {
        let config_dir = Self::config_dir();
        let config_path = config_dir.join("default.yaml");

        self.save_to_file(&config_path)
    }

    /// Save the configuration as a profile
    pub fn save_as_profile(&self, profile: &str) -> Result<()> {
        let config_dir = Self::config_dir();
        let profiles_dir = config_dir.join("profiles");

        if !profiles_dir.exists() {
            fs::create_dir_all(&profiles_dir)
                .context(format!("Failed to create profiles directory: {}", profiles_dir.display()))?;
        }

        let profile_path = profiles_dir.join(format!("{}.yaml", profile));
        self.save_to_file(&profile_path)
    }

    /// Save the configuration to a file
    fn save_to_file(&self, path: &Path) -> Result<()> {
        debug!("Saving configuration to: {}", path.display());

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let contents = serde_yaml::to_string(self)
            .context("Failed to serialize configuration")?;

        fs::write(path, contents)
            .context(format!("Failed to write configuration file: {}", path.display()))?;

        Ok(())
    }

    /// List all available profiles
    pub fn list_profiles() -> Result<Vec<String>> {
        let config_dir = Self::config_dir();
        let profiles_dir = config_dir.join("profiles");

        if !profiles_dir.exists() {
            return Ok(vec![]);
        }

        let mut profiles = Vec::new();

        for entry in fs::read_dir(profiles_dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.is_file() && path.extension().map_or(false, |ext| ext == "yaml") {
                if let Some(stem) = path.file_stem() {
                    if let Some(name) = stem.to_str() {
                        profiles.push(name.to_string());
                    }
                }
            }
        }

        Ok(profiles)
    }
}
