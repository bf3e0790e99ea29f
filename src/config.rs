//! Scheduler configuration.
//!
//! Loaded from an explicit path, ./quotaflow.yml or ~/.config/quotaflow/quotaflow.yml,
//! and replaceable at runtime through `Scheduler::configure`.

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::SchedulerError;

/// Utilization at or above which dispatches are paced.
pub const DEFAULT_THROTTLE_THRESHOLD: f64 = 0.8;
/// Fraction of the normal dispatch rate kept while throttled.
pub const DEFAULT_THROTTLE_RATE: f64 = 0.5;
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 120_000;
/// Fraction of a tenant's combined limit that HIGH units may bypass per window.
pub const DEFAULT_MAX_BYPASS_RATE: f64 = 0.1;
pub const DEFAULT_BYPASS_WINDOW_MS: u64 = 3_600_000;
pub const DEFAULT_MIN_REQUEST_INTERVAL_MS: u64 = 100;
pub const DEFAULT_REAP_INTERVAL_MS: u64 = 1_000;
/// Upper bound on the throttled dispatch gap (`min_request_interval / throttle_rate`).
pub const MAX_THROTTLED_INTERVAL_MS: u64 = 3_600_000;

/// Global tunables for admission control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Utilization (0..=1) from which throttled pacing kicks in.
    pub throttle_threshold: f64,
    /// Rate multiplier while throttled; the dispatch gap is divided by it.
    pub throttle_rate: f64,
    /// Maximum queued units per tenant.
    pub max_queue_size: usize,
    /// Longest a unit may sit in a queue before being failed.
    pub request_timeout_ms: u64,
    /// Bypass budget as a fraction of the tenant's combined quota limit.
    pub max_bypass_rate: f64,
    /// Length of the bypass accounting window.
    pub bypass_window_ms: u64,
    /// Normal spacing between dispatches, before throttling.
    pub min_request_interval_ms: u64,
    /// Period of the stale request sweep.
    pub reap_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            throttle_threshold: DEFAULT_THROTTLE_THRESHOLD,
            throttle_rate: DEFAULT_THROTTLE_RATE,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            max_bypass_rate: DEFAULT_MAX_BYPASS_RATE,
            bypass_window_ms: DEFAULT_BYPASS_WINDOW_MS,
            min_request_interval_ms: DEFAULT_MIN_REQUEST_INTERVAL_MS,
            reap_interval_ms: DEFAULT_REAP_INTERVAL_MS,
        }
    }
}

impl SchedulerConfig {
    /// Set the per-tenant queue capacity.
    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    /// Set the queue residency timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the throttle threshold and rate together.
    pub fn with_throttle(mut self, threshold: f64, rate: f64) -> Self {
        self.throttle_threshold = threshold;
        self.throttle_rate = rate;
        self
    }

    /// Set the bypass rate and window.
    pub fn with_bypass(mut self, rate: f64, window: Duration) -> Self {
        self.max_bypass_rate = rate;
        self.bypass_window_ms = window.as_millis() as u64;
        self
    }

    /// Set the normal dispatch spacing.
    pub fn with_min_request_interval(mut self, interval: Duration) -> Self {
        self.min_request_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the stale request sweep period.
    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn bypass_window(&self) -> Duration {
        Duration::from_millis(self.bypass_window_ms)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }

    /// Gap enforced between dispatches of one tenant's resource class while throttled.
    pub fn throttled_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms).div_f64(self.throttle_rate)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> std::result::Result<(), SchedulerError> {
        let invalid =
            |msg: &str| -> std::result::Result<(), SchedulerError> { Err(SchedulerError::InvalidConfig(msg.to_string())) };

        if !self.throttle_threshold.is_finite() || self.throttle_threshold <= 0.0 || self.throttle_threshold > 1.0 {
            return invalid("throttle_threshold must be in (0, 1]");
        }
        if !self.throttle_rate.is_finite() || self.throttle_rate <= 0.0 || self.throttle_rate > 1.0 {
            return invalid("throttle_rate must be in (0, 1]");
        }
        let throttled_ms = self.min_request_interval_ms as f64 / self.throttle_rate;
        if !throttled_ms.is_finite() || throttled_ms > MAX_THROTTLED_INTERVAL_MS as f64 {
            return invalid("min_request_interval_ms / throttle_rate must not exceed one hour");
        }
        if self.max_queue_size == 0 {
            return invalid("max_queue_size must be > 0");
        }
        if self.request_timeout_ms == 0 {
            return invalid("request_timeout_ms must be > 0");
        }
        if !self.max_bypass_rate.is_finite() || !(0.0..=1.0).contains(&self.max_bypass_rate) {
            return invalid("max_bypass_rate must be in [0, 1]");
        }
        if self.bypass_window_ms == 0 {
            return invalid("bypass_window_ms must be > 0");
        }
        if self.reap_interval_ms == 0 {
            return invalid("reap_interval_ms must be > 0");
        }
        Ok(())
    }

    /// Load configuration with fallback chain.
    ///
    /// Search order:
    /// 1. Explicit path if provided
    /// 2. quotaflow.yml in current directory
    /// 3. ~/.config/quotaflow/quotaflow.yml
    /// 4. Defaults
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_name = env!("CARGO_PKG_NAME");

        let project_config = PathBuf::from(format!("{}.yml", project_name));
        if project_config.exists() {
            match Self::load_from_file(&project_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", project_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}
