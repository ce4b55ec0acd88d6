//! Configuration management for the equilibrium arbitrage bot.
//!
//! Process settings (venue endpoints, scan fan-out, storage, notifications) are loaded
//! from environment variables and config files. Trading thresholds live in the
//! persisted [`ScannerConfig`] singleton so they can change while the loop runs.

mod trading;

pub use trading::{ExitModel, ParseExitModelError, ScannerConfig};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Venue endpoints
    #[serde(default)]
    pub venue: VenueConfig,
    /// Scan fan-out and caching
    #[serde(default)]
    pub scanner: ScanConfig,
    /// Opportunity alerts
    #[serde(default)]
    pub notifications: NotificationConfig,
    /// SQLite location
    #[serde(default)]
    pub storage: StorageConfig,
    /// Control loop timing
    #[serde(default)]
    pub controller: ControllerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueConfig {
    /// Gamma API base URL (market listings)
    #[serde(default = "default_gamma_url")]
    pub gamma_url: String,
    /// CLOB API base URL (books, midpoints, orders)
    #[serde(default = "default_clob_url")]
    pub clob_url: String,
    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Maximum in-flight market analyses per scan
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Timeout for one market analysis in seconds
    #[serde(default = "default_analysis_timeout")]
    pub analysis_timeout_secs: u64,
    /// Opportunity cache TTL in seconds
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    /// Number of opportunities summarized in scan-complete events
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    /// Stored opportunities older than this are deactivated
    #[serde(default = "default_stale_opportunity_minutes")]
    pub stale_opportunity_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Discord-compatible webhook URL (empty disables alerts)
    #[serde(default)]
    pub webhook_url: String,
    /// Minimum total score that triggers an alert
    #[serde(default = "default_notify_min_score")]
    pub min_score: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Delay before retrying after a failed cycle
    #[serde(default = "default_error_backoff")]
    pub error_backoff_secs: u64,
}

// Default value functions
fn default_gamma_url() -> String {
    "https://gamma-api.polymarket.com".to_string()
}

fn default_clob_url() -> String {
    "https://clob.polymarket.com".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_max_concurrency() -> usize {
    50 // Keeps the CLOB under its public rate limit
}

fn default_analysis_timeout() -> u64 {
    10 // Same budget as a single gateway call
}

fn default_cache_ttl() -> u64 {
    30
}

fn default_top_n() -> usize {
    5
}

fn default_stale_opportunity_minutes() -> i64 {
    60
}

fn default_notify_min_score() -> u8 {
    7
}

fn default_database_path() -> String {
    "data/equilibrium.db".to_string()
}

fn default_error_backoff() -> u64 {
    10
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("EQA"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.scanner.max_concurrency >= 1,
            "max_concurrency must be at least 1"
        );

        anyhow::ensure!(
            self.scanner.analysis_timeout_secs >= 1,
            "analysis_timeout_secs must be at least 1"
        );

        anyhow::ensure!(
            self.notifications.min_score <= 10,
            "notification min_score must be between 0 and 10"
        );

        anyhow::ensure!(
            !self.venue.gamma_url.is_empty() && !self.venue.clob_url.is_empty(),
            "venue URLs must not be empty"
        );

        Ok(())
    }
}

impl ScanConfig {
    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl ControllerConfig {
    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            gamma_url: default_gamma_url(),
            clob_url: default_clob_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            analysis_timeout_secs: default_analysis_timeout(),
            cache_ttl_secs: default_cache_ttl(),
            top_n: default_top_n(),
            stale_opportunity_minutes: default_stale_opportunity_minutes(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            min_score: default_notify_min_score(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            error_backoff_secs: default_error_backoff(),
        }
    }
}
