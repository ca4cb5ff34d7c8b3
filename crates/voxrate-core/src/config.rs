//! Application configuration
//!
//! This module provides centralized configuration management using the `config` crate.
//! Configuration can be loaded from environment variables and config files.
//! Every section has defaults, so an empty environment yields a usable setup.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::models::RoundingMethod;

/// Main application configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub rating: RatingPolicy,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Rating policy handed to the splitter, the calculator and the resolver
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RatingPolicy {
    /// Rounding applied to call cost totals
    #[serde(default)]
    pub rounding_method: RoundingMethod,

    /// Decimals kept by the global rounding
    #[serde(default = "default_rounding_decimals")]
    pub rounding_decimals: u32,

    /// Maximum fallback hops before resolution fails
    #[serde(default = "default_max_fallback_depth")]
    pub max_fallback_depth: usize,

    /// Subject tried when the call subject has no plan
    #[serde(default = "default_fallback_subject")]
    pub fallback_subject: String,

    /// Upper bound on timespans produced for one call window
    #[serde(default = "default_max_timespans")]
    pub max_timespans: usize,
}

fn default_rounding_decimals() -> u32 {
    4
}

fn default_max_fallback_depth() -> usize {
    10
}

fn default_fallback_subject() -> String {
    "*any".to_string()
}

fn default_max_timespans() -> usize {
    10_000
}

impl Default for RatingPolicy {
    fn default() -> Self {
        Self {
            rounding_method: RoundingMethod::default(),
            rounding_decimals: default_rounding_decimals(),
            max_fallback_depth: default_max_fallback_depth(),
            fallback_subject: default_fallback_subject(),
            max_timespans: default_max_timespans(),
        }
    }
}

/// Session debit loop configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SessionConfig {
    /// Length of each reserved slice in seconds
    #[serde(default = "default_debit_period")]
    pub debit_period_secs: u64,

    /// Attempts made by the max session time search
    #[serde(default = "default_max_session_steps")]
    pub max_session_steps: u32,

    /// Percentage of the requested amount dropped on each attempt
    #[serde(default = "default_max_session_step_percent")]
    pub max_session_step_percent: u32,
}

fn default_debit_period() -> u64 {
    10
}

fn default_max_session_steps() -> u32 {
    10
}

fn default_max_session_step_percent() -> u32 {
    10
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debit_period_secs: default_debit_period(),
            max_session_steps: default_max_session_steps(),
            max_session_step_percent: default_max_session_step_percent(),
        }
    }
}

impl SessionConfig {
    pub fn debit_period(&self) -> Duration {
        Duration::from_secs(self.debit_period_secs)
    }
}

/// In-process cache configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CacheConfig {
    /// Seconds added to the debit period to get the resolved plan TTL
    #[serde(default = "default_plan_ttl_grace")]
    pub plan_ttl_grace_secs: u64,

    /// TTL for cached destinations in seconds
    #[serde(default = "default_destination_ttl")]
    pub destination_ttl_secs: u64,

    /// Maximum number of cached plan resolutions
    #[serde(default = "default_max_entries")]
    pub max_plan_entries: u64,

    /// Maximum number of cached destinations
    #[serde(default = "default_max_entries")]
    pub max_destination_entries: u64,
}

fn default_plan_ttl_grace() -> u64 {
    5
}

fn default_destination_ttl() -> u64 {
    300
}

fn default_max_entries() -> u64 {
    10_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            plan_ttl_grace_secs: default_plan_ttl_grace(),
            destination_ttl_secs: default_destination_ttl(),
            max_plan_entries: default_max_entries(),
            max_destination_entries: default_max_entries(),
        }
    }
}

impl CacheConfig {
    /// TTL of a resolved rating plan lookup, tied to the debit period
    pub fn plan_ttl(&self, session: &SessionConfig) -> Duration {
        Duration::from_secs(session.debit_period_secs + self.plan_ttl_grace_secs)
    }

    pub fn destination_ttl(&self) -> Duration {
        Duration::from_secs(self.destination_ttl_secs)
    }
}

/// Storage backend selection
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Redis,
}

/// Storage configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            redis_url: default_redis_url(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Filter directive, overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            .set_default("rating.rounding_method", "*middle")?
            .set_default("rating.rounding_decimals", 4)?
            .set_default("rating.max_fallback_depth", 10)?
            .set_default("rating.fallback_subject", "*any")?
            .set_default("session.debit_period_secs", 10)?
            .set_default("cache.plan_ttl_grace_secs", 5)?
            .set_default("storage.backend", "memory")?
            .set_default("logging.level", "info")?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables with VOXRATE_ prefix
            .add_source(
                Environment::with_prefix("VOXRATE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("VOXRATE").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}
