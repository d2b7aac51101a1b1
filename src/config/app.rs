//! Main application configuration
//!
//! This module defines the configuration structures for the pickup-room
//! service: defaults, TOML file loading, environment overrides and
//! validation.

use crate::expiry::policy::ExpiryPolicy;
use crate::pickup::manager::{PartialStartPolicy, PickupOptions};
use crate::pickup::teams::CaptainPolicy;
use crate::types::Gametype;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub pickup: PickupSettings,
    pub persistence: PersistenceSettings,
    /// Gametypes registered at startup if not already persisted
    pub gametypes: Vec<GametypeSettings>,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name for logging and metrics
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Port for health check endpoint
    pub health_port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
}

/// Queue behaviour settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PickupSettings {
    /// Seconds after joining before a player is warned
    pub warn_time_seconds: u64,
    /// Seconds after joining before an entry is evicted
    pub timeout_seconds: u64,
    pub captain_policy: CaptainPolicy,
    pub partial_start_policy: PartialStartPolicy,
    /// Remove matched players from their other queues
    pub withdraw_matched_elsewhere: bool,
}

/// Where gametypes and subscriptions are stored
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceSettings {
    /// TOML state file; state is kept in memory only when unset
    pub state_file: Option<PathBuf>,
}

/// A gametype declared in the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GametypeSettings {
    pub title: String,
    pub players: usize,
    /// Defaults to the player count
    pub teams: Option<usize>,
    pub stats_name: Option<String>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "pickup-room".to_string(),
            log_level: "info".to_string(),
            health_port: 8080,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl Default for PickupSettings {
    fn default() -> Self {
        Self {
            warn_time_seconds: 1200, // 20 minutes
            timeout_seconds: 1800,   // 30 minutes
            captain_policy: CaptainPolicy::First,
            partial_start_policy: PartialStartPolicy::Present,
            withdraw_matched_elsewhere: true,
        }
    }
}

impl GametypeSettings {
    /// Build the validated gametype
    pub fn to_gametype(&self) -> Result<Gametype> {
        Ok(Gametype::new(
            self.title.as_str(),
            self.players,
            self.teams.unwrap_or(self.players),
            self.stats_name.clone(),
        )?)
    }
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_overrides(|key| env::var(key).ok())?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Load a TOML configuration file, then apply environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config = Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        config.apply_overrides(|key| env::var(key).ok())?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Parse TOML without touching the environment
    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply `NAME=value` overrides looked up through `lookup`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        // Service settings
        if let Some(name) = lookup("SERVICE_NAME") {
            self.service.name = name;
        }
        if let Some(log_level) = lookup("LOG_LEVEL") {
            self.service.log_level = log_level;
        }
        if let Some(port) = lookup("HEALTH_PORT") {
            self.service.health_port = port
                .parse()
                .map_err(|_| anyhow!("Invalid HEALTH_PORT value: {}", port))?;
        }
        if let Some(timeout) = lookup("SHUTDOWN_TIMEOUT_SECONDS") {
            self.service.shutdown_timeout_seconds = timeout
                .parse()
                .map_err(|_| anyhow!("Invalid SHUTDOWN_TIMEOUT_SECONDS value: {}", timeout))?;
        }

        // Pickup settings
        if let Some(warn) = lookup("PUG_WARN_TIME_SECONDS") {
            self.pickup.warn_time_seconds = warn
                .parse()
                .map_err(|_| anyhow!("Invalid PUG_WARN_TIME_SECONDS value: {}", warn))?;
        }
        if let Some(timeout) = lookup("PUG_TIMEOUT_SECONDS") {
            self.pickup.timeout_seconds = timeout
                .parse()
                .map_err(|_| anyhow!("Invalid PUG_TIMEOUT_SECONDS value: {}", timeout))?;
        }
        if let Some(policy) = lookup("CAPTAIN_POLICY") {
            self.pickup.captain_policy = policy
                .parse()
                .map_err(|e| anyhow!("Invalid CAPTAIN_POLICY value: {}", e))?;
        }
        if let Some(policy) = lookup("PARTIAL_START_POLICY") {
            self.pickup.partial_start_policy = policy
                .parse()
                .map_err(|e| anyhow!("Invalid PARTIAL_START_POLICY value: {}", e))?;
        }
        if let Some(withdraw) = lookup("WITHDRAW_MATCHED_ELSEWHERE") {
            self.pickup.withdraw_matched_elsewhere = withdraw
                .parse()
                .map_err(|_| anyhow!("Invalid WITHDRAW_MATCHED_ELSEWHERE value: {}", withdraw))?;
        }

        // Persistence settings
        if let Some(path) = lookup("STATE_FILE") {
            self.persistence.state_file = (!path.is_empty()).then(|| PathBuf::from(path));
        }

        Ok(())
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_seconds)
    }

    pub fn expiry_policy(&self) -> ExpiryPolicy {
        ExpiryPolicy::from_secs(self.pickup.warn_time_seconds, self.pickup.timeout_seconds)
    }

    /// Options handed to the `PickupManager`
    pub fn pickup_options(&self) -> PickupOptions {
        PickupOptions {
            expiry: self.expiry_policy(),
            partial_start: self.pickup.partial_start_policy,
            withdraw_matched_elsewhere: self.pickup.withdraw_matched_elsewhere,
        }
    }

    /// Seed gametypes from the configuration file
    pub fn seed_gametypes(&self) -> Result<Vec<Gametype>> {
        self.gametypes
            .iter()
            .map(GametypeSettings::to_gametype)
            .collect()
    }
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    // Validate log level
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.service.log_level)),
    }

    // Validate ports
    if config.service.health_port == 0 {
        return Err(anyhow!("Health port cannot be 0"));
    }

    // Validate timeouts
    if config.service.shutdown_timeout_seconds == 0 {
        return Err(anyhow!("Shutdown timeout must be greater than 0"));
    }
    if config.pickup.warn_time_seconds == 0 || config.pickup.timeout_seconds == 0 {
        return Err(anyhow!("Pickup warn time and timeout must be greater than 0"));
    }
    if config.pickup.warn_time_seconds >= config.pickup.timeout_seconds {
        return Err(anyhow!(
            "Pickup warn time ({}s) must be less than the timeout ({}s)",
            config.pickup.warn_time_seconds,
            config.pickup.timeout_seconds
        ));
    }

    // Validate seed gametypes
    let mut titles = std::collections::BTreeSet::new();
    for settings in &config.gametypes {
        settings.to_gametype()?;
        if !titles.insert(settings.title.trim()) {
            return Err(anyhow!("Gametype {} declared twice", settings.title));
        }
    }

    Ok(())
}
