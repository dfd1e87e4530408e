//! Main application configuration
//!
//! This module defines the primary configuration structures for the pairhouse
//! service, including environment variable loading, TOML files and validation.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub store: StoreSettings,
    pub matchmaking: MatchmakingSettings,
    pub signaling: SignalingSettings,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name for logging and metrics
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Interface the API and metrics servers bind to
    pub http_host: String,
    /// Port for the matchmaking and signaling API
    pub http_port: u16,
    /// Port for health and Prometheus endpoints
    pub metrics_port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
}

/// Ephemeral store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// How often expired keys are swept from the in-memory store
    pub sweep_interval_seconds: u64,
}

/// Matchmaking-specific settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakingSettings {
    /// Width of a skill bucket
    pub bucket_width: i64,
    /// Skill assumed when a request omits one
    pub default_target_skill: f64,
    /// How long a match record waits for pickup
    pub match_ttl_seconds: u64,
    /// Sleep when no queue has ever seen traffic
    pub idle_backoff_ms: u64,
    /// Sleep between scans of a non-empty registry
    pub pairing_backoff_ms: u64,
    /// Sleep after a failed cycle
    pub error_cooldown_ms: u64,
}

/// Signaling relay settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingSettings {
    /// Lifetime of negotiation payloads and presence sets
    pub payload_ttl_seconds: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "pairhouse".to_string(),
            log_level: "info".to_string(),
            http_host: "0.0.0.0".to_string(),
            http_port: 3000,
            metrics_port: 9090,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: 30,
        }
    }
}

impl Default for MatchmakingSettings {
    fn default() -> Self {
        Self {
            bucket_width: 50,
            default_target_skill: 1200.0,
            match_ttl_seconds: 30,
            idle_backoff_ms: 1000,
            pairing_backoff_ms: 500,
            error_cooldown_ms: 5000,
        }
    }
}

impl Default for SignalingSettings {
    fn default() -> Self {
        Self {
            payload_ttl_seconds: 120,
        }
    }
}

/// Parse an environment variable into `target` when it is set
fn override_from_env<T: FromStr>(name: &str, target: &mut T) -> Result<()> {
    if let Ok(raw) = env::var(name) {
        *target = raw
            .parse()
            .map_err(|_| anyhow!("Invalid {} value: {}", name, raw))?;
    }
    Ok(())
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a TOML file; environment variables still win
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config = Self::from_toml_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Parse a TOML document; missing sections and keys fall back to defaults
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(raw)?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        // Service settings
        override_from_env("SERVICE_NAME", &mut self.service.name)?;
        override_from_env("LOG_LEVEL", &mut self.service.log_level)?;
        override_from_env("HTTP_HOST", &mut self.service.http_host)?;
        override_from_env("HTTP_PORT", &mut self.service.http_port)?;
        override_from_env("METRICS_PORT", &mut self.service.metrics_port)?;
        override_from_env(
            "SHUTDOWN_TIMEOUT_SECONDS",
            &mut self.service.shutdown_timeout_seconds,
        )?;

        // Store settings
        override_from_env(
            "STORE_SWEEP_INTERVAL_SECONDS",
            &mut self.store.sweep_interval_seconds,
        )?;

        // Matchmaking settings
        override_from_env("BUCKET_WIDTH", &mut self.matchmaking.bucket_width)?;
        override_from_env(
            "DEFAULT_TARGET_SKILL",
            &mut self.matchmaking.default_target_skill,
        )?;
        override_from_env("MATCH_TTL_SECONDS", &mut self.matchmaking.match_ttl_seconds)?;
        override_from_env("IDLE_BACKOFF_MS", &mut self.matchmaking.idle_backoff_ms)?;
        override_from_env("PAIRING_BACKOFF_MS", &mut self.matchmaking.pairing_backoff_ms)?;
        override_from_env("ERROR_COOLDOWN_MS", &mut self.matchmaking.error_cooldown_ms)?;

        // Signaling settings
        override_from_env(
            "SIGNALING_PAYLOAD_TTL_SECONDS",
            &mut self.signaling.payload_ttl_seconds,
        )?;

        Ok(())
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_seconds)
    }

    /// Get store sweep interval as Duration
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.store.sweep_interval_seconds)
    }

    /// Get match record TTL as Duration
    pub fn match_ttl(&self) -> Duration {
        Duration::from_secs(self.matchmaking.match_ttl_seconds)
    }

    /// Get signaling payload TTL as Duration
    pub fn payload_ttl(&self) -> Duration {
        Duration::from_secs(self.signaling.payload_ttl_seconds)
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
    if config.service.http_port == 0 {
        return Err(anyhow!("HTTP port cannot be 0"));
    }
    if config.service.metrics_port == 0 {
        return Err(anyhow!("Metrics port cannot be 0"));
    }
    if config.service.http_port == config.service.metrics_port {
        return Err(anyhow!("HTTP and metrics ports must differ"));
    }

    // Validate timeouts
    if config.service.shutdown_timeout_seconds == 0 {
        return Err(anyhow!("Shutdown timeout must be greater than 0"));
    }
    if config.store.sweep_interval_seconds == 0 {
        return Err(anyhow!("Store sweep interval must be greater than 0"));
    }

    // Validate matchmaking settings
    if config.matchmaking.bucket_width <= 0 {
        return Err(anyhow!("Bucket width must be positive"));
    }
    if !config.matchmaking.default_target_skill.is_finite() {
        return Err(anyhow!("Default target skill must be a finite number"));
    }
    if config.matchmaking.match_ttl_seconds == 0 {
        return Err(anyhow!("Match TTL must be greater than 0"));
    }
    if config.matchmaking.idle_backoff_ms == 0 || config.matchmaking.pairing_backoff_ms == 0 {
        return Err(anyhow!("Worker backoff delays must be greater than 0"));
    }

    // Validate signaling settings
    if config.signaling.payload_ttl_seconds == 0 {
        return Err(anyhow!("Signaling payload TTL must be greater than 0"));
    }

    Ok(())
}
