//! Configuration management for the pairhouse service
//!
//! This module handles all configuration loading from environment variables
//! or TOML files, validation, and default values.

pub mod app;

// Re-export commonly used types
pub use app::{
    validate_config, AppConfig, MatchmakingSettings, ServiceSettings, SignalingSettings,
    StoreSettings,
};
