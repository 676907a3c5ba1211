//! Configuration management for the voice call pipeline
//!
//! Supports loading configuration from:
//! - TOML files under `config/`
//! - Environment variables (`VOICE_CALL__` prefix)
//!
//! Tuning values that are really deployment knobs, the interrupt ratio
//! and silence window above all, live in [`settings::VadSettings`] so
//! they are injected rather than inlined at the point of use.

pub mod constants;
pub mod settings;

pub use settings::{
    load_settings, AudioSettings, CallSettings, CostSettings, ObservabilityConfig,
    RuntimeEnvironment, ServiceSettings, Settings, VadSettings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Environment error: {0}")]
    Environment(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
