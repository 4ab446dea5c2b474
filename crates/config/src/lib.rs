//! Configuration management for the rep voice agent
//!
//! Supports loading configuration from:
//! - TOML files
//! - Environment variables (REPVOICE_ prefix)

pub mod prompts;
pub mod settings;

pub use prompts::DEFAULT_SYSTEM_PROMPT;
pub use settings::{
    load_settings, AudioConfig, GuardrailsSettings, InferenceConfig, ProviderConfig,
    ServerConfig, SessionConfig, Settings, WebhookConfig,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
