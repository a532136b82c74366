//! Configuration management for the quarry knowledge pipeline
//!
//! Supports loading configuration from:
//! - TOML files
//! - Environment variables (QUARRY_ prefix)
//! - Runtime overrides
//!
//! The loader never writes the configuration file. Presentation layers may
//! override values per invocation but must do so in memory.

pub mod settings;
pub mod prompts;
pub mod logging;

pub use settings::{
    load_settings, LlmSettings, LoggingSettings, MiningSettings, ProxySettings, Settings,
    StorageSettings, TranscriptionSettings, YoutubeSettings,
};
pub use prompts::PromptLibrary;
pub use logging::init_logging;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

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

impl From<ConfigError> for quarry_core::Error {
    fn from(err: ConfigError) -> Self {
        quarry_core::Error::Config(err.to_string())
    }
}
