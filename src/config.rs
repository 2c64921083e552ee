//! Decoder configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (application settings and the crate map)
//! 2. environment variables prefixed with `DAQ_DECODE_`, nested keys
//!    separated by a double underscore
//!
//! # Example
//! ```no_run
//! use daq_decode::config::DecoderConfig;
//!
//! # fn main() -> Result<(), daq_decode::error::ConfigError> {
//! let config = DecoderConfig::load_from("config/decoder.toml")?;
//! config.validate()?;
//! println!("Crates: {:?}", config.crate_map.used_crates());
//! # Ok(())
//! # }
//! ```
//!
//! `DAQ_DECODE_APPLICATION__LOG_LEVEL=debug` overrides the log level.

use crate::crate_map::CrateMap;
use crate::error::ConfigError;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "DAQ_DECODE_";

/// Top-level decoder configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Crates and the modules in their slots
    #[serde(default)]
    pub crate_map: CrateMap,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_name() -> String {
    "daq_decode".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

impl DecoderConfig {
    /// Load configuration from a TOML file merged with the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("configuration file {} not found", path.display()),
            )));
        }
        Ok(Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?)
    }

    /// Parse configuration from a TOML string, without environment overrides.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(Figment::new().merge(Toml::string(text)).extract()?)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::Validation(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }
        self.crate_map.validate()?;
        Ok(())
    }
}
