//! Configuration for the compound CLI
//!
//! Values are layered: built-in defaults, then an optional config file,
//! then `COMPOUND_*` environment variables.

use std::path::Path;

use compound_dsl::apithon::{MAX_CODE_BYTES, WARNING_MARGIN};
use compound_dsl::workflow::DEFAULT_ACTION_NAME;
use compound_dsl::{SerializerOptions, ValidationOptions};
use compound_monitoring::{LogFormat, MonitoringConfig};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Prefix of environment overrides, e.g. `COMPOUND_MAX_CODE_BYTES`
pub const ENV_PREFIX: &str = "COMPOUND";

/// Base name of the config file looked up in the working directory
pub const DEFAULT_CONFIG_NAME: &str = "compound";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// CLI configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompoundConfig {
    /// Top-level `action_name` when none is given on the command line
    pub default_action_name: String,

    pub max_code_bytes: usize,

    pub byte_limit_warning_margin: usize,

    /// Lowercase snake_case output keys only
    pub strict_output_keys: bool,

    /// Write blank mandatory strings as `''` instead of failing
    pub allow_blank_fields: bool,

    pub log_filter: String,

    pub json_logs: bool,
}

impl Default for CompoundConfig {
    fn default() -> Self {
        Self {
            default_action_name: DEFAULT_ACTION_NAME.to_string(),
            max_code_bytes: MAX_CODE_BYTES,
            byte_limit_warning_margin: WARNING_MARGIN,
            strict_output_keys: true,
            allow_blank_fields: false,
            log_filter: "warn".to_string(),
            json_logs: false,
        }
    }
}

impl CompoundConfig {
    /// Load configuration from an optional file and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, Environment::with_prefix(ENV_PREFIX))
    }

    /// Load configuration with an explicit environment source
    pub fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };

        let config: CompoundConfig = Config::builder()
            .add_source(file)
            .add_source(env.try_parsing(true))
            .build()?
            .try_deserialize()?;
        config.check()?;

        debug!(?config, "configuration loaded");
        Ok(config)
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.default_action_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "default_action_name cannot be blank".to_string(),
            ));
        }
        if self.max_code_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_code_bytes must be greater than zero".to_string(),
            ));
        }
        if self.byte_limit_warning_margin >= self.max_code_bytes {
            return Err(ConfigError::Invalid(format!(
                "byte_limit_warning_margin ({}) must be smaller than max_code_bytes ({})",
                self.byte_limit_warning_margin, self.max_code_bytes
            )));
        }
        Ok(())
    }

    pub fn validation_options(&self) -> ValidationOptions {
        ValidationOptions {
            strict_output_keys: self.strict_output_keys,
            max_code_bytes: self.max_code_bytes,
            byte_limit_warning_margin: self.byte_limit_warning_margin,
            ..ValidationOptions::default()
        }
    }

    pub fn serializer_options(&self) -> SerializerOptions {
        SerializerOptions {
            action_name: self.default_action_name.clone(),
            allow_blank_fields: self.allow_blank_fields,
            max_code_bytes: self.max_code_bytes,
        }
    }

    pub fn monitoring_config(&self) -> MonitoringConfig {
        let format = if self.json_logs {
            LogFormat::Json
        } else {
            LogFormat::Compact
        };
        MonitoringConfig::default()
            .with_log_filter(self.log_filter.clone())
            .with_log_format(format)
    }
}
