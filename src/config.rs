//! Runner configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via --config or STATECHART_CONFIG)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use statechart_core::engine::{EngineConfig, DEFAULT_MAILBOX_CAPACITY};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Runner configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub engine: EngineSection,
    pub output: OutputConfig,
}

impl Config {
    /// Loads configuration from `path` if given, then applies environment
    /// variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        self.logging.apply_overrides(&lookup);
        self.engine.apply_overrides(&lookup);
        self.output.apply_overrides(&lookup);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.mailbox_capacity == 0 {
            return Err(ConfigError::Validation(
                "engine.mailbox_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when RUST_LOG is not set.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(filter) = lookup("STATECHART_LOG") {
            self.filter = filter;
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Mailbox capacity of each engine.
    pub mailbox_capacity: usize,
    /// How long the machine must stay quiet after input ends before the
    /// final snapshot is printed.
    pub settle_ms: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            settle_ms: 500,
        }
    }
}

impl EngineSection {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(capacity) = lookup("STATECHART_MAILBOX_CAPACITY") {
            if let Ok(n) = capacity.parse() {
                self.mailbox_capacity = n;
            }
        }

        if let Some(settle) = lookup("STATECHART_SETTLE_MS") {
            if let Ok(ms) = settle.parse() {
                self.settle_ms = ms;
            }
        }
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            mailbox_capacity: self.mailbox_capacity,
        }
    }
}

/// Output configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Pretty-print snapshots instead of one JSON object per line.
    pub pretty: bool,
}

impl OutputConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(pretty) = lookup("STATECHART_PRETTY") {
            self.pretty = pretty == "1" || pretty.to_lowercase() == "true";
        }
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{}': {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("configuration validation failed: {0}")]
    Validation(String),
}
