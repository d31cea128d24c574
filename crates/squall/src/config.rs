//! Squall configuration schema and loading.
//!
//! The file is YAML with camelCase keys; plugin `config` blobs are opaque
//! here and re-parsed by the plugin that owns them. Environment variables
//! are interpolated before parsing (see `squall_core::config`).

use std::path::{Path, PathBuf};

use serde::Deserialize;

use squall_core::config::load_yaml_file;
use squall_core::error::ConfigError;

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

/// Log verbosity threshold, seeded into the tracing filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

/// Top-level configuration for the squall binary.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Plugin directory. Squall links its plugins statically, so this is
    /// informational only, but the field stays required for compatibility
    /// with deployments that template it.
    pub plugin_dir: PathBuf,

    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    /// Deliver events to subscribers inline instead of through bounded
    /// queues. Lossless and ordered, at the cost of blocking publishers.
    #[serde(default)]
    pub block_event_bus: bool,

    /// Capacity of the handler-error channel. Zero discards handler errors.
    #[serde(default)]
    pub handler_errors: usize,

    pub transports: Vec<TransportConfig>,

    #[serde(default)]
    pub applications: Vec<ApplicationConfig>,
}

/// One transport instance plus the handlers attached to it.
#[derive(Debug, Deserialize)]
pub struct TransportConfig {
    pub name: String,
    #[serde(default)]
    pub config: serde_yaml::Value,
    #[serde(default)]
    pub handlers: Vec<HandlerConfig>,
}

/// One handler attached to a transport.
#[derive(Debug, Deserialize)]
pub struct HandlerConfig {
    pub name: String,
    #[serde(default)]
    pub config: serde_yaml::Value,
}

/// One application instance.
#[derive(Debug, Deserialize)]
pub struct ApplicationConfig {
    pub name: String,
    #[serde(default)]
    pub config: serde_yaml::Value,
}

impl Config {
    /// Load, interpolate, and parse the configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        load_yaml_file(path)
    }
}
