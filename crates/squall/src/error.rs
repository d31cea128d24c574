//! Error types for the squall host binary.

use snafu::prelude::*;

// Re-export common errors
pub use squall_core::error::{ConfigError, HandlerError};

/// Errors raised while loading and wiring plugins.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PluginError {
    /// No transport plugin registered under this name.
    #[snafu(display("unknown transport plugin '{plugin}'"))]
    UnknownTransport { plugin: String },

    /// No handler plugin registered under this name.
    #[snafu(display("unknown handler plugin '{plugin}'"))]
    UnknownHandler { plugin: String },

    /// No application plugin registered under this name.
    #[snafu(display("unknown application plugin '{plugin}'"))]
    UnknownApplication { plugin: String },

    /// A transport instance with this name already exists.
    #[snafu(display("transport '{plugin}' is already registered"))]
    DuplicateTransport { plugin: String },

    /// Handlers were attached to a transport that was never initialized.
    #[snafu(display("transport '{plugin}' has not been initialized"))]
    TransportNotInitialized { plugin: String },

    /// The plugin rejected its configuration blob.
    #[snafu(display("failed configuring plugin '{plugin}': {source}"))]
    PluginConfig {
        plugin: String,
        source: ConfigError,
    },

    /// The application advertises no receive capability. Non-fatal: the
    /// caller logs a warning and the plugin is discarded.
    #[snafu(display("application '{application}' subscribes to neither bus"))]
    AppNotReceiver { application: String },
}

impl PluginError {
    /// Whether this error is the non-fatal "subscribes to nothing" warning.
    pub fn is_not_receiver(&self) -> bool {
        matches!(self, PluginError::AppNotReceiver { .. })
    }
}
