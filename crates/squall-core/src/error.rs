//! Common error types shared between squall-core and the host binary.

use snafu::prelude::*;

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Required fields are missing or carry invalid values.
    #[snafu(display("missing or incorrect configuration fields -- {fields} --"))]
    InvalidFields { fields: String },
}

/// Per-frame decode failures raised by handler plugins.
///
/// Handler errors are never fatal; the manager forwards them to the
/// handler-error channel (or drops them when it is full or unconfigured).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum HandlerError {
    /// Frame does not match the handler's wire format.
    #[snafu(display("malformed frame: {message}"))]
    Malformed { message: String },

    /// Frame is not valid UTF-8.
    #[snafu(display("frame is not valid UTF-8"))]
    FrameUtf8 { source: std::str::Utf8Error },

    /// Frame is not a valid JSON document of the expected shape.
    #[snafu(display("failed to decode JSON payload"))]
    Json { source: serde_json::Error },
}
