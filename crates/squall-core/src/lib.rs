//! squall-core: Shared components for the squall telemetry router.
//!
//! This crate contains everything a plugin author needs and nothing that is
//! specific to the host binary:
//!
//! - `data` - Metric and event value types shared by all plugins
//! - `bus` - In-process broadcast buses (metrics, events)
//! - `plugin` - Transport / Handler / Application capability contracts
//! - `expiry` - Generic periodic reaper for expirable state
//! - `config` - YAML parsing helpers and environment variable interpolation
//! - `signal` - Signal handling for graceful shutdown
//! - `error` - Common error types

pub mod bus;
pub mod config;
pub mod data;
pub mod error;
pub mod expiry;
pub mod plugin;
pub mod signal;

// Re-export commonly used items
pub use bus::{EventBus, EventReceiver, MetricBus, MetricReceiver, DEFAULT_QUEUE_DEPTH};
pub use config::{interpolate, load_yaml_file, parse_plugin_config, InterpolationResult};
pub use data::{Event, EventSeverity, EventType, Metric, MetricType};
pub use error::{ConfigError, HandlerError};
pub use expiry::{Expirable, ExpiryProc};
pub use plugin::{
    Application, BusPublisher, FrameDispatcher, Handler, HandlerFailure, PluginDone, Transport,
};
pub use signal::shutdown_signal;
