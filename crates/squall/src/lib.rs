//! Squall: pluggable telemetry router.
//!
//! This crate handles:
//! - Loading the YAML configuration and wiring plugins from it
//! - Managing plugin lifecycles (transports, handlers, applications)
//! - Fanning decoded metrics and events out over the in-process buses
//! - Exposing the Prometheus scrape sink and the other built-in plugins

pub mod config;
pub mod error;
pub mod manager;
pub mod plugins;

// Re-export commonly used items
pub use config::Config;
pub use error::PluginError;
pub use manager::{Manager, ManagerOptions};
pub use plugins::Registry;

// Re-export from squall-core
pub use squall_core::{
    Application, BusPublisher, Event, EventBus, EventSeverity, EventType, FrameDispatcher,
    Handler, HandlerFailure, Metric, MetricBus, MetricType, PluginDone, Transport,
};
