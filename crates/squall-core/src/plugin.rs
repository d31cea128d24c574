//! Plugin capability contracts.
//!
//! Squall distinguishes three plugin roles:
//!
//! - [`Transport`]: produces raw byte frames from the outside world and
//!   dispatches each frame to its attached handlers;
//! - [`Handler`]: decodes one frame into zero or more metrics/events and
//!   publishes them onto the appropriate bus;
//! - [`Application`]: subscribes to one or both buses and acts on the
//!   decoded data.
//!
//! Capability discovery is explicit: an application advertises its receive
//! callbacks through [`Application::as_metric_receiver`] and
//! [`Application::as_event_receiver`]; the manager warns about (and drops)
//! applications that advertise neither.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::bus::{EventBus, EventReceiver, MetricBus, MetricReceiver};
use crate::data::{Event, Metric};
use crate::error::{ConfigError, HandlerError};

/// Publishing handle handed to handlers.
///
/// Wraps both buses so a handler can emit whatever its wire dialect carries.
#[derive(Clone)]
pub struct BusPublisher {
    metrics: Arc<MetricBus>,
    events: Arc<EventBus>,
}

impl BusPublisher {
    pub fn new(metrics: Arc<MetricBus>, events: Arc<EventBus>) -> Self {
        Self { metrics, events }
    }

    /// Publish a metric. Never blocks.
    pub fn publish_metric(&self, metric: Metric) {
        self.metrics.publish(metric);
    }

    /// Publish an event. Blocks for the duration of subscriber callbacks
    /// when the event bus is configured blocking.
    pub async fn publish_event(&self, event: Event) {
        self.events.publish(event).await;
    }
}

/// A handler decode failure paired with the handler's name.
#[derive(Debug)]
pub struct HandlerFailure {
    pub handler: String,
    pub error: HandlerError,
}

/// Frame fan-out handle handed to a transport's `run`.
///
/// The manager builds one dispatcher per transport, wired to the handlers
/// attached to it. Handlers run on the transport's task.
pub struct FrameDispatcher {
    handlers: Vec<(String, Arc<dyn Handler>)>,
    bus: BusPublisher,
    errors: Option<mpsc::Sender<HandlerFailure>>,
}

impl FrameDispatcher {
    pub fn new(
        handlers: Vec<(String, Arc<dyn Handler>)>,
        bus: BusPublisher,
        errors: Option<mpsc::Sender<HandlerFailure>>,
    ) -> Self {
        Self {
            handlers,
            bus,
            errors,
        }
    }

    /// Fan one frame out to every attached handler.
    pub async fn dispatch(&self, frame: &[u8]) {
        for (name, handler) in &self.handlers {
            if let Err(error) = handler.handle(frame, &self.bus).await {
                self.report(name, error);
            }
        }
    }

    /// Hand one frame to a single handler by name. Unknown names are
    /// silently ignored, matching broadcast dispatch of a frame no handler
    /// understands.
    pub async fn dispatch_to(&self, handler_name: &str, frame: &[u8]) {
        for (name, handler) in &self.handlers {
            if name == handler_name {
                if let Err(error) = handler.handle(frame, &self.bus).await {
                    self.report(name, error);
                }
                return;
            }
        }
    }

    fn report(&self, handler: &str, error: HandlerError) {
        match &self.errors {
            Some(tx) => {
                let failure = HandlerFailure {
                    handler: handler.to_string(),
                    error,
                };
                if let Err(mpsc::error::TrySendError::Full(failure)) = tx.try_send(failure) {
                    debug!(
                        handler = %failure.handler,
                        error = %failure.error,
                        "handler-error channel full, dropping"
                    );
                }
            }
            None => {
                debug!(handler, error = %error, "handler error discarded, no channel configured");
            }
        }
    }
}

/// Premature-exit signal handed to every plugin's `run`.
///
/// A plugin that cannot continue signals here; the manager treats the first
/// signal as reason to tear the whole process down.
#[derive(Clone)]
pub struct PluginDone {
    plugin: String,
    tx: mpsc::Sender<String>,
}

impl PluginDone {
    pub fn new(plugin: impl Into<String>, tx: mpsc::Sender<String>) -> Self {
        Self {
            plugin: plugin.into(),
            tx,
        }
    }

    /// Notify the manager that this plugin stopped prematurely.
    pub async fn signal(&self) {
        // the receiver is gone once shutdown is already in progress
        let _ = self.tx.send(self.plugin.clone()).await;
    }
}

/// An inbound wire transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Parse the plugin's opaque configuration blob.
    fn configure(&mut self, config: serde_yaml::Value) -> Result<(), ConfigError>;

    /// Produce frames until the shutdown token fires, dispatching each one
    /// through `frames`. Fatal failures signal `done` before returning.
    async fn run(&self, shutdown: CancellationToken, frames: FrameDispatcher, done: PluginDone);

    /// Optional event hook for transports that also forward outbound data.
    fn listen(&self, _event: Event) {}
}

/// A frame decoder.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Parse the plugin's opaque configuration blob.
    fn configure(&mut self, config: serde_yaml::Value) -> Result<(), ConfigError>;

    /// Decode one frame and publish the results.
    ///
    /// Runs on the transport's task: implementations must decode and publish
    /// without blocking for long, or queue their own work.
    async fn handle(&self, frame: &[u8], bus: &BusPublisher) -> Result<(), HandlerError>;
}

/// A sink application fed from the buses.
#[async_trait]
pub trait Application: Send + Sync {
    /// Parse the plugin's opaque configuration blob.
    fn configure(&mut self, config: serde_yaml::Value) -> Result<(), ConfigError>;

    /// Long-running body; returns when the shutdown token fires. Fatal
    /// failures signal `done` before returning.
    async fn run(&self, shutdown: CancellationToken, done: PluginDone);

    /// Advertise the metric receive capability.
    fn as_metric_receiver(self: Arc<Self>) -> Option<Arc<dyn MetricReceiver>> {
        None
    }

    /// Advertise the event receive capability.
    fn as_event_receiver(self: Arc<Self>) -> Option<Arc<dyn EventReceiver>> {
        None
    }
}
