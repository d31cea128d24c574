//! Plugin lifecycle management and wiring.
//!
//! The manager owns the buses, the shutdown token, and every plugin
//! instance. Wiring happens before anything runs: transports are bound to
//! their handlers, applications are subscribed to the buses according to
//! the capabilities they advertise. Once running, the manager supervises
//! all plugin tasks and tears everything down on the first of: an OS
//! shutdown signal, or any plugin signalling premature exit.

use std::sync::Arc;

use snafu::ResultExt;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use squall_core::bus::{EventBus, EventReceiver, MetricBus};
use squall_core::data::Event;
use squall_core::plugin::{
    Application, BusPublisher, FrameDispatcher, Handler, HandlerFailure, PluginDone, Transport,
};
use squall_core::signal::shutdown_signal;
use squall_core::DEFAULT_QUEUE_DEPTH;

use crate::config::HandlerConfig;
use crate::error::{
    AppNotReceiverSnafu, DuplicateTransportSnafu, PluginConfigSnafu, PluginError,
    TransportNotInitializedSnafu, UnknownApplicationSnafu, UnknownHandlerSnafu,
    UnknownTransportSnafu,
};
use crate::plugins::Registry;

/// Capacity of the plugin-done channel; sized so several plugins failing at
/// once never block each other.
const PLUGIN_DONE_CAPACITY: usize = 16;

/// Knobs threaded in from the configuration file.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Deliver events inline instead of through bounded queues.
    pub block_event_bus: bool,
    /// Capacity of the handler-error channel; zero discards errors.
    pub handler_error_capacity: usize,
    /// Per-subscriber queue depth for buffered bus delivery.
    pub queue_depth: usize,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            block_event_bus: false,
            handler_error_capacity: 0,
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

struct TransportBinding {
    name: String,
    transport: Arc<dyn Transport>,
    handlers: Vec<(String, Arc<dyn Handler>)>,
}

struct AppBinding {
    name: String,
    app: Arc<dyn Application>,
}

/// Adapter feeding bus events into a transport's optional `listen` hook.
struct TransportListener {
    transport: Arc<dyn Transport>,
}

#[async_trait::async_trait]
impl EventReceiver for TransportListener {
    async fn receive_event(&self, event: Event) {
        self.transport.listen(event);
    }
}

/// Owns plugin lifecycles and the bus fabric.
pub struct Manager {
    registry: Registry,
    metric_bus: Arc<MetricBus>,
    event_bus: Arc<EventBus>,
    shutdown: CancellationToken,
    tasks: JoinSet<()>,
    forwarders: Vec<JoinHandle<()>>,
    transports: Vec<TransportBinding>,
    applications: Vec<AppBinding>,
    handler_errors: Option<mpsc::Sender<HandlerFailure>>,
    handler_error_rx: Option<mpsc::Receiver<HandlerFailure>>,
    done_tx: mpsc::Sender<String>,
    done_rx: Option<mpsc::Receiver<String>>,
}

impl Manager {
    pub fn new(registry: Registry, options: ManagerOptions) -> Self {
        let (handler_errors, handler_error_rx) = if options.handler_error_capacity > 0 {
            let (tx, rx) = mpsc::channel(options.handler_error_capacity);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let (done_tx, done_rx) = mpsc::channel(PLUGIN_DONE_CAPACITY);

        Self {
            registry,
            metric_bus: Arc::new(MetricBus::new(options.queue_depth)),
            event_bus: Arc::new(EventBus::new(options.block_event_bus, options.queue_depth)),
            shutdown: CancellationToken::new(),
            tasks: JoinSet::new(),
            forwarders: Vec::new(),
            transports: Vec::new(),
            applications: Vec::new(),
            handler_errors,
            handler_error_rx,
            done_tx,
            done_rx: Some(done_rx),
        }
    }

    /// Token cancelled when shutdown begins. Cancelling it externally also
    /// shuts the manager down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Number of transports that survived init.
    pub fn transport_count(&self) -> usize {
        self.transports.len()
    }

    /// Take the receiving end of the handler-error channel, if configured.
    pub fn take_handler_failures(&mut self) -> Option<mpsc::Receiver<HandlerFailure>> {
        self.handler_error_rx.take()
    }

    /// Instantiate and configure a transport, registering it under `name`.
    pub fn init_transport(
        &mut self,
        name: &str,
        config: serde_yaml::Value,
    ) -> Result<(), PluginError> {
        if self.transports.iter().any(|t| t.name == name) {
            return DuplicateTransportSnafu { plugin: name }.fail();
        }

        let mut transport = self
            .registry
            .new_transport(name)
            .ok_or_else(|| UnknownTransportSnafu { plugin: name }.build())?;
        transport
            .configure(config)
            .context(PluginConfigSnafu { plugin: name })?;

        self.transports.push(TransportBinding {
            name: name.to_string(),
            transport: Arc::from(transport),
            handlers: Vec::new(),
        });
        Ok(())
    }

    /// Instantiate and configure handlers, attaching them as dispatch
    /// targets of an initialized transport.
    pub fn set_transport_handlers(
        &mut self,
        transport_name: &str,
        handlers: &[HandlerConfig],
    ) -> Result<(), PluginError> {
        let mut bound = Vec::with_capacity(handlers.len());
        for descriptor in handlers {
            let mut handler = self
                .registry
                .new_handler(&descriptor.name)
                .ok_or_else(|| {
                    UnknownHandlerSnafu {
                        plugin: descriptor.name.clone(),
                    }
                    .build()
                })?;
            handler.configure(descriptor.config.clone()).context(
                PluginConfigSnafu {
                    plugin: descriptor.name.clone(),
                },
            )?;
            bound.push((descriptor.name.clone(), Arc::from(handler)));
        }

        let binding = self
            .transports
            .iter_mut()
            .find(|t| t.name == transport_name)
            .ok_or_else(|| {
                TransportNotInitializedSnafu {
                    plugin: transport_name,
                }
                .build()
            })?;
        binding.handlers.extend(bound);
        Ok(())
    }

    /// Instantiate and configure an application, subscribing it to the buses
    /// according to the capabilities it advertises.
    ///
    /// Returns [`PluginError::AppNotReceiver`] (a warning, not a failure)
    /// when the application advertises neither receive capability; the
    /// instance is discarded in that case.
    pub fn init_application(
        &mut self,
        name: &str,
        config: serde_yaml::Value,
    ) -> Result<(), PluginError> {
        let mut app = self
            .registry
            .new_application(name)
            .ok_or_else(|| UnknownApplicationSnafu { plugin: name }.build())?;
        app.configure(config)
            .context(PluginConfigSnafu { plugin: name })?;
        let app: Arc<dyn Application> = Arc::from(app);

        let metric_receiver = app.clone().as_metric_receiver();
        let event_receiver = app.clone().as_event_receiver();
        if metric_receiver.is_none() && event_receiver.is_none() {
            return AppNotReceiverSnafu { application: name }.fail();
        }

        if let Some(receiver) = metric_receiver {
            self.forwarders
                .push(self.metric_bus.subscribe(receiver, self.shutdown.clone()));
        }
        if let Some(receiver) = event_receiver {
            if let Some(task) = self.event_bus.subscribe(receiver, self.shutdown.clone()) {
                self.forwarders.push(task);
            }
        }

        self.applications.push(AppBinding {
            name: name.to_string(),
            app,
        });
        Ok(())
    }

    /// Spawn every transport's `run` with a dispatcher fanning frames to its
    /// attached handlers, and wire the transport's `listen` hook to the
    /// event bus.
    pub fn run_transports(&mut self) {
        let publisher = BusPublisher::new(self.metric_bus.clone(), self.event_bus.clone());

        for binding in &self.transports {
            let dispatcher = FrameDispatcher::new(
                binding.handlers.clone(),
                publisher.clone(),
                self.handler_errors.clone(),
            );
            let done = PluginDone::new(binding.name.clone(), self.done_tx.clone());
            let listener = Arc::new(TransportListener {
                transport: binding.transport.clone(),
            });
            if let Some(task) = self.event_bus.subscribe(listener, self.shutdown.clone()) {
                self.forwarders.push(task);
            }

            let transport = binding.transport.clone();
            let name = binding.name.clone();
            let shutdown = self.shutdown.clone();
            info!(transport = %name, "starting transport");
            self.tasks.spawn(async move {
                transport.run(shutdown, dispatcher, done).await;
                info!(transport = %name, "transport exited");
            });
        }
    }

    /// Spawn every application's `run`.
    pub fn run_applications(&mut self) {
        for binding in &self.applications {
            let done = PluginDone::new(binding.name.clone(), self.done_tx.clone());
            let app = binding.app.clone();
            let name = binding.name.clone();
            let shutdown = self.shutdown.clone();
            info!(application = %name, "starting application");
            self.tasks.spawn(async move {
                app.run(shutdown, done).await;
                info!(application = %name, "application exited");
            });
        }
    }

    /// Block until a shutdown signal arrives or any plugin exits
    /// prematurely, then cancel the shutdown token and join every plugin
    /// task. Plugins are trusted to respect cancellation; there is no
    /// per-plugin timeout.
    pub async fn run_until_shutdown(mut self) {
        let mut done_rx = self
            .done_rx
            .take()
            .expect("run_until_shutdown called twice");

        tokio::select! {
            _ = shutdown_signal() => {
                info!("shutdown signal received");
            }
            plugin = done_rx.recv() => {
                if let Some(plugin) = plugin {
                    warn!(plugin = %plugin, "plugin exited prematurely, shutting down");
                }
            }
            _ = self.shutdown.cancelled() => {}
        }

        self.shutdown.cancel();

        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "plugin task panicked");
            }
        }
        for forwarder in self.forwarders.drain(..) {
            let _ = forwarder.await;
        }
        info!("squall exited cleanly");
    }
}
