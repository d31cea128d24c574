//! Built-in plugins and the static plugin registry.
//!
//! Squall links its plugins statically: the registry maps plugin names to
//! constructors, and the manager instantiates by name. The capability
//! contracts are unchanged from a dynamically loaded design, so plugins
//! know nothing about how they were discovered.

pub mod application;
pub mod handler;
pub mod transport;

use std::collections::HashMap;

use squall_core::plugin::{Application, Handler, Transport};

type TransportCtor = Box<dyn Fn() -> Box<dyn Transport> + Send + Sync>;
type HandlerCtor = Box<dyn Fn() -> Box<dyn Handler> + Send + Sync>;
type ApplicationCtor = Box<dyn Fn() -> Box<dyn Application> + Send + Sync>;

/// Name → constructor tables for the three plugin roles.
pub struct Registry {
    transports: HashMap<String, TransportCtor>,
    handlers: HashMap<String, HandlerCtor>,
    applications: HashMap<String, ApplicationCtor>,
}

impl Registry {
    /// Registry with no plugins; tests register their own.
    pub fn empty() -> Self {
        Self {
            transports: HashMap::new(),
            handlers: HashMap::new(),
            applications: HashMap::new(),
        }
    }

    /// Registry with every plugin that ships in this binary.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register_transport("socket", || {
            Box::new(transport::socket::SocketTransport::new())
        });
        registry.register_transport("udp", || Box::new(transport::udp::UdpTransport::new()));
        registry.register_handler("metrics-line", || {
            Box::new(handler::metrics_line::MetricsLineHandler::new())
        });
        registry.register_handler("events-json", || {
            Box::new(handler::events_json::EventsJsonHandler::new())
        });
        registry.register_application("prometheus", || {
            Box::new(application::prometheus::PrometheusSink::new())
        });
        registry.register_application("print", || {
            Box::new(application::print::PrintApp::new())
        });
        registry
    }

    pub fn register_transport(
        &mut self,
        name: impl Into<String>,
        ctor: impl Fn() -> Box<dyn Transport> + Send + Sync + 'static,
    ) {
        self.transports.insert(name.into(), Box::new(ctor));
    }

    pub fn register_handler(
        &mut self,
        name: impl Into<String>,
        ctor: impl Fn() -> Box<dyn Handler> + Send + Sync + 'static,
    ) {
        self.handlers.insert(name.into(), Box::new(ctor));
    }

    pub fn register_application(
        &mut self,
        name: impl Into<String>,
        ctor: impl Fn() -> Box<dyn Application> + Send + Sync + 'static,
    ) {
        self.applications.insert(name.into(), Box::new(ctor));
    }

    /// Instantiate a transport by name.
    pub fn new_transport(&self, name: &str) -> Option<Box<dyn Transport>> {
        self.transports.get(name).map(|ctor| ctor())
    }

    /// Instantiate a handler by name.
    pub fn new_handler(&self, name: &str) -> Option<Box<dyn Handler>> {
        self.handlers.get(name).map(|ctor| ctor())
    }

    /// Instantiate an application by name.
    pub fn new_application(&self, name: &str) -> Option<Box<dyn Application>> {
        self.applications.get(name).map(|ctor| ctor())
    }
}
