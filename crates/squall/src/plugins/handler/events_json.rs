//! JSON event handler.
//!
//! Decodes one JSON event document per frame and publishes it on the event
//! bus. The document shape mirrors [`squall_core::data::Event`]:
//!
//! ```json
//! {
//!   "index": "collectd_alerts",
//!   "type": "alert",
//!   "publisher": "node-3",
//!   "severity": "critical",
//!   "message": "disk usage above threshold",
//!   "labels": {"host": "node-3"},
//!   "annotations": {"threshold": 0.9}
//! }
//! ```

use async_trait::async_trait;

use squall_core::data::Event;
use squall_core::error::{ConfigError, HandlerError};
use squall_core::plugin::{BusPublisher, Handler};

pub struct EventsJsonHandler;

impl EventsJsonHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EventsJsonHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for EventsJsonHandler {
    fn configure(&mut self, _config: serde_yaml::Value) -> Result<(), ConfigError> {
        Ok(())
    }

    async fn handle(&self, frame: &[u8], bus: &BusPublisher) -> Result<(), HandlerError> {
        let event: Event =
            serde_json::from_slice(frame).map_err(|source| HandlerError::Json { source })?;
        bus.publish_event(event).await;
        Ok(())
    }
}
