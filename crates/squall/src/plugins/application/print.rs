//! Debug sink that appends decoded data to files as JSON.
//!
//! Useful for watching both buses during bring-up. Receive callbacks hand
//! payloads to short bounded queues so bus delivery stays decoupled from
//! file I/O; the `run` body owns the files.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use squall_core::bus::{EventReceiver, MetricReceiver};
use squall_core::config::parse_plugin_config;
use squall_core::data::{Event, Metric};
use squall_core::error::ConfigError;
use squall_core::plugin::{Application, PluginDone};

const QUEUE_DEPTH: usize = 5;

fn default_output() -> String {
    "/dev/stdout".to_string()
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrintConfig {
    #[serde(default = "default_output")]
    metric_output: String,
    #[serde(default = "default_output")]
    events_output: String,
}

impl Default for PrintConfig {
    fn default() -> Self {
        Self {
            metric_output: default_output(),
            events_output: default_output(),
        }
    }
}

pub struct PrintApp {
    conf: PrintConfig,
    metrics_tx: mpsc::Sender<Metric>,
    events_tx: mpsc::Sender<Event>,
    metrics_rx: Mutex<Option<mpsc::Receiver<Metric>>>,
    events_rx: Mutex<Option<mpsc::Receiver<Event>>>,
}

impl PrintApp {
    pub fn new() -> Self {
        let (metrics_tx, metrics_rx) = mpsc::channel(QUEUE_DEPTH);
        let (events_tx, events_rx) = mpsc::channel(QUEUE_DEPTH);
        Self {
            conf: PrintConfig::default(),
            metrics_tx,
            events_tx,
            metrics_rx: Mutex::new(Some(metrics_rx)),
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    async fn open_output(path: &str) -> std::io::Result<tokio::fs::File> {
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
    }

    async fn write_json<T: serde::Serialize>(file: &mut tokio::fs::File, record: &T) {
        match serde_json::to_string_pretty(record) {
            Ok(encoded) => {
                if let Err(e) = file.write_all(format!("{encoded}\n").as_bytes()).await {
                    error!(error = %e, "failed writing record to output file");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize record"),
        }
    }
}

impl Default for PrintApp {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Application for PrintApp {
    fn configure(&mut self, config: serde_yaml::Value) -> Result<(), ConfigError> {
        self.conf = parse_plugin_config(config)?;
        Ok(())
    }

    async fn run(&self, shutdown: CancellationToken, _done: PluginDone) {
        let mut metrics_rx = match self.metrics_rx.lock().unwrap().take() {
            Some(rx) => rx,
            None => return,
        };
        let mut events_rx = match self.events_rx.lock().unwrap().take() {
            Some(rx) => rx,
            None => return,
        };

        let mut metrics_file = match Self::open_output(&self.conf.metric_output).await {
            Ok(file) => file,
            Err(e) => {
                error!(path = %self.conf.metric_output, error = %e, "failed to open metrics output file");
                return;
            }
        };
        let mut events_file = match Self::open_output(&self.conf.events_output).await {
            Ok(file) => file,
            Err(e) => {
                error!(path = %self.conf.events_output, error = %e, "failed to open events output file");
                return;
            }
        };

        info!(
            metrics = %self.conf.metric_output,
            events = %self.conf.events_output,
            "writing processed data to files"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(metric) = metrics_rx.recv() => {
                    Self::write_json(&mut metrics_file, &metric).await;
                }
                Some(event) = events_rx.recv() => {
                    Self::write_json(&mut events_file, &event).await;
                }
            }
        }
    }

    fn as_metric_receiver(self: Arc<Self>) -> Option<Arc<dyn MetricReceiver>> {
        Some(self)
    }

    fn as_event_receiver(self: Arc<Self>) -> Option<Arc<dyn EventReceiver>> {
        Some(self)
    }
}

#[async_trait]
impl MetricReceiver for PrintApp {
    async fn receive_metric(&self, metric: Metric) {
        let _ = self.metrics_tx.send(metric).await;
    }
}

#[async_trait]
impl EventReceiver for PrintApp {
    async fn receive_event(&self, event: Event) {
        let _ = self.events_tx.send(event).await;
    }
}
