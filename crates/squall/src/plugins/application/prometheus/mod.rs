//! Prometheus scrape sink.
//!
//! Turns the continuous metric stream into a consistent, scrapeable
//! snapshot. Series are grouped by label dimensionality into collectors,
//! deduplicated by `(name, label values)`, and garbage-collected when they
//! have been idle for `interval * expirationMultiple` *and* at least one
//! scrape has observed them. Empty collectors are reaped on a fixed 10 s
//! tick.
//!
//! One expiry reaper runs per unique metric interval; a series' reaper
//! ticks at `interval * expirationMultiple`. The collectors map doubles as
//! the exporter registry: a collector is scrapeable exactly while present.

mod collector;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Router};
use prometheus::{proto, Encoder, TextEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use squall_core::bus::MetricReceiver;
use squall_core::config::parse_plugin_config;
use squall_core::data::Metric;
use squall_core::error::ConfigError;
use squall_core::expiry::{Expirable, ExpiryProc};
use squall_core::plugin::{Application, PluginDone};

use collector::SeriesCollector;

/// Fixed tick of the collector reaper.
const COLLECTOR_EXPIRY_TICK: Duration = Duration::from_secs(10);

/// Bound on graceful HTTP shutdown.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

const INDEX_BODY: &str = "<html>\
    <head><title>Squall Exporter</title></head>\
    <body>\
    <h1>Squall Exporter</h1>\
    <p><a href='/metrics'>Metrics</a></p>\
    </body>\
    </html>";

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_expiration_multiple() -> u32 {
    2
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default)]
    port: u16,
    /// Append the observed timestamp to series whose time is known.
    #[serde(default)]
    with_timestamp: bool,
    /// Multiple of a metric's interval after which an idle series expires.
    #[serde(default = "default_expiration_multiple")]
    expiration_multiple: u32,
}

impl Default for PromConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: 0,
            with_timestamp: false,
            expiration_multiple: default_expiration_multiple(),
        }
    }
}

struct SinkState {
    /// Collectors keyed by label dimensionality.
    collectors: HashMap<usize, Arc<SeriesCollector>>,
    /// Expiry reapers keyed by metric interval.
    reapers: HashMap<Duration, Arc<ExpiryProc>>,
}

/// Internals shared between receive callbacks, reapers, and HTTP handlers.
struct SinkShared {
    with_timestamp: bool,
    expiration_multiple: u32,
    state: Arc<Mutex<SinkState>>,
    collector_reaper: Arc<ExpiryProc>,
    /// Sink-local token; reapers spawned from the ingest path hang off it,
    /// and `run` ties it to the process-wide shutdown.
    shutdown: CancellationToken,
}

impl SinkShared {
    fn new(with_timestamp: bool, expiration_multiple: u32, collector_tick: Duration) -> Self {
        Self {
            with_timestamp,
            expiration_multiple,
            state: Arc::new(Mutex::new(SinkState {
                collectors: HashMap::new(),
                reapers: HashMap::new(),
            })),
            collector_reaper: Arc::new(ExpiryProc::new(collector_tick)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Ingest one metric.
    ///
    /// The sink-wide lock is held for the whole update so a collector is
    /// never publicly visible without its expiry registration, and so
    /// reaper startup is race-free.
    fn ingest(&self, metric: Metric) {
        let dimensions = metric.dimensions();
        let mut state = self.state.lock().expect("sink state lock poisoned");

        let collector = match state.collectors.get(&dimensions) {
            Some(collector) => collector.clone(),
            None => {
                let collector = Arc::new(SeriesCollector::new(dimensions, self.with_timestamp));
                state.collectors.insert(dimensions, collector.clone());
                self.collector_reaper.register(Arc::new(CollectorExpiry {
                    collector: collector.clone(),
                    state: Arc::downgrade(&self.state),
                }));
                info!(dimensions, "registered collector for new label dimensionality");
                collector
            }
        };

        let reaper = match state.reapers.get(&metric.interval) {
            Some(reaper) => reaper.clone(),
            None => {
                let reaper = Arc::new(ExpiryProc::new(
                    metric.interval * self.expiration_multiple,
                ));
                state.reapers.insert(metric.interval, reaper.clone());
                info!(
                    interval = ?metric.interval,
                    "starting expiry reaper for new metric interval"
                );
                let shutdown = self.shutdown.clone();
                let task = reaper.clone();
                tokio::spawn(async move { task.run(shutdown).await });
                reaper
            }
        };

        collector.update(&metric, &reaper);
    }

    /// Snapshot every live series as exposition families, merged by metric
    /// name across collectors, in deterministic name order.
    fn gather(&self) -> Vec<proto::MetricFamily> {
        let collectors: Vec<Arc<SeriesCollector>> = {
            let state = self.state.lock().expect("sink state lock poisoned");
            state.collectors.values().cloned().collect()
        };

        let mut families = BTreeMap::new();
        for collector in collectors {
            collector.collect_into(&mut families);
        }
        families.into_values().collect()
    }

    fn clear_collectors(&self) {
        self.state
            .lock()
            .expect("sink state lock poisoned")
            .collectors
            .clear();
    }
}

/// Reaps a collector once it holds no series.
struct CollectorExpiry {
    collector: Arc<SeriesCollector>,
    state: Weak<Mutex<SinkState>>,
}

impl Expirable for CollectorExpiry {
    fn expired(&self, _tick: Duration) -> bool {
        self.collector.is_empty()
    }

    fn delete(&self) -> bool {
        let Some(state) = self.state.upgrade() else {
            return true;
        };
        let mut state = state.lock().expect("sink state lock poisoned");

        // a series may have arrived between the emptiness check and now
        if !self.collector.is_empty() {
            return false;
        }

        let dimensions = self.collector.dimensions();
        if let Some(current) = state.collectors.get(&dimensions) {
            if Arc::ptr_eq(current, &self.collector) {
                state.collectors.remove(&dimensions);
                warn!(dimensions, "collector expired, unregistering");
            }
        }
        true
    }
}

/// The scrape sink application.
pub struct PrometheusSink {
    conf: PromConfig,
    shared: Arc<SinkShared>,
}

impl PrometheusSink {
    pub fn new() -> Self {
        let conf = PromConfig::default();
        let shared = Arc::new(SinkShared::new(
            conf.with_timestamp,
            conf.expiration_multiple,
            COLLECTOR_EXPIRY_TICK,
        ));
        Self { conf, shared }
    }
}

impl Default for PrometheusSink {
    fn default() -> Self {
        Self::new()
    }
}

async fn metrics_handler(Extension(shared): Extension<Arc<SinkShared>>) -> Response {
    let families = shared.gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    match encoder.encode(&families, &mut buffer) {
        Ok(()) => (
            [(header::CONTENT_TYPE, encoder.format_type().to_string())],
            buffer,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "failed to encode scrape response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_BODY)
}

#[async_trait]
impl Application for PrometheusSink {
    fn configure(&mut self, config: serde_yaml::Value) -> Result<(), ConfigError> {
        let conf: PromConfig = parse_plugin_config(config)?;
        if conf.port == 0 {
            return Err(ConfigError::InvalidFields {
                fields: "port".into(),
            });
        }
        // a zero multiple would give the per-interval reapers a zero tick
        if conf.expiration_multiple == 0 {
            return Err(ConfigError::InvalidFields {
                fields: "expirationMultiple".into(),
            });
        }
        self.shared = Arc::new(SinkShared::new(
            conf.with_timestamp,
            conf.expiration_multiple,
            COLLECTOR_EXPIRY_TICK,
        ));
        self.conf = conf;
        Ok(())
    }

    async fn run(&self, shutdown: CancellationToken, done: PluginDone) {
        let shared = self.shared.clone();
        let token = shared.shutdown.clone();

        // tie the sink-local token to the process-wide shutdown
        tokio::spawn({
            let outer = shutdown.clone();
            let token = token.clone();
            async move {
                outer.cancelled().await;
                token.cancel();
            }
        });

        let addr = format!("{}:{}", self.conf.host, self.conf.port);
        let listener = match TcpListener::bind(addr.as_str()).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(addr = %addr, error = %e, "failed to bind scrape endpoint");
                done.signal().await;
                return;
            }
        };
        info!(addr = %addr, "metric scrape endpoint listening");

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/", get(index_handler))
            .layer(Extension(shared.clone()));

        let mut server = tokio::spawn({
            let graceful = token.clone();
            async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move { graceful.cancelled().await })
                    .await
            }
        });

        let reaper = tokio::spawn({
            let reaper = shared.collector_reaper.clone();
            let token = token.clone();
            async move { reaper.run(token).await }
        });

        tokio::select! {
            result = &mut server => {
                match result {
                    Ok(Err(e)) => error!(error = %e, "metric scrape endpoint failed"),
                    Ok(Ok(())) => warn!("metric scrape endpoint closed unexpectedly"),
                    Err(e) => error!(error = %e, "metric scrape endpoint panicked"),
                }
                token.cancel();
                done.signal().await;
            }
            _ = token.cancelled() => {
                shared.clear_collectors();
                if tokio::time::timeout(SHUTDOWN_DEADLINE, &mut server).await.is_err() {
                    error!("timed out shutting down scrape endpoint");
                    server.abort();
                }
            }
        }

        let _ = reaper.await;
        info!("prometheus sink exited");
    }

    fn as_metric_receiver(self: Arc<Self>) -> Option<Arc<dyn MetricReceiver>> {
        Some(self)
    }
}

#[async_trait]
impl MetricReceiver for PrometheusSink {
    async fn receive_metric(&self, metric: Metric) {
        self.shared.ingest(metric);
    }
}
