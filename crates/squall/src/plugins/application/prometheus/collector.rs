//! Per-dimensionality series collectors.
//!
//! All series sharing one label-key count live in one collector; series
//! with differing dimensionality must live in different collectors because
//! one exposition descriptor cannot mix differing label sets. Within a
//! collector, series are cached by `(name, label values)` and mutated in
//! place on every update.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use prometheus::proto;
use tracing::{debug, error, warn};

use squall_core::data::{Metric, MetricType};
use squall_core::expiry::{Expirable, ExpiryProc};

/// Separator byte that cannot appear in metric names or label values.
const CACHE_KEY_SEPARATOR: char = '\u{1f}';

pub(super) fn prom_type(metric_type: MetricType) -> proto::MetricType {
    match metric_type {
        MetricType::Counter => proto::MetricType::COUNTER,
        MetricType::Gauge => proto::MetricType::GAUGE,
        MetricType::Untyped => proto::MetricType::UNTYPED,
    }
}

/// Mutable slice of a series entry; overwritten on every update.
#[derive(Clone, Copy)]
struct SeriesState {
    time: f64,
    metric_type: MetricType,
    value: f64,
}

/// One live series: fixed identity plus the latest observation.
pub(super) struct SeriesEntry {
    name: String,
    label_keys: Vec<String>,
    label_vals: Vec<String>,
    state: RwLock<SeriesState>,
    /// Set by the first scrape that observes this series; gates expiry so a
    /// short-lived series is visible to at least one scrape.
    scraped: AtomicBool,
    expiry: Arc<SeriesExpiry>,
}

impl SeriesEntry {
    fn store(&self, metric: &Metric) {
        let mut state = self.state.write().expect("series state lock poisoned");
        state.time = metric.time;
        state.metric_type = metric.metric_type;
        state.value = metric.value;
    }
}

/// Expiry record for one series. Each record carries its own identifying
/// tuple (name, interval, cache key) so concurrent series never alias.
pub(super) struct SeriesExpiry {
    series: Weak<DashMap<String, Arc<SeriesEntry>>>,
    key: String,
    name: String,
    interval: Duration,
    last_arrival: RwLock<Instant>,
}

impl SeriesExpiry {
    fn keep_alive(&self) {
        *self
            .last_arrival
            .write()
            .expect("series expiry lock poisoned") = Instant::now();
    }
}

impl Expirable for SeriesExpiry {
    fn expired(&self, tick: Duration) -> bool {
        self.last_arrival
            .read()
            .expect("series expiry lock poisoned")
            .elapsed()
            >= tick
    }

    fn delete(&self) -> bool {
        let Some(series) = self.series.upgrade() else {
            // collector is gone; nothing left to guard
            return true;
        };

        if series
            .remove_if(&self.key, |_, entry| entry.scraped.load(Ordering::Acquire))
            .is_some()
        {
            debug!(
                metric = %self.name,
                interval = ?self.interval,
                "series expired after stale period"
            );
            return true;
        }

        if series.contains_key(&self.key) {
            // still unscraped; retry on the next tick
            false
        } else {
            warn!(metric = %self.name, "series missing from cache");
            true
        }
    }
}

/// All series of one label dimensionality.
pub(super) struct SeriesCollector {
    dimensions: usize,
    with_timestamp: bool,
    series: Arc<DashMap<String, Arc<SeriesEntry>>>,
}

impl SeriesCollector {
    pub(super) fn new(dimensions: usize, with_timestamp: bool) -> Self {
        Self {
            dimensions,
            with_timestamp,
            series: Arc::new(DashMap::new()),
        }
    }

    pub(super) fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub(super) fn len(&self) -> usize {
        self.series.len()
    }

    pub(super) fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    fn cache_key(name: &str, label_vals: &[String]) -> String {
        let capacity = name.len() + label_vals.iter().map(|v| v.len() + 1).sum::<usize>();
        let mut key = String::with_capacity(capacity);
        key.push_str(name);
        for val in label_vals {
            key.push(CACHE_KEY_SEPARATOR);
            key.push_str(val);
        }
        key
    }

    /// Load-or-store the series entry for this metric. New entries register
    /// their expiry with `reaper` before becoming visible; existing entries
    /// only overwrite time, type and value.
    pub(super) fn update(&self, metric: &Metric, reaper: &ExpiryProc) {
        let key = Self::cache_key(&metric.name, &metric.label_vals);

        if let Some(entry) = self.series.get(&key) {
            entry.store(metric);
            entry.expiry.keep_alive();
            return;
        }

        match self.series.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => {
                // lost the creation race; treat as a plain update
                occupied.get().store(metric);
                occupied.get().expiry.keep_alive();
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let expiry = Arc::new(SeriesExpiry {
                    series: Arc::downgrade(&self.series),
                    key,
                    name: metric.name.clone(),
                    interval: metric.interval,
                    last_arrival: RwLock::new(Instant::now()),
                });
                let entry = Arc::new(SeriesEntry {
                    name: metric.name.clone(),
                    label_keys: metric.label_keys.clone(),
                    label_vals: metric.label_vals.clone(),
                    state: RwLock::new(SeriesState {
                        time: metric.time,
                        metric_type: metric.metric_type,
                        value: metric.value,
                    }),
                    scraped: AtomicBool::new(false),
                    expiry: expiry.clone(),
                });
                reaper.register(expiry);
                vacant.insert(entry);
            }
        }
    }

    /// Stream every live series into `families`, keyed and merged by metric
    /// name, marking each one as scraped.
    pub(super) fn collect_into(&self, families: &mut BTreeMap<String, proto::MetricFamily>) {
        for item in self.series.iter() {
            let entry = item.value();
            entry.scraped.store(true, Ordering::Release);

            if entry.label_vals.len() != self.dimensions {
                error!(
                    metric = %entry.name,
                    dimensions = self.dimensions,
                    labels = entry.label_vals.len(),
                    "label arity mismatch, omitting series from scrape"
                );
                continue;
            }

            let snapshot = *entry.state.read().expect("series state lock poisoned");

            let family = families.entry(entry.name.clone()).or_insert_with(|| {
                let mut family = proto::MetricFamily::default();
                family.set_name(entry.name.clone());
                family.set_field_type(prom_type(snapshot.metric_type));
                family
            });

            let mut metric = proto::Metric::default();
            for (key, val) in entry.label_keys.iter().zip(&entry.label_vals) {
                let mut pair = proto::LabelPair::default();
                pair.set_name(key.clone());
                pair.set_value(val.clone());
                metric.mut_label().push(pair);
            }

            // the value field must match the family's declared type
            match family.get_field_type() {
                proto::MetricType::COUNTER => {
                    let mut counter = proto::Counter::default();
                    counter.set_value(snapshot.value);
                    metric.set_counter(counter);
                }
                proto::MetricType::GAUGE => {
                    let mut gauge = proto::Gauge::default();
                    gauge.set_value(snapshot.value);
                    metric.set_gauge(gauge);
                }
                _ => {
                    let mut untyped = proto::Untyped::default();
                    untyped.set_value(snapshot.value);
                    metric.set_untyped(untyped);
                }
            }

            if self.with_timestamp && snapshot.time != 0.0 {
                metric.set_timestamp_ms((snapshot.time * 1000.0) as i64);
            }

            family.mut_metric().push(metric);
        }
    }
}
