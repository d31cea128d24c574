//! In-process broadcast buses for decoded telemetry.
//!
//! Two independent buses carry decoded data from handlers to applications:
//! the metric bus and the event bus. The bus layer does no filtering,
//! routing, or transformation; payloads are immutable after publish.
//!
//! The metric bus is always buffered: every subscriber drains a bounded
//! queue on its own task, and a slow subscriber loses the *oldest* queued
//! entries while the publisher never blocks. The event bus supports the same
//! buffered mode plus a blocking mode in which `publish` invokes every
//! subscriber's callback inline, in subscription order, and returns only
//! after all of them complete.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::data::{Event, Metric};

/// Default per-subscriber queue depth for buffered delivery.
pub const DEFAULT_QUEUE_DEPTH: usize = 8;

/// Receive callback for metric subscribers.
#[async_trait]
pub trait MetricReceiver: Send + Sync {
    async fn receive_metric(&self, metric: Metric);
}

/// Receive callback for event subscribers.
#[async_trait]
pub trait EventReceiver: Send + Sync {
    async fn receive_event(&self, event: Event);
}

/// Broadcast channel for decoded metrics.
pub struct MetricBus {
    tx: broadcast::Sender<Metric>,
}

impl MetricBus {
    pub fn new(queue_depth: usize) -> Self {
        let (tx, _) = broadcast::channel(queue_depth.max(1));
        Self { tx }
    }

    /// Hand a metric to every subscriber's queue. Never blocks.
    pub fn publish(&self, metric: Metric) {
        // send only fails when there are no subscribers, which is fine
        let _ = self.tx.send(metric);
    }

    /// Register a receiver. It observes only publishes made after this call.
    ///
    /// The returned task drains the subscriber's queue until the shutdown
    /// token fires or the bus is dropped.
    pub fn subscribe(
        &self,
        receiver: Arc<dyn MetricReceiver>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let mut rx = self.tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    next = rx.recv() => match next {
                        Ok(metric) => receiver.receive_metric(metric).await,
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "metric subscriber lagged, oldest entries dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        })
    }
}

/// Broadcast channel for decoded events.
///
/// Blocking delivery is an operator choice (`blockEventBus`): it trades
/// publisher throughput for lossless, ordered delivery to every subscriber.
pub struct EventBus {
    blocking: bool,
    tx: broadcast::Sender<Event>,
    direct: RwLock<Vec<Arc<dyn EventReceiver>>>,
}

impl EventBus {
    pub fn new(blocking: bool, queue_depth: usize) -> Self {
        let (tx, _) = broadcast::channel(queue_depth.max(1));
        Self {
            blocking,
            tx,
            direct: RwLock::new(Vec::new()),
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Fan an event out to all subscribers.
    ///
    /// In blocking mode this returns only after every subscriber's
    /// `receive_event` has completed; in buffered mode it returns as soon as
    /// the event is queued, and lagging subscribers lose the oldest entries.
    pub async fn publish(&self, event: Event) {
        if self.blocking {
            let receivers: Vec<Arc<dyn EventReceiver>> = self
                .direct
                .read()
                .expect("event subscriber list lock poisoned")
                .clone();
            for receiver in receivers {
                receiver.receive_event(event.clone()).await;
            }
        } else {
            let _ = self.tx.send(event);
        }
    }

    /// Register a receiver. It observes only publishes made after this call.
    ///
    /// In buffered mode a drain task is spawned and returned; in blocking
    /// mode delivery happens on the publisher's task and `None` is returned.
    pub fn subscribe(
        &self,
        receiver: Arc<dyn EventReceiver>,
        shutdown: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        if self.blocking {
            self.direct
                .write()
                .expect("event subscriber list lock poisoned")
                .push(receiver);
            return None;
        }

        let mut rx = self.tx.subscribe();
        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    next = rx.recv() => match next {
                        Ok(event) => receiver.receive_event(event).await,
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "event subscriber lagged, oldest entries dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        }))
    }
}
