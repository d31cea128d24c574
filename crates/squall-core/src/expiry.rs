//! Generic periodic reaper for expirable state.
//!
//! An [`ExpiryProc`] owns a set of [`Expirable`] entries and sweeps them on a
//! fixed tick. Deletion policy lives in the entries themselves: an entry may
//! refuse deletion (for example until it has been observed by a consumer),
//! in which case it stays registered and is retried on the next tick.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::trace;

/// State that can go stale and be reaped.
pub trait Expirable: Send + Sync {
    /// Whether the entry has been idle for at least `tick`.
    fn expired(&self, tick: Duration) -> bool;

    /// Attempt removal. Returning `false` keeps the entry registered so the
    /// next sweep can retry.
    fn delete(&self) -> bool;
}

/// Periodic reaper over a set of expirables.
pub struct ExpiryProc {
    interval: Duration,
    entries: Mutex<Vec<Arc<dyn Expirable>>>,
}

impl ExpiryProc {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Tick interval of this reaper.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Register an expirable. Safe to call from any task.
    pub fn register(&self, entry: Arc<dyn Expirable>) {
        self.entries
            .lock()
            .expect("expirable set lock poisoned")
            .push(entry);
    }

    /// Number of currently registered expirables.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .expect("expirable set lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sweep on every tick until the shutdown token fires.
    ///
    /// The first tick fires one full interval after start, so a freshly
    /// registered entry always gets at least one interval of grace.
    pub async fn run(&self, shutdown: CancellationToken) {
        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.sweep(),
            }
        }
    }

    fn sweep(&self) {
        // Deletion callbacks take their own locks, and registration may run
        // under those same locks, so sweep over a snapshot instead of
        // holding the registry lock across delete().
        let snapshot = self
            .entries
            .lock()
            .expect("expirable set lock poisoned")
            .clone();

        let mut reaped = Vec::new();
        for entry in snapshot {
            if entry.expired(self.interval) && entry.delete() {
                reaped.push(entry);
            }
        }
        if reaped.is_empty() {
            return;
        }

        let mut entries = self.entries.lock().expect("expirable set lock poisoned");
        entries.retain(|entry| !reaped.iter().any(|r| Arc::ptr_eq(entry, r)));
        trace!(
            reaped = reaped.len(),
            remaining = entries.len(),
            "expiry sweep"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct TestExpirable {
        expired: AtomicBool,
        allow_delete: AtomicBool,
        delete_attempts: AtomicUsize,
    }

    impl TestExpirable {
        fn new(expired: bool, allow_delete: bool) -> Arc<Self> {
            Arc::new(Self {
                expired: AtomicBool::new(expired),
                allow_delete: AtomicBool::new(allow_delete),
                delete_attempts: AtomicUsize::new(0),
            })
        }
    }

    impl Expirable for TestExpirable {
        fn expired(&self, _tick: Duration) -> bool {
            self.expired.load(Ordering::Acquire)
        }

        fn delete(&self) -> bool {
            self.delete_attempts.fetch_add(1, Ordering::AcqRel);
            self.allow_delete.load(Ordering::Acquire)
        }
    }

    #[test]
    fn test_sweep_drops_deleted_entries() {
        let proc = ExpiryProc::new(Duration::from_millis(10));
        let gone = TestExpirable::new(true, true);
        let fresh = TestExpirable::new(false, true);
        proc.register(gone.clone());
        proc.register(fresh);

        proc.sweep();
        assert_eq!(proc.len(), 1);
        assert_eq!(gone.delete_attempts.load(Ordering::Acquire), 1);
    }

    #[test]
    fn test_sweep_retries_refused_deletion() {
        let proc = ExpiryProc::new(Duration::from_millis(10));
        let stubborn = TestExpirable::new(true, false);
        proc.register(stubborn.clone());

        proc.sweep();
        proc.sweep();
        assert_eq!(proc.len(), 1);
        assert_eq!(stubborn.delete_attempts.load(Ordering::Acquire), 2);

        // Once the gate opens, the next sweep removes it.
        stubborn.allow_delete.store(true, Ordering::Release);
        proc.sweep();
        assert_eq!(proc.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_exits_on_cancellation() {
        let proc = Arc::new(ExpiryProc::new(Duration::from_secs(1)));
        let shutdown = CancellationToken::new();

        let task = tokio::spawn({
            let proc = proc.clone();
            let shutdown = shutdown.clone();
            async move { proc.run(shutdown).await }
        });

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_sweeps_on_ticks() {
        let proc = Arc::new(ExpiryProc::new(Duration::from_secs(1)));
        let entry = TestExpirable::new(true, true);
        proc.register(entry.clone());

        let shutdown = CancellationToken::new();
        let task = tokio::spawn({
            let proc = proc.clone();
            let shutdown = shutdown.clone();
            async move { proc.run(shutdown).await }
        });

        // Nothing is swept before the first full interval elapses.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(entry.delete_attempts.load(Ordering::Acquire), 0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(entry.delete_attempts.load(Ordering::Acquire), 1);
        assert_eq!(proc.len(), 0);

        shutdown.cancel();
        task.await.unwrap();
    }
}
