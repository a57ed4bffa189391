//! Periodic reload of a native store's cache from the backing store.
//!
//! One [`ReloadScheduler`] runs per store instance while the store is
//! `STARTED`. Each tick:
//!
//! 1. scans every document of the store's kind,
//! 2. `put`s each parsed record into the cache, refreshing its timestamp,
//! 3. removes cached names the scan no longer returned.
//!
//! A scan failure is logged and the next tick retries; it never changes the
//! store state. The scan is the only suspension point of a tick: once it
//! returns, the cache is updated synchronously, so cancelling a tick either
//! drops the scan result entirely or lets the update complete.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use parking_lot::Mutex;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::StoreResult;
use crate::native::cache::MetadataCache;
use crate::native::lifecycle::{Lifecycle, StoreState};
use crate::storage::{DocumentStore, MetadataRecord};

// =============================================================================
// Reload Summary & Statistics
// =============================================================================

/// What one reload tick changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ReloadSummary {
    /// Records written into the cache.
    pub refreshed: usize,
    /// Cached names dropped because the backing store no longer has them.
    pub removed: usize,
    /// Documents skipped because they did not parse.
    pub invalid: usize,
}

/// Statistics about the reload scheduler.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ReloadStats {
    /// Total number of reload attempts.
    pub ticks: u64,
    /// Number of successful reloads.
    pub successful: u64,
    /// Number of failed reloads.
    pub failed: u64,
    /// Completion time of the last successful reload.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_success: Option<OffsetDateTime>,
}

struct RunningTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

// =============================================================================
// Reload Scheduler
// =============================================================================

/// Background task that keeps a cache in step with the backing store.
pub struct ReloadScheduler<R> {
    store: Arc<dyn DocumentStore>,
    cache: Arc<MetadataCache<R>>,
    lifecycle: Arc<Lifecycle>,
    interval: Duration,

    task: Mutex<Option<RunningTask>>,

    ticks: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    last_success: Mutex<Option<OffsetDateTime>>,
}

impl<R: MetadataRecord> ReloadScheduler<R> {
    /// Creates an idle scheduler. Call [`ReloadScheduler::spawn`] to start ticking.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        cache: Arc<MetadataCache<R>>,
        lifecycle: Arc<Lifecycle>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            lifecycle,
            interval,
            task: Mutex::new(None),
            ticks: AtomicU64::new(0),
            successful: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            last_success: Mutex::new(None),
        }
    }

    /// Spawns the periodic task. The first tick fires one interval from now.
    ///
    /// Does nothing if the task is already running.
    pub fn spawn(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(self).run(cancel.clone()));
        *task = Some(RunningTask { cancel, handle });

        tracing::debug!(
            kind = %R::KIND,
            interval_ms = self.interval.as_millis() as u64,
            "Reload scheduler started"
        );
    }

    /// Cancels the periodic task, including a tick in progress, and waits for
    /// it to finish.
    ///
    /// Returns `false` if the task had panicked.
    pub async fn shutdown(&self) -> bool {
        let Some(task) = self.task.lock().take() else {
            return true;
        };

        task.cancel.cancel();
        match task.handle.await {
            Ok(()) => {
                tracing::debug!(kind = %R::KIND, "Reload scheduler stopped");
                true
            }
            Err(e) if e.is_cancelled() => true,
            Err(e) => {
                tracing::error!(kind = %R::KIND, error = %e, "Reload scheduler task failed");
                false
            }
        }
    }

    /// Returns `true` while the periodic task is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Configured tick interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if self.lifecycle.state() != StoreState::Started {
                continue;
            }

            let tick = AssertUnwindSafe(self.reload_now()).catch_unwind();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(kind = %R::KIND, "Reload tick aborted");
                    break;
                }
                outcome = tick => outcome,
            };

            match outcome {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    tracing::warn!(
                        kind = %R::KIND,
                        error = %e,
                        retry_in_ms = self.interval.as_millis() as u64,
                        "Reload tick failed, will retry"
                    );
                }
                Err(_) => {
                    tracing::error!(kind = %R::KIND, "Reload tick panicked");
                    self.lifecycle.fail();
                    break;
                }
            }
        }
    }

    /// Performs one reload immediately.
    ///
    /// # Errors
    ///
    /// Returns the backing-store error if the scan fails; the cache is left
    /// untouched in that case.
    pub async fn reload_now(&self) -> StoreResult<ReloadSummary> {
        self.ticks.fetch_add(1, Ordering::Relaxed);

        let documents = match self.store.scan_all(R::KIND).await {
            Ok(documents) => documents,
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        // No await past this point.
        let mut summary = ReloadSummary::default();
        let mut seen = HashSet::with_capacity(documents.len());

        for (name, document) in documents {
            match R::from_document(&name, document) {
                Ok(record) => {
                    self.cache.put(name.clone(), Arc::new(record));
                    seen.insert(name);
                    summary.refreshed += 1;
                }
                Err(e) => {
                    tracing::warn!(kind = %R::KIND, name = %name, error = %e, "Skipping invalid document");
                    summary.invalid += 1;
                }
            }
        }

        summary.removed = self.cache.retain_names(&seen);

        self.successful.fetch_add(1, Ordering::Relaxed);
        *self.last_success.lock() = Some(OffsetDateTime::now_utc());

        tracing::debug!(
            kind = %R::KIND,
            refreshed = summary.refreshed,
            removed = summary.removed,
            invalid = summary.invalid,
            "Cache reloaded"
        );
        Ok(summary)
    }

    /// Get reload statistics.
    #[must_use]
    pub fn stats(&self) -> ReloadStats {
        ReloadStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            successful: self.successful.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            last_success: *self.last_success.lock(),
        }
    }
}
