//! Event Tail
//!
//! A bounded, recency-biased window over the audit trail. Recent history
//! queries are answered from memory; older ones fall through to the backend.
//!
//! A single background worker keeps the window current. It refreshes on a
//! fixed interval and whenever a writer calls [`EventTail::notify`]:
//!
//! - reads events past the last-seen `(ts, id)` cursor, in batches of
//!   `capacity`, until a short batch comes back (bounded by
//!   `max_catch_up_batches`)
//! - appends them under the write lock, advancing the cursor
//! - trims the oldest events so the window never exceeds `capacity`
//!
//! A failed read leaves the window untouched; the next trigger retries.
//!
//! ```ignore
//! let tail = EventTail::new(storage, clock, EventTailConfig::default());
//! tail.start();
//! // after a committed role edit
//! tail.notify();
//! let recent = tail.query(None).await?;
//! tail.stop().await;
//! ```

use crate::storage::{EventCursor, IamStorage};
use iam_core::{AdminEvent, Clock, IamResult, Timestamp};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{watch, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Default number of events retained in memory.
pub const DEFAULT_EVENT_TAIL_CAPACITY: usize = 50;

/// Default refresh period of the background worker.
pub const DEFAULT_EVENT_REFRESH_SECS: u64 = 5;

/// Default look-back when a query gives no lower bound.
pub const DEFAULT_EVENT_HORIZON_HOURS: i64 = 24;

/// Default upper bound on batches read by one refresh.
pub const DEFAULT_MAX_CATCH_UP_BATCHES: usize = 20;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the event tail.
#[derive(Debug, Clone)]
pub struct EventTailConfig {
    /// Maximum number of events kept in the window (default: 50).
    /// Also the batch size of refresh reads and the cap on fallback queries.
    pub capacity: usize,

    /// How often the worker refreshes without being notified (default: 5 seconds)
    pub refresh_interval: Duration,

    /// Look-back used when `query` is called without a lower bound, and the
    /// initial last-seen mark (default: 24 hours)
    pub horizon: chrono::Duration,

    /// Maximum number of full batches one refresh reads before applying
    /// (default: 20)
    pub max_catch_up_batches: usize,
}

impl Default for EventTailConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_EVENT_TAIL_CAPACITY,
            refresh_interval: Duration::from_secs(DEFAULT_EVENT_REFRESH_SECS),
            horizon: chrono::Duration::hours(DEFAULT_EVENT_HORIZON_HOURS),
            max_catch_up_batches: DEFAULT_MAX_CATCH_UP_BATCHES,
        }
    }
}

impl EventTailConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_refresh_interval(mut self, refresh_interval: Duration) -> Self {
        self.refresh_interval = refresh_interval;
        self
    }

    pub fn with_horizon(mut self, horizon: chrono::Duration) -> Self {
        self.horizon = horizon;
        self
    }

    pub fn with_max_catch_up_batches(mut self, batches: usize) -> Self {
        self.max_catch_up_batches = batches;
        self
    }

    fn batch_size(&self) -> usize {
        self.capacity.max(1)
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters for event tail activity since construction.
#[derive(Debug, Default)]
pub struct EventTailMetrics {
    /// Refresh attempts that completed
    pub refreshes: AtomicU64,

    /// Refresh attempts that failed on the backend read
    pub refresh_errors: AtomicU64,

    /// Queries answered from the window
    pub fast_path_hits: AtomicU64,

    /// Queries that went to the backend
    pub fallback_queries: AtomicU64,
}

impl EventTailMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> EventTailSnapshot {
        EventTailSnapshot {
            refreshes: self.refreshes.load(Ordering::Relaxed),
            refresh_errors: self.refresh_errors.load(Ordering::Relaxed),
            fast_path_hits: self.fast_path_hits.load(Ordering::Relaxed),
            fallback_queries: self.fallback_queries.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of event tail metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventTailSnapshot {
    pub refreshes: u64,
    pub refresh_errors: u64,
    pub fast_path_hits: u64,
    pub fallback_queries: u64,
}

// ============================================================================
// WINDOW
// ============================================================================

#[derive(Debug)]
struct Window {
    /// Ascending by `(ts, id)`, newest last.
    events: VecDeque<AdminEvent>,
    /// Position of the newest event ever applied. Only moves forward.
    last_seen: EventCursor,
}

impl Window {
    fn new(last_seen: Timestamp) -> Self {
        Self {
            events: VecDeque::new(),
            last_seen: EventCursor::from(last_seen),
        }
    }

    /// Whether every event newer than `from` is guaranteed to be in memory.
    fn covers(&self, from: Timestamp) -> bool {
        self.events.front().is_some_and(|oldest| oldest.ts <= from)
    }

    /// Append events past the cursor, then trim to `capacity`.
    ///
    /// `fetched` must be ascending by `(ts, id)`.
    fn apply(&mut self, fetched: Vec<AdminEvent>, capacity: usize) -> usize {
        let mut appended = 0;
        for event in fetched {
            // A concurrent refresh may already have applied part of this batch.
            if self.last_seen.admits(&event) {
                self.last_seen = EventCursor::after_event(&event);
                self.events.push_back(event);
                appended += 1;
            }
        }
        while self.events.len() > capacity {
            self.events.pop_front();
        }
        appended
    }
}

// ============================================================================
// EVENT TAIL
// ============================================================================

struct TailShared {
    storage: Arc<dyn IamStorage>,
    clock: Arc<dyn Clock>,
    config: EventTailConfig,
    window: RwLock<Window>,
    wake: Notify,
    metrics: EventTailMetrics,
}

/// In-memory tail of the audit trail with its refresh worker.
pub struct EventTail {
    shared: Arc<TailShared>,
    shutdown_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventTail {
    pub fn new(storage: Arc<dyn IamStorage>, clock: Arc<dyn Clock>, config: EventTailConfig) -> Self {
        let last_seen = clock.now() - config.horizon;
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(TailShared {
                storage,
                clock,
                config,
                window: RwLock::new(Window::new(last_seen)),
                wake: Notify::new(),
                metrics: EventTailMetrics::new(),
            }),
            shutdown_tx,
            worker: Mutex::new(None),
        }
    }

    /// Spawn the refresh worker. Calling it again while running is a no-op.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut worker = self.worker_slot();
        if worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        self.shutdown_tx.send_replace(false);
        let shutdown_rx = self.shutdown_tx.subscribe();
        *worker = Some(tokio::spawn(refresh_loop(Arc::clone(&self.shared), shutdown_rx)));
    }

    /// Signal the worker to exit and wait for it.
    pub async fn stop(&self) {
        self.shutdown_tx.send_replace(true);
        let handle = self.worker_slot().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Event tail worker ended abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker_slot()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Ask the worker for a refresh. Never blocks; signals sent while a
    /// refresh is already pending collapse into one.
    pub fn notify(&self) {
        self.shared.wake.notify_one();
    }

    /// Run one refresh attempt on the caller's task.
    ///
    /// Returns the number of events appended to the window.
    pub async fn refresh(&self) -> IamResult<usize> {
        self.shared.refresh().await
    }

    /// Events with `ts` strictly after `from`, ascending.
    ///
    /// `None` means "now minus the horizon".
    pub async fn query(&self, from: Option<Timestamp>) -> IamResult<Vec<AdminEvent>> {
        self.shared.query(from).await
    }

    /// Copy of the current window, oldest first.
    pub async fn snapshot(&self) -> Vec<AdminEvent> {
        self.shared.window.read().await.events.iter().cloned().collect()
    }

    /// Timestamp of the newest event ever applied.
    pub async fn last_seen(&self) -> Timestamp {
        self.shared.window.read().await.last_seen.ts
    }

    pub fn metrics(&self) -> &EventTailMetrics {
        &self.shared.metrics
    }

    fn worker_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        // The slot only holds a handle, so a poisoned lock is still usable.
        self.worker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for EventTail {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

impl std::fmt::Debug for EventTail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventTail")
            .field("config", &self.shared.config)
            .field("metrics", &self.shared.metrics.snapshot())
            .finish()
    }
}

impl TailShared {
    async fn refresh(&self) -> IamResult<usize> {
        let mut cursor = self.window.read().await.last_seen;
        let batch_size = self.config.batch_size();
        let mut fetched = Vec::new();

        for _ in 0..self.config.max_catch_up_batches.max(1) {
            let batch = match self.storage.event_list_after(cursor, batch_size).await {
                Ok(batch) => batch,
                Err(e) => {
                    self.metrics.refresh_errors.fetch_add(1, Ordering::Relaxed);
                    return Err(e);
                }
            };
            let full = batch.len() == batch_size;
            if let Some(newest) = batch.last() {
                cursor = EventCursor::after_event(newest);
            }
            fetched.extend(batch);
            if !full {
                break;
            }
        }

        let appended = {
            let mut window = self.window.write().await;
            window.apply(fetched, self.config.capacity)
        };
        self.metrics.refreshes.fetch_add(1, Ordering::Relaxed);

        if appended > 0 {
            tracing::debug!(events = appended, "Event tail refreshed");
        } else {
            tracing::trace!("Event tail refresh found no new events");
        }
        Ok(appended)
    }

    async fn query(&self, from: Option<Timestamp>) -> IamResult<Vec<AdminEvent>> {
        let from = from.unwrap_or_else(|| self.clock.now() - self.config.horizon);

        {
            let window = self.window.read().await;
            if window.covers(from) {
                self.metrics.fast_path_hits.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(from = %from, "Event query served from window");
                return Ok(window
                    .events
                    .iter()
                    .filter(|event| event.ts > from)
                    .cloned()
                    .collect());
            }
        }

        self.metrics.fallback_queries.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(from = %from, "Event query older than window, reading backend");
        self.storage
            .event_list_after(from.into(), self.config.capacity)
            .await
    }
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Refresh loop owned by the single worker task.
///
/// Runs until the shutdown flag flips to `true` or the sender is dropped.
/// The first interval tick fires immediately, so the window is loaded as soon
/// as the worker starts.
async fn refresh_loop(shared: Arc<TailShared>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = interval(shared.config.refresh_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        capacity = shared.config.capacity,
        refresh_interval_secs = shared.config.refresh_interval.as_secs(),
        "Event tail worker started"
    );

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            // Check for shutdown signal
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }

            // Regular refresh
            _ = ticker.tick() => {
                refresh_logged(&shared).await;
            }

            // Refresh requested by a writer
            _ = shared.wake.notified() => {
                refresh_logged(&shared).await;
            }
        }
    }

    let snapshot = shared.metrics.snapshot();
    tracing::info!(
        refreshes = snapshot.refreshes,
        refresh_errors = snapshot.refresh_errors,
        "Event tail worker stopped"
    );
}

async fn refresh_logged(shared: &TailShared) {
    if let Err(e) = shared.refresh().await {
        tracing::error!(error = %e, "Event tail refresh failed");
    }
}

// ============================================================================
// TESTS
// ============================================================================
