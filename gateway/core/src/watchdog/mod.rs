//! Slow-Query Watchdog
//!
//! Outermost pipeline stage. Every access handed out while the watchdog is
//! active gets a [`QueryTimer`] that is queued for a single background worker:
//!
//! ```text
//!   request_connection ──► timer ──► FIFO queue ──► worker
//!                                                     │ wait for close or deadline
//!                                                     ▼
//!                              on time: drop   overrun: log record ──► (close) ──► add exec time
//!   close hook ──► timer.finish() ──(record without exec time)──► re-queue
//! ```
//!
//! Timers are handled strictly in arrival order, so a short deadline queued
//! behind a long one is noticed late. Logger failures are logged and skipped.
//! An inconsistent timer or a panic in the worker disables the watchdog; the
//! pipeline keeps serving without it.

mod logger;
mod threshold;
mod timer;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub use logger::{
    AdapterQueryLogger, QueryLogger, QueryLoggerError, RecordId, TimeoutRecord, TracingQueryLogger,
    QUERY_TIMED_OUT, SLOW_QUERY_TABLE, SLOW_QUERY_TARGET,
};
pub use threshold::{ThresholdPolicy, MIN_SAMPLES, RECOMPUTE_INTERVAL};
pub use timer::{QueryTimer, TimerPhase};

use self::logger::millis;
use crate::access::{QueryRequest, ScopedQueryAccess};
use crate::config::WatchdogConfig;
use crate::error::GatewayError;
use crate::interceptor::QueryInterceptor;
use crate::metrics::{Counter, Gauge, LatencyModel, ProcessUsage};
use crate::routing::TenantPoolManager;

// ============================================================================
// Errors
// ============================================================================

/// Watchdog failures; never surfaced to pipeline callers
#[derive(Debug, Error)]
pub enum WatchdogError {
    /// `start` was called while the worker is running
    #[error("watchdog worker is already running")]
    AlreadyRunning,

    /// Internal inconsistency; the watchdog disabled itself
    #[error("watchdog disabled: {0}")]
    Fatal(String),

    /// The worker did not stop within the shutdown bound
    #[error("watchdog worker did not stop within {0:?}")]
    ShutdownTimedOut(Duration),

    /// Writing a record failed
    #[error(transparent)]
    Logger(#[from] QueryLoggerError),
}

// ============================================================================
// Statistics
// ============================================================================

/// Watchdog activity counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WatchdogStats {
    /// Timers created
    pub timers_created: u64,
    /// Timeout records written
    pub timeouts_logged: u64,
    /// Execution-time follow-ups written
    pub updates_logged: u64,
    /// Logger calls that failed
    pub logging_failures: u64,
    /// Accesses handed out and not yet closed
    pub unfinished_requests: u64,
    /// Timers waiting in the queue
    pub queued: usize,
}

#[derive(Debug, Default)]
struct StatsAtomic {
    timers_created: Counter,
    timeouts_logged: Counter,
    updates_logged: Counter,
    logging_failures: Counter,
}

// ============================================================================
// Shared State
// ============================================================================

struct WatchdogShared {
    queue: Mutex<VecDeque<Arc<QueryTimer>>>,
    enqueued: Notify,
    shutdown: Notify,
    active: AtomicBool,
    logger: Arc<dyn QueryLogger>,
    threshold: ThresholdPolicy,
    pools: Option<Arc<TenantPoolManager>>,
    session_id: i64,
    created_at: Instant,
    unfinished: Gauge,
    stats: StatsAtomic,
}

impl WatchdogShared {
    fn enqueue(&self, timer: Arc<QueryTimer>) {
        self.queue.lock().push_back(timer);
        self.enqueued.notify_one();
    }

    fn finish(&self, timer: &Arc<QueryTimer>) {
        self.unfinished.dec();
        if timer.finish() && self.active.load(Ordering::Acquire) {
            self.enqueue(Arc::clone(timer));
        }
    }

    fn disable(&self, reason: &str) {
        self.active.store(false, Ordering::Release);
        let dropped = {
            let mut queue = self.queue.lock();
            let n = queue.len();
            queue.clear();
            n
        };
        error!(reason, dropped, "Slow-query watchdog disabled");
    }

    /// Next timer, or `None` once the watchdog is inactive
    async fn next_timer(&self) -> Option<Arc<QueryTimer>> {
        loop {
            let enqueued = self.enqueued.notified();
            let shutdown = self.shutdown.notified();
            tokio::pin!(enqueued, shutdown);
            enqueued.as_mut().enable();
            shutdown.as_mut().enable();

            if !self.active.load(Ordering::Acquire) {
                return None;
            }
            let next = self.queue.lock().pop_front();
            if next.is_some() {
                return next;
            }

            tokio::select! {
                () = &mut enqueued => {}
                () = &mut shutdown => {}
            }
        }
    }

    /// Wait for `timer` to close or overrun, then settle it
    async fn watch(&self, timer: &QueryTimer) -> Result<(), WatchdogError> {
        if timer.phase(Instant::now()) == TimerPhase::OverrunLogged {
            return Err(WatchdogError::Fatal(format!(
                "timer for request {} re-entered the queue while still open",
                timer.request().id()
            )));
        }

        while timer.phase(Instant::now()) == TimerPhase::Running {
            let shutdown = self.shutdown.notified();
            tokio::pin!(shutdown);
            shutdown.as_mut().enable();
            if !self.active.load(Ordering::Acquire) {
                return Ok(());
            }

            tokio::select! {
                () = timer.finished() => {}
                () = tokio::time::sleep_until(timer.deadline()) => {}
                () = &mut shutdown => return Ok(()),
            }
        }

        self.settle(timer).await
    }

    async fn settle(&self, timer: &QueryTimer) -> Result<(), WatchdogError> {
        loop {
            match timer.phase(Instant::now()) {
                TimerPhase::Running => {
                    return Err(WatchdogError::Fatal(format!(
                        "timer for request {} settled before its deadline",
                        timer.request().id()
                    )));
                }
                TimerPhase::FinishedOnTime
                | TimerPhase::OverrunLogged
                | TimerPhase::OverrunLoggedWithExecTime => return Ok(()),
                TimerPhase::OverrunUnlogged => {
                    let record = self.timeout_record(timer);
                    let with_exec_time = record.exec_time_ms.is_some();
                    let id = self.logger.log_timeout(&record).await.inspect_err(|_| {
                        self.stats.logging_failures.inc();
                    })?;
                    timer.mark_logged(id, with_exec_time);
                    self.stats.timeouts_logged.inc();
                    debug!(
                        request_id = %timer.request().id(),
                        record_id = id.0,
                        with_exec_time,
                        "Slow query logged"
                    );
                }
                TimerPhase::OverrunFinished => {
                    let (Some(id), Some(exec_time)) = (timer.record(), timer.exec_time()) else {
                        return Err(WatchdogError::Fatal(
                            "finished overrun without record or exec time".to_string(),
                        ));
                    };
                    timer.mark_exec_time_logged();
                    self.logger
                        .update_finished(id, exec_time)
                        .await
                        .inspect_err(|_| self.stats.logging_failures.inc())?;
                    self.stats.updates_logged.inc();
                }
            }
        }
    }

    fn timeout_record(&self, timer: &QueryTimer) -> TimeoutRecord {
        let request = timer.request();
        let (adapters_total, adapters_for_tenant) = self
            .pools
            .as_ref()
            .map_or((0, 0), |pools| {
                (pools.total_adapter_count(), pools.adapter_count(request.token()))
            });
        let usage = ProcessUsage::sample();

        TimeoutRecord {
            session_id: self.session_id,
            reason: QUERY_TIMED_OUT,
            request_id: request.id(),
            token: request.token().to_string(),
            sql: request.sql().to_string(),
            started_at: timer.started_wall(),
            threshold_ms: millis(timer.threshold()),
            exec_time_ms: timer.exec_time().map(millis),
            queued_requests: self.queue.lock().len(),
            unfinished_requests: self.unfinished.get(),
            adapters_total,
            adapters_for_tenant,
            uptime_secs: self.created_at.elapsed().as_secs(),
            resident_memory_kb: usage.resident_kb,
            threads: usage.threads,
        }
    }
}

async fn run_worker(shared: Arc<WatchdogShared>) {
    info!(session_id = shared.session_id, "Slow-query watchdog started");

    while let Some(timer) = shared.next_timer().await {
        let outcome = std::panic::AssertUnwindSafe(shared.watch(&timer))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(WatchdogError::Logger(e))) => {
                warn!(
                    request_id = %timer.request().id(),
                    error = %e,
                    "Failed to write slow-query record"
                );
            }
            Ok(Err(e)) => {
                shared.disable(&e.to_string());
                break;
            }
            Err(_) => {
                shared.disable("panic while watching a query timer");
                break;
            }
        }
    }

    info!("Slow-query watchdog stopped");
}

// ============================================================================
// Watchdog Stage
// ============================================================================

/// Pipeline stage monitoring accesses for slow queries
pub struct Watchdog {
    inner: Arc<dyn QueryInterceptor>,
    shared: Arc<WatchdogShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    shutdown_timeout: Duration,
}

impl Watchdog {
    /// Wrap `inner`; the worker is not started yet
    pub fn new(
        inner: Arc<dyn QueryInterceptor>,
        config: &WatchdogConfig,
        latency: Arc<LatencyModel>,
        logger: Arc<dyn QueryLogger>,
    ) -> Self {
        Self {
            inner,
            shared: Arc::new(WatchdogShared {
                queue: Mutex::new(VecDeque::new()),
                enqueued: Notify::new(),
                shutdown: Notify::new(),
                active: AtomicBool::new(false),
                logger,
                threshold: ThresholdPolicy::new(config, latency),
                pools: None,
                session_id: Utc::now().timestamp_millis(),
                created_at: Instant::now(),
                unfinished: Gauge::new(),
                stats: StatsAtomic::default(),
            }),
            worker: Mutex::new(None),
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    /// Report adapter counts from `pools` in timeout records
    ///
    /// Only takes effect before the watchdog is shared.
    #[must_use]
    pub fn with_pools(mut self, pools: Arc<TenantPoolManager>) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.pools = Some(pools);
        }
        self
    }

    /// Whether new accesses are being timed
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Threshold a timer created now would get
    pub fn current_threshold(&self) -> Duration {
        self.shared.threshold.current()
    }

    /// Spawn the worker; must be called inside a Tokio runtime
    ///
    /// # Errors
    ///
    /// [`WatchdogError::AlreadyRunning`] if a worker is still alive.
    pub fn start(&self) -> Result<(), WatchdogError> {
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Err(WatchdogError::AlreadyRunning);
        }
        self.shared.active.store(true, Ordering::Release);
        *worker = Some(tokio::spawn(run_worker(Arc::clone(&self.shared))));
        Ok(())
    }

    /// Stop the worker and drop pending timers
    ///
    /// # Errors
    ///
    /// [`WatchdogError::ShutdownTimedOut`] if the worker does not exit within
    /// the configured bound; it is aborted in that case.
    pub async fn stop(&self) -> Result<(), WatchdogError> {
        self.shared.active.store(false, Ordering::Release);
        self.shared.shutdown.notify_waiters();
        self.shared.queue.lock().clear();

        let handle = self.worker.lock().take();
        let Some(mut handle) = handle else {
            return Ok(());
        };

        if tokio::time::timeout(self.shutdown_timeout, &mut handle)
            .await
            .is_err()
        {
            handle.abort();
            error!(timeout = ?self.shutdown_timeout, "Slow-query watchdog did not stop in time");
            return Err(WatchdogError::ShutdownTimedOut(self.shutdown_timeout));
        }
        Ok(())
    }

    /// Activity counters
    pub fn stats(&self) -> WatchdogStats {
        let stats = &self.shared.stats;
        WatchdogStats {
            timers_created: stats.timers_created.get(),
            timeouts_logged: stats.timeouts_logged.get(),
            updates_logged: stats.updates_logged.get(),
            logging_failures: stats.logging_failures.get(),
            unfinished_requests: self.shared.unfinished.get(),
            queued: self.shared.queue.lock().len(),
        }
    }
}

#[async_trait]
impl QueryInterceptor for Watchdog {
    async fn request_connection(
        &self,
        request: QueryRequest,
    ) -> Result<ScopedQueryAccess, GatewayError> {
        let mut access = self.inner.request_connection(request).await?;
        if !self.is_active() {
            return Ok(access);
        }

        let timer = Arc::new(QueryTimer::new(
            access.request().clone(),
            self.shared.threshold.current(),
        ));
        self.shared.stats.timers_created.inc();
        self.shared.unfinished.inc();
        self.shared.enqueue(Arc::clone(&timer));

        let shared = Arc::clone(&self.shared);
        access.add_close_hook(move |_| {
            shared.finish(&timer);
            Ok(())
        });
        Ok(access)
    }
}
