//! Query timers
//!
//! A [`QueryTimer`] follows one access from hand-out to close. Its phase is
//! derived from three facts: when (if ever) the access closed, whether a
//! timeout record was written, and whether the execution time was added to it.
//!
//! ```text
//!   Running ──close ≤ threshold──► FinishedOnTime
//!      │
//!      └─deadline──► OverrunUnlogged ──log──► OverrunLogged ──close──► OverrunFinished
//!                          │                                                │
//!                          └──(closed before the watcher looked)            update
//!                             log with exec time ─────────────────┐         │
//!                                                                 ▼         ▼
//!                                                        OverrunLoggedWithExecTime
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::logger::RecordId;
use crate::access::QueryRequest;

/// Where a timer stands in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerPhase {
    /// Open and still within its threshold
    Running,
    /// Closed within its threshold; nothing to log
    FinishedOnTime,
    /// Past its threshold, no record written yet
    OverrunUnlogged,
    /// Record written, access still open
    OverrunLogged,
    /// Record written and access closed, execution time not yet added
    OverrunFinished,
    /// Record complete
    OverrunLoggedWithExecTime,
}

#[derive(Debug, Default)]
struct TimerState {
    finished_at: Option<Instant>,
    record: Option<RecordId>,
    exec_time_logged: bool,
}

/// Deadline tracking for one access
#[derive(Debug)]
pub struct QueryTimer {
    request: QueryRequest,
    threshold: Duration,
    started_at: Instant,
    started_wall: DateTime<Utc>,
    state: Mutex<TimerState>,
    finished: Notify,
}

impl QueryTimer {
    /// Start timing `request` against `threshold`
    pub fn new(request: QueryRequest, threshold: Duration) -> Self {
        Self {
            request,
            threshold,
            started_at: Instant::now(),
            started_wall: Utc::now(),
            state: Mutex::new(TimerState::default()),
            finished: Notify::new(),
        }
    }

    /// The timed request
    pub fn request(&self) -> &QueryRequest {
        &self.request
    }

    /// Threshold fixed at creation
    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Wall-clock start time
    pub fn started_wall(&self) -> DateTime<Utc> {
        self.started_wall
    }

    /// Instant at which the timer overruns
    pub fn deadline(&self) -> Instant {
        self.started_at + self.threshold
    }

    /// Time between start and close, once closed
    pub fn exec_time(&self) -> Option<Duration> {
        self.state
            .lock()
            .finished_at
            .map(|at| at.saturating_duration_since(self.started_at))
    }

    /// Whether the access was closed
    pub fn is_finished(&self) -> bool {
        self.state.lock().finished_at.is_some()
    }

    /// Logged record id, if any
    pub fn record(&self) -> Option<RecordId> {
        self.state.lock().record
    }

    /// Current phase as seen at `now`
    pub fn phase(&self, now: Instant) -> TimerPhase {
        let state = self.state.lock();
        match (state.finished_at, state.record) {
            (_, Some(_)) if state.exec_time_logged => TimerPhase::OverrunLoggedWithExecTime,
            (Some(_), Some(_)) => TimerPhase::OverrunFinished,
            (None, Some(_)) => TimerPhase::OverrunLogged,
            (Some(at), None) => {
                if at.saturating_duration_since(self.started_at) > self.threshold {
                    TimerPhase::OverrunUnlogged
                } else {
                    TimerPhase::FinishedOnTime
                }
            }
            (None, None) => {
                if now >= self.deadline() {
                    TimerPhase::OverrunUnlogged
                } else {
                    TimerPhase::Running
                }
            }
        }
    }

    /// Mark the access closed and wake the watcher
    ///
    /// Returns `true` when the timer must go back to the watcher for the
    /// execution-time follow-up, i.e. a record exists without it.
    pub fn finish(&self) -> bool {
        let requeue = {
            let mut state = self.state.lock();
            if state.finished_at.is_some() {
                return false;
            }
            state.finished_at = Some(Instant::now());
            state.record.is_some() && !state.exec_time_logged
        };
        self.finished.notify_one();
        requeue
    }

    /// Resolves once [`QueryTimer::finish`] was called
    pub async fn finished(&self) {
        if self.is_finished() {
            return;
        }
        self.finished.notified().await;
    }

    /// Remember the written record; `with_exec_time` if it already carries it
    pub(crate) fn mark_logged(&self, record: RecordId, with_exec_time: bool) {
        let mut state = self.state.lock();
        state.record = Some(record);
        state.exec_time_logged = with_exec_time;
    }

    /// Remember that the follow-up was attempted
    pub(crate) fn mark_exec_time_logged(&self) {
        self.state.lock().exec_time_logged = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer(threshold_ms: u64) -> QueryTimer {
        QueryTimer::new(QueryRequest::new("t", "SELECT 1"), Duration::from_millis(threshold_ms))
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_on_time() {
        let timer = timer(2000);
        assert_eq!(timer.phase(Instant::now()), TimerPhase::Running);

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(!timer.finish());
        assert_eq!(timer.exec_time(), Some(Duration::from_millis(500)));
        assert_eq!(timer.phase(Instant::now()), TimerPhase::FinishedOnTime);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrun_lifecycle() {
        let timer = timer(2000);
        tokio::time::advance(Duration::from_millis(2000)).await;
        assert_eq!(timer.phase(Instant::now()), TimerPhase::OverrunUnlogged);

        timer.mark_logged(RecordId(7), false);
        assert_eq!(timer.phase(Instant::now()), TimerPhase::OverrunLogged);

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(timer.finish());
        assert_eq!(timer.phase(Instant::now()), TimerPhase::OverrunFinished);
        assert_eq!(timer.exec_time(), Some(Duration::from_millis(2500)));

        timer.mark_exec_time_logged();
        assert_eq!(timer.phase(Instant::now()), TimerPhase::OverrunLoggedWithExecTime);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_close_before_logging_needs_no_requeue() {
        let timer = timer(100);
        tokio::time::advance(Duration::from_millis(300)).await;
        assert!(!timer.finish());
        assert_eq!(timer.phase(Instant::now()), TimerPhase::OverrunUnlogged);

        timer.mark_logged(RecordId(1), true);
        assert_eq!(timer.phase(Instant::now()), TimerPhase::OverrunLoggedWithExecTime);
    }

    #[tokio::test]
    async fn test_finish_is_idempotent_and_wakes() {
        let timer = timer(10_000);
        assert!(!timer.finish());
        assert!(!timer.finish());
        timer.finished().await;
        assert!(timer.is_finished());
    }
}
