//! Slow-query logging
//!
//! The watchdog writes one [`TimeoutRecord`] per overrunning request and,
//! once that request finishes, one follow-up with its execution time. Two
//! sinks are provided:
//! - [`TracingQueryLogger`]: structured `tracing` events
//! - [`AdapterQueryLogger`]: rows in a `slow_query_log` table reached through
//!   a [`DatabaseAdapter`](crate::adapter::DatabaseAdapter)

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapter::{AdapterError, AdapterHandle};

/// Reason string stored with every timeout record
pub const QUERY_TIMED_OUT: &str = "QUERY_TIMED_OUT";

/// `tracing` target of [`TracingQueryLogger`] events
pub const SLOW_QUERY_TARGET: &str = "sqlgate_core::slow_query";

/// Identifier of a written timeout record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RecordId(pub i64);

/// Failure to write or update a record
#[derive(Debug, Error)]
pub enum QueryLoggerError {
    /// The backing adapter failed
    #[error("slow-query log write failed: {0}")]
    Adapter(#[from] AdapterError),

    /// The insert produced no generated key
    #[error("slow-query log insert returned no record id")]
    MissingRecordId,
}

/// Everything known about a request when it is reported as slow
#[derive(Clone, Debug, PartialEq)]
pub struct TimeoutRecord {
    /// Identifies the gateway process (start time in epoch millis)
    pub session_id: i64,
    /// Always [`QUERY_TIMED_OUT`]
    pub reason: &'static str,
    /// Request correlation id
    pub request_id: Uuid,
    /// Tenant token
    pub token: String,
    /// Statement text
    pub sql: String,
    /// When the access was handed out
    pub started_at: DateTime<Utc>,
    /// Threshold the request exceeded
    pub threshold_ms: u64,
    /// Execution time, when the request had already finished
    pub exec_time_ms: Option<u64>,
    /// Timers waiting in the watchdog queue
    pub queued_requests: usize,
    /// Accesses handed out and not yet closed
    pub unfinished_requests: u64,
    /// Adapters open across all tenants
    pub adapters_total: usize,
    /// Adapters open for this tenant
    pub adapters_for_tenant: usize,
    /// Seconds since the watchdog was created
    pub uptime_secs: u64,
    /// Resident memory of the gateway process in KiB, when known
    pub resident_memory_kb: Option<u64>,
    /// OS threads of the gateway process, when known
    pub threads: Option<u64>,
}

/// Sink for slow-query records
#[async_trait]
pub trait QueryLogger: Send + Sync {
    /// Persist a timeout record
    async fn log_timeout(&self, record: &TimeoutRecord) -> Result<RecordId, QueryLoggerError>;

    /// Add the execution time to a record written earlier
    async fn update_finished(&self, id: RecordId, exec_time: Duration) -> Result<(), QueryLoggerError>;
}

pub(crate) fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Tracing Logger
// ============================================================================

/// Emits records as `warn` events on [`SLOW_QUERY_TARGET`]
#[derive(Debug, Default)]
pub struct TracingQueryLogger {
    next_id: AtomicI64,
}

impl TracingQueryLogger {
    /// Create a logger numbering records from 1
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueryLogger for TracingQueryLogger {
    async fn log_timeout(&self, record: &TimeoutRecord) -> Result<RecordId, QueryLoggerError> {
        let id = RecordId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        warn!(
            target: SLOW_QUERY_TARGET,
            record_id = id.0,
            session_id = record.session_id,
            reason = record.reason,
            request_id = %record.request_id,
            token = %record.token,
            sql = %record.sql,
            started_at = %record.started_at.to_rfc3339(),
            threshold_ms = record.threshold_ms,
            exec_time_ms = ?record.exec_time_ms,
            queued_requests = record.queued_requests,
            unfinished_requests = record.unfinished_requests,
            adapters_total = record.adapters_total,
            adapters_for_tenant = record.adapters_for_tenant,
            uptime_secs = record.uptime_secs,
            resident_memory_kb = ?record.resident_memory_kb,
            threads = ?record.threads,
            "Query exceeded slow-query threshold"
        );
        Ok(id)
    }

    async fn update_finished(&self, id: RecordId, exec_time: Duration) -> Result<(), QueryLoggerError> {
        info!(
            target: SLOW_QUERY_TARGET,
            record_id = id.0,
            exec_time_ms = millis(exec_time),
            "Slow query finished"
        );
        Ok(())
    }
}

// ============================================================================
// Adapter Logger
// ============================================================================

/// Table written by [`AdapterQueryLogger`]
pub const SLOW_QUERY_TABLE: &str = "slow_query_log";

/// Persists records through a database adapter
pub struct AdapterQueryLogger {
    adapter: AdapterHandle,
}

impl AdapterQueryLogger {
    /// Log into `slow_query_log` through `adapter`
    pub fn new(adapter: AdapterHandle) -> Self {
        Self { adapter }
    }

    /// Create the log table if it does not exist
    ///
    /// # Errors
    ///
    /// Propagates the adapter failure.
    pub async fn ensure_table(&self) -> Result<(), QueryLoggerError> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {SLOW_QUERY_TABLE} (\
             id BIGINT AUTO_INCREMENT PRIMARY KEY, \
             session_id BIGINT NOT NULL, \
             reason VARCHAR(32) NOT NULL, \
             request_id CHAR(36) NOT NULL, \
             token VARCHAR(255) NOT NULL, \
             sql_text TEXT NOT NULL, \
             started_at VARCHAR(40) NOT NULL, \
             threshold_ms BIGINT NOT NULL, \
             exec_time_ms BIGINT NULL, \
             queued_requests BIGINT NOT NULL, \
             unfinished_requests BIGINT NOT NULL, \
             adapters_total BIGINT NOT NULL, \
             adapters_for_tenant BIGINT NOT NULL, \
             uptime_secs BIGINT NOT NULL, \
             resident_memory_kb BIGINT NULL, \
             threads BIGINT NULL)"
        );
        self.adapter.update(&ddl).await?;
        Ok(())
    }

    fn insert_statement(record: &TimeoutRecord) -> String {
        let exec_time = nullable(record.exec_time_ms);
        format!(
            "INSERT INTO {SLOW_QUERY_TABLE} (session_id, reason, request_id, token, sql_text, \
             started_at, threshold_ms, exec_time_ms, queued_requests, unfinished_requests, \
             adapters_total, adapters_for_tenant, uptime_secs, resident_memory_kb, threads) \
             VALUES ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {})",
            record.session_id,
            sql_literal(record.reason),
            sql_literal(&record.request_id.to_string()),
            sql_literal(&record.token),
            sql_literal(&record.sql),
            sql_literal(&record.started_at.to_rfc3339()),
            record.threshold_ms,
            exec_time,
            record.queued_requests,
            record.unfinished_requests,
            record.adapters_total,
            record.adapters_for_tenant,
            record.uptime_secs,
            nullable(record.resident_memory_kb),
            nullable(record.threads),
        )
    }
}

#[async_trait]
impl QueryLogger for AdapterQueryLogger {
    async fn log_timeout(&self, record: &TimeoutRecord) -> Result<RecordId, QueryLoggerError> {
        let keys = self.adapter.insert(&Self::insert_statement(record)).await?;
        keys.first()
            .copied()
            .map(RecordId)
            .ok_or(QueryLoggerError::MissingRecordId)
    }

    async fn update_finished(&self, id: RecordId, exec_time: Duration) -> Result<(), QueryLoggerError> {
        let statement = format!(
            "UPDATE {SLOW_QUERY_TABLE} SET exec_time_ms = {} WHERE id = {}",
            millis(exec_time),
            id.0
        );
        self.adapter.update(&statement).await?;
        Ok(())
    }
}

fn nullable(value: Option<u64>) -> String {
    value.map_or_else(|| "NULL".to_string(), |v| v.to_string())
}

/// Quote `value` as a SQL string literal
fn sql_literal(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for ch in value.chars() {
        match ch {
            '\'' => quoted.push_str("''"),
            '\\' => quoted.push_str("\\\\"),
            '\0' => {}
            other => quoted.push(other),
        }
    }
    quoted.push('\'');
    quoted
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::test_utils::MockAdapter;

    fn record() -> TimeoutRecord {
        TimeoutRecord {
            session_id: 1_700_000_000_000,
            reason: QUERY_TIMED_OUT,
            request_id: Uuid::nil(),
            token: "tenant".to_string(),
            sql: "SELECT 'x' FROM t".to_string(),
            started_at: Utc::now(),
            threshold_ms: 2500,
            exec_time_ms: None,
            queued_requests: 3,
            unfinished_requests: 2,
            adapters_total: 4,
            adapters_for_tenant: 1,
            uptime_secs: 60,
            resident_memory_kb: Some(20_480),
            threads: None,
        }
    }

    #[test]
    fn test_sql_literal_escaping() {
        assert_eq!(sql_literal("plain"), "'plain'");
        assert_eq!(sql_literal("it's"), "'it''s'");
        assert_eq!(sql_literal("a\\b"), "'a\\\\b'");
    }

    #[test]
    fn test_insert_statement_shape() {
        let statement = AdapterQueryLogger::insert_statement(&record());
        assert!(statement.starts_with("INSERT INTO slow_query_log"));
        assert!(statement.contains("'SELECT ''x'' FROM t'"));
        assert!(statement.contains("'QUERY_TIMED_OUT'"));
        assert!(statement.contains(", NULL, "));
        assert!(statement.ends_with(", 60, 20480, NULL)"));
    }

    #[tokio::test]
    async fn test_adapter_logger_round_trip() {
        let adapter = Arc::new(MockAdapter::new(42));
        let logger = AdapterQueryLogger::new(adapter.clone());

        logger.ensure_table().await.unwrap();
        let id = logger.log_timeout(&record()).await.unwrap();
        assert_eq!(id, RecordId(42));
        logger
            .update_finished(id, Duration::from_millis(2600))
            .await
            .unwrap();

        let statements = adapter.statements();
        assert_eq!(statements.len(), 3);
        assert!(statements[0].starts_with("CREATE TABLE IF NOT EXISTS slow_query_log"));
        assert_eq!(
            statements[2],
            "UPDATE slow_query_log SET exec_time_ms = 2600 WHERE id = 42"
        );
    }

    #[tokio::test]
    async fn test_tracing_logger_numbers_records() {
        let logger = TracingQueryLogger::new();
        assert_eq!(logger.log_timeout(&record()).await.unwrap(), RecordId(1));
        assert_eq!(logger.log_timeout(&record()).await.unwrap(), RecordId(2));
        assert!(logger
            .update_finished(RecordId(1), Duration::from_secs(3))
            .await
            .is_ok());
    }
}
