//! Test doubles shared by the unit tests

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::access::{QueryRequest, ScopedQueryAccess};
use crate::adapter::{AdapterError, AdapterHandle, AdapterSupplier, DatabaseAdapter, Row};
use crate::error::GatewayError;
use crate::interceptor::QueryInterceptor;
use crate::tenant::{StaticTenantRegistry, TenantCredentials};
use crate::watchdog::{QueryLogger, QueryLoggerError, RecordId, TimeoutRecord};

// ============================================================================
// Adapters
// ============================================================================

/// Adapter that records statements and never touches a database
#[derive(Debug, Default)]
pub struct MockAdapter {
    id: usize,
    closed: AtomicBool,
    statements: Mutex<Vec<String>>,
}

impl MockAdapter {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }

    fn run(&self, sql: &str) -> Result<(), AdapterError> {
        if self.is_closed() {
            return Err(AdapterError::Closed);
        }
        if sql.contains("FAIL") {
            return Err(AdapterError::Statement(format!("rejected: {sql}")));
        }
        self.statements.lock().push(sql.to_string());
        Ok(())
    }
}

#[async_trait]
impl DatabaseAdapter for MockAdapter {
    async fn query(&self, sql: &str) -> Result<Vec<Row>, AdapterError> {
        self.run(sql)?;
        let mut row = Row::new();
        row.insert("adapter".to_string(), serde_json::json!(self.id));
        Ok(vec![row])
    }

    async fn update(&self, sql: &str) -> Result<u64, AdapterError> {
        self.run(sql)?;
        Ok(1)
    }

    async fn insert(&self, sql: &str) -> Result<Vec<i64>, AdapterError> {
        self.run(sql)?;
        Ok(vec![self.id as i64])
    }

    async fn close(&self) -> Result<(), AdapterError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Supplier handing out numbered [`MockAdapter`]s
#[derive(Debug, Default)]
pub struct MockSupplier {
    created: Mutex<Vec<Arc<MockAdapter>>>,
    fail_from: Mutex<Option<usize>>,
    hosts: Mutex<Vec<String>>,
}

impl MockSupplier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every creation attempt with index >= `n` fails
    pub fn fail_from(&self, n: usize) {
        *self.fail_from.lock() = Some(n);
    }

    pub fn create_count(&self) -> usize {
        self.created.lock().len()
    }

    pub fn created(&self) -> Vec<Arc<MockAdapter>> {
        self.created.lock().clone()
    }

    pub fn hosts(&self) -> Vec<String> {
        self.hosts.lock().clone()
    }
}

#[async_trait]
impl AdapterSupplier for MockSupplier {
    async fn create(
        &self,
        host: &str,
        credentials: &TenantCredentials,
    ) -> Result<AdapterHandle, AdapterError> {
        let mut created = self.created.lock();
        if let Some(limit) = *self.fail_from.lock() {
            if created.len() >= limit {
                return Err(AdapterError::Connect {
                    host: host.to_string(),
                    database: credentials.db_name.clone(),
                    message: "connection refused".to_string(),
                });
            }
        }
        self.hosts.lock().push(host.to_string());
        let adapter = Arc::new(MockAdapter::new(created.len()));
        created.push(Arc::clone(&adapter));
        Ok(adapter)
    }
}

/// Registry with one tenant per given token
pub fn registry_with(tokens: &[&str]) -> StaticTenantRegistry {
    let mut registry = StaticTenantRegistry::new();
    for token in tokens {
        registry.insert(
            *token,
            TenantCredentials::new(format!("{token}_user"), "pw", format!("{token}_db")),
        );
    }
    registry
}

// ============================================================================
// Interceptors
// ============================================================================

/// Innermost stage that lends one fixed adapter
pub struct FixedStage {
    adapter: Arc<MockAdapter>,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl FixedStage {
    pub fn new() -> Self {
        Self {
            adapter: Arc::new(MockAdapter::new(0)),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryInterceptor for FixedStage {
    async fn request_connection(
        &self,
        request: QueryRequest,
    ) -> Result<ScopedQueryAccess, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::TenantNotFound {
                token: request.token().to_string(),
            });
        }
        let adapter: AdapterHandle = self.adapter.clone();
        Ok(ScopedQueryAccess::new(request, adapter))
    }
}

// ============================================================================
// Query Logger
// ============================================================================

/// Logger that keeps every call in memory
#[derive(Debug, Default)]
pub struct RecordingQueryLogger {
    next_id: AtomicI64,
    timeouts: Mutex<Vec<TimeoutRecord>>,
    updates: Mutex<Vec<(RecordId, Duration)>>,
    failing: AtomicBool,
    panicking: AtomicBool,
    log_delay: Mutex<Option<Duration>>,
}

impl RecordingQueryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_panicking(&self, panicking: bool) {
        self.panicking.store(panicking, Ordering::SeqCst);
    }

    /// `log_timeout` sleeps this long before writing
    pub fn set_log_delay(&self, delay: Duration) {
        *self.log_delay.lock() = Some(delay);
    }

    pub fn timeouts(&self) -> Vec<TimeoutRecord> {
        self.timeouts.lock().clone()
    }

    pub fn updates(&self) -> Vec<(RecordId, Duration)> {
        self.updates.lock().clone()
    }
}

#[async_trait]
impl QueryLogger for RecordingQueryLogger {
    async fn log_timeout(&self, record: &TimeoutRecord) -> Result<RecordId, QueryLoggerError> {
        let delay = *self.log_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        assert!(!self.panicking.load(Ordering::SeqCst), "log table exploded");
        if self.failing.load(Ordering::SeqCst) {
            return Err(QueryLoggerError::Adapter(AdapterError::Statement(
                "log table unavailable".to_string(),
            )));
        }
        let id = RecordId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.timeouts.lock().push(record.clone());
        Ok(id)
    }

    async fn update_finished(&self, id: RecordId, exec_time: Duration) -> Result<(), QueryLoggerError> {
        self.updates.lock().push((id, exec_time));
        Ok(())
    }
}
