//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use sqlgate_core::{
    AdapterError, AdapterHandle, AdapterSupplier, DatabaseAdapter, QueryLogger, QueryLoggerError,
    RecordId, Row, StaticTenantRegistry, TenantCredentials, TimeoutRecord,
};

/// In-memory adapter that answers every query with its own identity
pub struct MemoryAdapter {
    pub id: usize,
    pub db_name: String,
    closed: AtomicBool,
}

impl MemoryAdapter {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> Result<(), AdapterError> {
        if self.is_closed() {
            Err(AdapterError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DatabaseAdapter for MemoryAdapter {
    async fn query(&self, _sql: &str) -> Result<Vec<Row>, AdapterError> {
        self.check_open()?;
        let mut row = Row::new();
        row.insert("adapter".to_string(), json!(self.id));
        row.insert("db".to_string(), json!(self.db_name));
        Ok(vec![row])
    }

    async fn update(&self, _sql: &str) -> Result<u64, AdapterError> {
        self.check_open()?;
        Ok(1)
    }

    async fn insert(&self, _sql: &str) -> Result<Vec<i64>, AdapterError> {
        self.check_open()?;
        Ok(vec![i64::try_from(self.id).unwrap_or_default()])
    }

    async fn close(&self) -> Result<(), AdapterError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Supplier numbering adapters in creation order
#[derive(Default)]
pub struct MemorySupplier {
    created: Mutex<Vec<Arc<MemoryAdapter>>>,
}

impl MemorySupplier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> Vec<Arc<MemoryAdapter>> {
        self.created.lock().clone()
    }
}

#[async_trait]
impl AdapterSupplier for MemorySupplier {
    async fn create(
        &self,
        _host: &str,
        credentials: &TenantCredentials,
    ) -> Result<AdapterHandle, AdapterError> {
        let mut created = self.created.lock();
        let adapter = Arc::new(MemoryAdapter {
            id: created.len(),
            db_name: credentials.db_name.clone(),
            closed: AtomicBool::new(false),
        });
        created.push(adapter.clone());
        Ok(adapter)
    }
}

/// Registry with one tenant per token, database named `<token>_db`
pub fn registry(tokens: &[&str]) -> Arc<StaticTenantRegistry> {
    let mut registry = StaticTenantRegistry::new();
    for token in tokens {
        registry.insert(
            *token,
            TenantCredentials::new(format!("{token}_user"), "secret", format!("{token}_db")),
        );
    }
    Arc::new(registry)
}

/// Query logger that keeps everything it is given
#[derive(Default)]
pub struct CollectingLogger {
    next_id: AtomicI64,
    timeouts: Mutex<Vec<TimeoutRecord>>,
    updates: Mutex<Vec<(RecordId, Duration)>>,
}

impl CollectingLogger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn timeouts(&self) -> Vec<TimeoutRecord> {
        self.timeouts.lock().clone()
    }

    pub fn updates(&self) -> Vec<(RecordId, Duration)> {
        self.updates.lock().clone()
    }
}

#[async_trait]
impl QueryLogger for CollectingLogger {
    async fn log_timeout(&self, record: &TimeoutRecord) -> Result<RecordId, QueryLoggerError> {
        let id = RecordId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.timeouts.lock().push(record.clone());
        Ok(id)
    }

    async fn update_finished(&self, id: RecordId, exec_time: Duration) -> Result<(), QueryLoggerError> {
        self.updates.lock().push((id, exec_time));
        Ok(())
    }
}
