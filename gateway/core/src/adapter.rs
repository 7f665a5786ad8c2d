//! Database Adapter Contract
//!
//! The gateway never executes SQL itself. It hands out adapters created by an
//! [`AdapterSupplier`] and only relies on the four operations of
//! [`DatabaseAdapter`]. Concrete engines (JDBC bridges, sqlx pools, test
//! doubles) live outside this crate.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::tenant::TenantCredentials;

/// One result row, column name to JSON value
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Shared handle to an adapter owned by a tenant pool
pub type AdapterHandle = Arc<dyn DatabaseAdapter>;

/// Errors raised by adapters and adapter suppliers
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Opening a connection to the tenant database failed
    #[error("failed to connect to database '{database}' on '{host}': {message}")]
    Connect {
        /// Database host
        host: String,
        /// Database name
        database: String,
        /// Driver message
        message: String,
    },

    /// The statement was rejected or failed while executing
    #[error("statement failed: {0}")]
    Statement(String),

    /// The adapter was closed before or during the call
    #[error("adapter is closed")]
    Closed,
}

/// Minimal capability set the gateway needs from a SQL engine
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    /// Run a statement that returns rows
    async fn query(&self, sql: &str) -> Result<Vec<Row>, AdapterError>;

    /// Run a statement and return the number of affected rows
    async fn update(&self, sql: &str) -> Result<u64, AdapterError>;

    /// Run an insert and return the generated keys
    async fn insert(&self, sql: &str) -> Result<Vec<i64>, AdapterError>;

    /// Release the underlying connection
    async fn close(&self) -> Result<(), AdapterError>;
}

impl fmt::Debug for dyn DatabaseAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DatabaseAdapter")
    }
}

/// Factory for tenant adapters, called while a pool grows
#[async_trait]
pub trait AdapterSupplier: Send + Sync {
    /// Open an adapter for `credentials` on `host`
    async fn create(
        &self,
        host: &str,
        credentials: &TenantCredentials,
    ) -> Result<AdapterHandle, AdapterError>;
}
