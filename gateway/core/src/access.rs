//! Scoped Query Access
//!
//! A [`ScopedQueryAccess`] lends one pooled adapter to one request. Pipeline
//! stages attach close hooks while the access travels outward; closing the
//! access runs every hook in registration order:
//!
//! ```text
//!   request_connection ──► Selector ──► Limiter ──► Timing ──► Watchdog ──► caller
//!                            (hooks appended in this order)
//!   close()            ──► release permit ──► record latency ──► finish timer
//! ```
//!
//! `close` consumes the access, so it runs at most once. An access dropped
//! without `close` still runs its pending hooks and logs their failures.

use std::fmt;

use tracing::warn;
use uuid::Uuid;

use crate::adapter::{AdapterError, AdapterHandle, Row};
use crate::error::{CompositeCloseError, GatewayError};

// ============================================================================
// Query Request
// ============================================================================

/// An immutable SQL request from one tenant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    id: Uuid,
    token: String,
    sql: String,
}

impl QueryRequest {
    /// Create a request with a fresh correlation id
    pub fn new(token: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            token: token.into(),
            sql: sql.into(),
        }
    }

    /// Correlation id used in log lines
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Tenant token
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Statement text
    pub fn sql(&self) -> &str {
        &self.sql
    }
}

// ============================================================================
// Scoped Access
// ============================================================================

/// Hook run when an access is closed
pub type CloseHook =
    Box<dyn FnOnce(&QueryRequest) -> Result<(), GatewayError> + Send + Sync + 'static>;

/// An adapter lent to a single request, released through close hooks
pub struct ScopedQueryAccess {
    request: QueryRequest,
    adapter: AdapterHandle,
    hooks: Vec<CloseHook>,
}

impl ScopedQueryAccess {
    /// Bind `adapter` to `request` with no hooks
    pub fn new(request: QueryRequest, adapter: AdapterHandle) -> Self {
        Self {
            request,
            adapter,
            hooks: Vec::new(),
        }
    }

    /// The request this access was issued for
    pub fn request(&self) -> &QueryRequest {
        &self.request
    }

    /// The bound adapter
    pub fn adapter(&self) -> &AdapterHandle {
        &self.adapter
    }

    /// Append a hook; hooks run in the order they were added
    pub fn add_close_hook<F>(&mut self, hook: F)
    where
        F: FnOnce(&QueryRequest) -> Result<(), GatewayError> + Send + Sync + 'static,
    {
        self.hooks.push(Box::new(hook));
    }

    /// Number of hooks still pending
    pub fn pending_hooks(&self) -> usize {
        self.hooks.len()
    }

    /// Run the request's statement as a row query
    pub async fn query(&self) -> Result<Vec<Row>, AdapterError> {
        self.adapter.query(self.request.sql()).await
    }

    /// Run the request's statement as an update
    pub async fn update(&self) -> Result<u64, AdapterError> {
        self.adapter.update(self.request.sql()).await
    }

    /// Run the request's statement as an insert
    pub async fn insert(&self) -> Result<Vec<i64>, AdapterError> {
        self.adapter.insert(self.request.sql()).await
    }

    /// Release the access, running every hook even if earlier ones fail
    pub fn close(mut self) -> Result<(), CompositeCloseError> {
        let failures = self.run_hooks();
        match CompositeCloseError::from_failures(failures) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn run_hooks(&mut self) -> Vec<GatewayError> {
        let hooks = std::mem::take(&mut self.hooks);
        let mut failures = Vec::new();
        for hook in hooks {
            if let Err(e) = hook(&self.request) {
                failures.push(e);
            }
        }
        failures
    }
}

impl Drop for ScopedQueryAccess {
    fn drop(&mut self) {
        if self.hooks.is_empty() {
            return;
        }
        let failures = self.run_hooks();
        for failure in failures {
            warn!(
                request_id = %self.request.id,
                token = %self.request.token,
                error = %failure,
                "Close hook failed for access dropped without close"
            );
        }
    }
}

impl fmt::Debug for ScopedQueryAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedQueryAccess")
            .field("request", &self.request)
            .field("pending_hooks", &self.hooks.len())
            .finish()
    }
}
