//! Tenant Connection Pools
//!
//! Manages one adapter pool per tenant token with:
//! - Lazy bootstrap from the tenant registry on first access
//! - Resizing to the live `adapters_per_tenant` setting
//! - Copy-on-write publication of the adapter list
//!
//! # Design
//!
//! ```text
//!   get_adapters(token)
//!        ├─ closed? ──► PoolsClosed
//!        │
//!        ├─ pool missing? ──► registry lookup (0 rows: not found, >1: ambiguous)
//!        │
//!        ├─ target != watermark? ──► per-token lock
//!        │                             copy list
//!        │                             shrink: close index 0 while len > target
//!        │                             grow:   supplier.create while len < target
//!        │                             publish Arc<Vec<_>>, advance watermark
//!        │
//!        └─► Arc<Vec<AdapterHandle>> snapshot
//! ```
//!
//! Readers never lock anything but the short `RwLock` around the published
//! `Arc`, so they see the old or the new list in full. An adapter removed by a
//! shrink may still be held by a caller that took it from an older snapshot;
//! that caller's statement can fail with a closed adapter.
//!
//! [`TenantPoolManager::close_all`] is final: later acquisitions fail and no
//! pool, detached or not, grows again.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::adapter::{AdapterHandle, AdapterSupplier};
use crate::config::GatewaySettings;
use crate::error::GatewayError;
use crate::metrics::Counter;
use crate::tenant::{TenantCredentials, TenantRegistry};

// ============================================================================
// Pool Statistics
// ============================================================================

/// Statistics across all tenant pools
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Tenants with a bootstrapped pool
    pub tenants: usize,
    /// Adapters currently published across all pools
    pub live_adapters: usize,
    /// Total adapters created
    pub adapters_created: u64,
    /// Total adapters closed by shrinking or shutdown
    pub adapters_closed: u64,
    /// Completed resize operations
    pub resizes: u64,
    /// Adapter creation failures
    pub creation_failures: u64,
}

/// Atomic statistics for lock-free updates
#[derive(Debug, Default)]
struct PoolStatsAtomic {
    adapters_created: Counter,
    adapters_closed: Counter,
    resizes: Counter,
    creation_failures: Counter,
}

// ============================================================================
// Tenant Pool
// ============================================================================

/// The adapters of a single tenant
pub struct TenantPool {
    token: String,
    credentials: TenantCredentials,
    adapters: RwLock<Arc<Vec<AdapterHandle>>>,
    /// Target size the published list was last built for (0 = never)
    configured: AtomicUsize,
    /// Set under `resize_lock` once the pool's adapters were closed
    closed: AtomicBool,
    resize_lock: Mutex<()>,
}

impl TenantPool {
    fn new(token: String, credentials: TenantCredentials) -> Self {
        Self {
            token,
            credentials,
            adapters: RwLock::new(Arc::new(Vec::new())),
            configured: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            resize_lock: Mutex::new(()),
        }
    }

    /// Tenant token
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Resolved credentials
    pub fn credentials(&self) -> &TenantCredentials {
        &self.credentials
    }

    /// Currently published adapter list
    pub fn snapshot(&self) -> Arc<Vec<AdapterHandle>> {
        Arc::clone(&self.adapters.read())
    }

    /// Number of published adapters
    pub fn len(&self) -> usize {
        self.adapters.read().len()
    }

    /// Whether no adapter is published
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn publish(&self, adapters: Vec<AdapterHandle>) {
        *self.adapters.write() = Arc::new(adapters);
    }

    fn take_all(&self) -> Arc<Vec<AdapterHandle>> {
        std::mem::take(&mut *self.adapters.write())
    }
}

// ============================================================================
// Pool Manager
// ============================================================================

/// Registry of tenant pools keyed by token
pub struct TenantPoolManager {
    settings: Arc<dyn GatewaySettings>,
    registry: Arc<dyn TenantRegistry>,
    supplier: Arc<dyn AdapterSupplier>,
    pools: DashMap<String, Arc<OnceCell<Arc<TenantPool>>>>,
    closed: AtomicBool,
    stats: PoolStatsAtomic,
}

impl TenantPoolManager {
    /// Create an empty manager
    pub fn new(
        settings: Arc<dyn GatewaySettings>,
        registry: Arc<dyn TenantRegistry>,
        supplier: Arc<dyn AdapterSupplier>,
    ) -> Self {
        Self {
            settings,
            registry,
            supplier,
            pools: DashMap::new(),
            closed: AtomicBool::new(false),
            stats: PoolStatsAtomic::default(),
        }
    }

    /// Adapters for `token`, bootstrapping and resizing the pool as needed
    ///
    /// # Errors
    ///
    /// - [`GatewayError::Configuration`] if the target size is outside
    ///   `1..=adapter_limit`
    /// - [`GatewayError::TenantNotFound`] / [`GatewayError::AmbiguousTenant`]
    ///   on first access for a bad token
    /// - [`GatewayError::Connection`] if the registry or supplier fails
    /// - [`GatewayError::PoolsClosed`] after [`TenantPoolManager::close_all`]
    pub async fn get_adapters(&self, token: &str) -> Result<Arc<Vec<AdapterHandle>>, GatewayError> {
        if self.is_closed() {
            return Err(GatewayError::PoolsClosed);
        }
        let pool = self.pool(token).await?;

        let target = self.settings.adapters_per_tenant();
        let limit = self.settings.adapter_limit();
        if target == 0 || target > limit {
            return Err(GatewayError::Configuration(format!(
                "adapters per tenant must be within 1..={limit}, got {target}"
            )));
        }

        if pool.configured.load(Ordering::Acquire) != target {
            self.resize(&pool, target).await?;
        }

        Ok(pool.snapshot())
    }

    /// Whether [`TenantPoolManager::close_all`] ran
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The pool for `token`, if it was bootstrapped
    pub fn existing_pool(&self, token: &str) -> Option<Arc<TenantPool>> {
        self.pools.get(token).and_then(|cell| cell.get().cloned())
    }

    /// Live adapters for one tenant (0 when not bootstrapped)
    pub fn adapter_count(&self, token: &str) -> usize {
        self.existing_pool(token).map_or(0, |pool| pool.len())
    }

    /// Live adapters across all tenants
    pub fn total_adapter_count(&self) -> usize {
        self.pools
            .iter()
            .filter_map(|entry| entry.value().get().map(|pool| pool.len()))
            .sum()
    }

    /// Statistics snapshot
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            tenants: self.pools.iter().filter(|e| e.value().initialized()).count(),
            live_adapters: self.total_adapter_count(),
            adapters_created: self.stats.adapters_created.get(),
            adapters_closed: self.stats.adapters_closed.get(),
            resizes: self.stats.resizes.get(),
            creation_failures: self.stats.creation_failures.get(),
        }
    }

    /// Close every adapter of every pool and refuse further acquisitions
    pub async fn close_all(&self) {
        self.closed.store(true, Ordering::Release);
        let pools: Vec<Arc<TenantPool>> = self
            .pools
            .iter()
            .filter_map(|entry| entry.value().get().cloned())
            .collect();
        self.pools.clear();

        for pool in pools {
            let _guard = pool.resize_lock.lock().await;
            pool.closed.store(true, Ordering::Release);
            let adapters = pool.take_all();
            pool.configured.store(0, Ordering::Release);
            self.close_adapters(pool.token(), adapters.iter()).await;
        }
        info!("All tenant pools closed");
    }

    async fn pool(&self, token: &str) -> Result<Arc<TenantPool>, GatewayError> {
        let cell = Arc::clone(self.pools.entry(token.to_string()).or_default().value());
        let pool = cell.get_or_try_init(|| self.bootstrap(token)).await?;
        Ok(Arc::clone(pool))
    }

    async fn bootstrap(&self, token: &str) -> Result<Arc<TenantPool>, GatewayError> {
        let mut rows = self.registry.find_by_token(token).await?;
        let credentials = match rows.len() {
            0 => {
                return Err(GatewayError::TenantNotFound {
                    token: token.to_string(),
                })
            }
            1 => rows.remove(0),
            matches => {
                return Err(GatewayError::AmbiguousTenant {
                    token: token.to_string(),
                    matches,
                })
            }
        };

        debug!(token, database = %credentials.db_name, "Tenant pool created");
        Ok(Arc::new(TenantPool::new(token.to_string(), credentials)))
    }

    async fn resize(&self, pool: &TenantPool, target: usize) -> Result<(), GatewayError> {
        let _guard = pool.resize_lock.lock().await;
        if pool.closed.load(Ordering::Acquire) || self.is_closed() {
            return Err(GatewayError::PoolsClosed);
        }
        let previous_target = pool.configured.load(Ordering::Acquire);
        if previous_target == target {
            return Ok(());
        }

        let mut adapters: Vec<AdapterHandle> = pool.snapshot().as_ref().clone();
        let before = adapters.len();

        let mut removed = Vec::new();
        while adapters.len() > target {
            removed.push(adapters.remove(0));
        }

        if adapters.len() < target {
            let host = self.settings.db_host();
            let grown_from = adapters.len();
            while adapters.len() < target {
                match self.supplier.create(&host, pool.credentials()).await {
                    Ok(adapter) => {
                        self.stats.adapters_created.inc();
                        adapters.push(adapter);
                    }
                    Err(e) => {
                        self.stats.creation_failures.inc();
                        warn!(
                            token = pool.token(),
                            error = %e,
                            created = adapters.len() - grown_from,
                            "Adapter creation failed, keeping previous pool"
                        );
                        self.close_adapters(pool.token(), adapters[grown_from..].iter())
                            .await;
                        return Err(e.into());
                    }
                }
            }
        }

        pool.publish(adapters);
        pool.configured.store(target, Ordering::Release);
        self.stats.resizes.inc();

        info!(
            token = pool.token(),
            from = before,
            to = target,
            "Tenant pool resized"
        );

        self.close_adapters(pool.token(), removed.iter()).await;
        Ok(())
    }

    async fn close_adapters<'a>(&self, token: &str, adapters: impl Iterator<Item = &'a AdapterHandle>) {
        for adapter in adapters {
            if let Err(e) = adapter.close().await {
                warn!(token, error = %e, "Failed to close adapter");
            }
            self.stats.adapters_closed.inc();
        }
    }
}
