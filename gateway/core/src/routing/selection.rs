//! Adapter Selection
//!
//! Chooses which adapter of a tenant pool serves a request:
//! - [`RandomSelection`]: uniform pick over the current pool
//! - [`RoundRobinSelection`]: one rotating counter per tenant
//!
//! Both read only the pool length at call time. When a pool is resized between
//! two picks the rotation simply continues modulo the new length.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use tracing::trace;

use super::connection_pool::TenantPoolManager;
use crate::access::{QueryRequest, ScopedQueryAccess};
use crate::adapter::AdapterHandle;
use crate::config::SelectionKind;
use crate::error::GatewayError;
use crate::interceptor::QueryInterceptor;

// ============================================================================
// Strategies
// ============================================================================

/// Picks a slot index for a tenant
pub trait SelectionStrategy: Send + Sync {
    /// Index into a pool of `len` adapters; `None` when the pool is empty
    fn pick_index(&self, token: &str, len: usize) -> Option<usize>;

    /// Strategy name for logs
    fn name(&self) -> &'static str;

    /// Pick an adapter from `adapters`
    fn pick(&self, token: &str, adapters: &[AdapterHandle]) -> Option<AdapterHandle> {
        self.pick_index(token, adapters.len())
            .and_then(|idx| adapters.get(idx).cloned())
    }
}

/// Build the strategy named by configuration
pub fn strategy_for(kind: SelectionKind) -> Arc<dyn SelectionStrategy> {
    match kind {
        SelectionKind::Random => Arc::new(RandomSelection),
        SelectionKind::RoundRobin => Arc::new(RoundRobinSelection::new()),
    }
}

/// Uniformly random slot
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSelection;

impl SelectionStrategy for RandomSelection {
    fn pick_index(&self, _token: &str, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        Some(rand::thread_rng().gen_range(0..len))
    }

    fn name(&self) -> &'static str {
        "random"
    }
}

/// Per-tenant rotation
///
/// The counter is bumped with `fetch_add`; once it runs past the pool length
/// it is pulled back with a compare-and-set to `index + 1`, so it stays small
/// without ever being reset to zero. Losing that race only skews fairness.
#[derive(Debug, Default)]
pub struct RoundRobinSelection {
    counters: DashMap<String, AtomicUsize>,
}

impl RoundRobinSelection {
    /// Create with no counters
    pub fn new() -> Self {
        Self::default()
    }

    fn next(counter: &AtomicUsize, len: usize) -> usize {
        let raw = counter.fetch_add(1, Ordering::Relaxed);
        let idx = raw % len;
        if raw >= len {
            let _ = counter.compare_exchange(raw + 1, idx + 1, Ordering::Relaxed, Ordering::Relaxed);
        }
        idx
    }
}

impl SelectionStrategy for RoundRobinSelection {
    fn pick_index(&self, token: &str, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        if let Some(counter) = self.counters.get(token) {
            return Some(Self::next(counter.value(), len));
        }
        let counter = self.counters.entry(token.to_string()).or_default();
        Some(Self::next(counter.value(), len))
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

// ============================================================================
// Selector Stage
// ============================================================================

/// Innermost pipeline stage: resolves the pool and picks one adapter
pub struct SelectorStage {
    pools: Arc<TenantPoolManager>,
    strategy: Arc<dyn SelectionStrategy>,
}

impl SelectorStage {
    /// Select from `pools` using `strategy`
    pub fn new(pools: Arc<TenantPoolManager>, strategy: Arc<dyn SelectionStrategy>) -> Self {
        Self { pools, strategy }
    }
}

#[async_trait]
impl QueryInterceptor for SelectorStage {
    async fn request_connection(
        &self,
        request: QueryRequest,
    ) -> Result<ScopedQueryAccess, GatewayError> {
        let adapters = self.pools.get_adapters(request.token()).await?;
        let adapter = self.strategy.pick(request.token(), &adapters).ok_or_else(|| {
            GatewayError::Configuration(format!("pool for token '{}' is empty", request.token()))
        })?;

        trace!(
            request_id = %request.id(),
            strategy = self.strategy.name(),
            pool_size = adapters.len(),
            "Adapter selected"
        );
        Ok(ScopedQueryAccess::new(request, adapter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GatewayConfig, LiveSettings};
    use crate::test_utils::{registry_with, MockSupplier};

    #[test]
    fn test_round_robin_cycles() {
        let rr = RoundRobinSelection::new();
        let picks: Vec<usize> = (0..7).map(|_| rr.pick_index("t", 3).unwrap()).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_round_robin_counters_per_tenant() {
        let rr = RoundRobinSelection::new();
        assert_eq!(rr.pick_index("a", 2), Some(0));
        assert_eq!(rr.pick_index("a", 2), Some(1));
        assert_eq!(rr.pick_index("b", 2), Some(0));
    }

    #[test]
    fn test_round_robin_survives_shrink() {
        let rr = RoundRobinSelection::new();
        for _ in 0..4 {
            rr.pick_index("t", 5);
        }
        for _ in 0..10 {
            let idx = rr.pick_index("t", 2).unwrap();
            assert!(idx < 2);
        }
    }

    #[test]
    fn test_empty_pool() {
        assert_eq!(RoundRobinSelection::new().pick_index("t", 0), None);
        assert_eq!(RandomSelection.pick_index("t", 0), None);
    }

    #[test]
    fn test_random_is_roughly_uniform() {
        let mut counts = [0usize; 4];
        for _ in 0..10_000 {
            counts[RandomSelection.pick_index("t", 4).unwrap()] += 1;
        }
        for count in counts {
            assert!((1_875..=3_125).contains(&count), "counts were {counts:?}");
        }
    }

    #[tokio::test]
    async fn test_selector_stage_uses_strategy() {
        let mut config = GatewayConfig::default();
        config.pool.adapters_per_tenant = 3;
        let supplier = Arc::new(MockSupplier::new());
        let pools = Arc::new(TenantPoolManager::new(
            Arc::new(LiveSettings::new(config)),
            Arc::new(registry_with(&["t"])),
            supplier.clone(),
        ));
        let stage = SelectorStage::new(pools, strategy_for(SelectionKind::RoundRobin));

        let mut rows = Vec::new();
        for _ in 0..4 {
            let access = stage
                .request_connection(QueryRequest::new("t", "SELECT 1"))
                .await
                .unwrap();
            let result = access.query().await.unwrap();
            rows.push(result[0]["adapter"].as_u64().unwrap());
            access.close().unwrap();
        }
        assert_eq!(rows, vec![0, 1, 2, 0]);
    }
}
