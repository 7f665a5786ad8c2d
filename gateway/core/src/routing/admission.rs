//! Per-Tenant Admission Control
//!
//! Caps how many accesses a single tenant may hold at once. Each token gets a
//! counting semaphore, created on first use with the capacity configured at
//! that moment. A permit is taken before the inner stage runs and handed back
//! by a close hook:
//!
//! ```text
//!   acquire ──► inner.request_connection ──ok──► permit.forget() + release hook
//!                        │
//!                        └──err──► permit dropped (returned immediately)
//! ```
//!
//! Waiting is cancellable: dropping the caller's future abandons the wait,
//! and [`AdmissionLimiter::interrupt_waiters`] fails every pending and future
//! acquire with [`GatewayError::AdmissionInterrupted`].

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Semaphore;
use tracing::{debug, info, trace};

use crate::access::{QueryRequest, ScopedQueryAccess};
use crate::config::GatewaySettings;
use crate::error::GatewayError;
use crate::interceptor::QueryInterceptor;

/// Permits of one tenant
#[derive(Debug)]
struct TenantPermits {
    semaphore: Semaphore,
    capacity: usize,
}

type PermitTable = DashMap<String, Arc<TenantPermits>>;

/// Admission statistics for one tenant
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdmissionStats {
    /// Capacity fixed when the tenant was first seen
    pub capacity: usize,
    /// Permits currently held
    pub in_use: usize,
}

/// Pipeline stage limiting concurrent accesses per tenant
pub struct AdmissionLimiter {
    inner: Arc<dyn QueryInterceptor>,
    settings: Arc<dyn GatewaySettings>,
    permits: Arc<PermitTable>,
}

impl AdmissionLimiter {
    /// Wrap `inner`; capacities are read from `settings`
    pub fn new(inner: Arc<dyn QueryInterceptor>, settings: Arc<dyn GatewaySettings>) -> Self {
        Self {
            inner,
            settings,
            permits: Arc::new(DashMap::new()),
        }
    }

    /// Permit usage for `token`, if the tenant was seen
    pub fn stats(&self, token: &str) -> Option<AdmissionStats> {
        self.permits.get(token).map(|entry| AdmissionStats {
            capacity: entry.capacity,
            in_use: entry.capacity.saturating_sub(entry.semaphore.available_permits()),
        })
    }

    /// Fail all current and future waiters
    pub fn interrupt_waiters(&self) {
        for entry in self.permits.iter() {
            entry.semaphore.close();
        }
        info!(tenants = self.permits.len(), "Admission waiters interrupted");
    }

    fn permits_for(&self, token: &str) -> Result<Arc<TenantPermits>, GatewayError> {
        if let Some(existing) = self.permits.get(token) {
            return Ok(Arc::clone(existing.value()));
        }

        let capacity = self.settings.permits_per_tenant();
        if capacity == 0 {
            return Err(GatewayError::Configuration(
                "permits per tenant must be at least 1".to_string(),
            ));
        }

        let entry = self.permits.entry(token.to_string()).or_insert_with(|| {
            debug!(token, capacity, "Admission semaphore created");
            Arc::new(TenantPermits {
                semaphore: Semaphore::new(capacity),
                capacity,
            })
        });
        Ok(Arc::clone(entry.value()))
    }
}

/// Return one permit for `token`
fn release(permits: &PermitTable, token: &str) -> Result<(), GatewayError> {
    match permits.get(token) {
        Some(entry) => {
            entry.semaphore.add_permits(1);
            trace!(token, "Admission permit released");
            Ok(())
        }
        None => Err(GatewayError::PermitState {
            token: token.to_string(),
        }),
    }
}

#[async_trait]
impl QueryInterceptor for AdmissionLimiter {
    async fn request_connection(
        &self,
        request: QueryRequest,
    ) -> Result<ScopedQueryAccess, GatewayError> {
        let tenant = self.permits_for(request.token())?;
        let permit = tenant
            .semaphore
            .acquire()
            .await
            .map_err(|_| GatewayError::AdmissionInterrupted {
                token: request.token().to_string(),
            })?;

        let mut access = self.inner.request_connection(request).await?;

        permit.forget();
        let permits = Arc::clone(&self.permits);
        access.add_close_hook(move |req| release(&permits, req.token()));
        Ok(access)
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_pending, assert_ready};

    use super::*;
    use crate::config::{GatewayConfig, LiveSettings};
    use crate::test_utils::FixedStage;

    fn limiter(permits: usize) -> (Arc<FixedStage>, AdmissionLimiter) {
        let mut config = GatewayConfig::default();
        config.admission.enabled = true;
        config.admission.permits_per_tenant = permits;
        let stage = Arc::new(FixedStage::new());
        let limiter = AdmissionLimiter::new(stage.clone(), Arc::new(LiveSettings::new(config)));
        (stage, limiter)
    }

    fn request(token: &str) -> QueryRequest {
        QueryRequest::new(token, "SELECT 1")
    }

    #[tokio::test]
    async fn test_third_acquire_waits_for_close() {
        let (_, limiter) = limiter(2);
        let first = limiter.request_connection(request("t")).await.unwrap();
        let _second = limiter.request_connection(request("t")).await.unwrap();

        let mut third = tokio_test::task::spawn(limiter.request_connection(request("t")));
        assert_pending!(third.poll());
        assert_eq!(limiter.stats("t").unwrap().in_use, 2);

        first.close().unwrap();
        assert!(third.is_woken());
        let access = assert_ready!(third.poll()).unwrap();
        assert_eq!(access.request().token(), "t");
    }

    #[tokio::test]
    async fn test_tenants_are_independent() {
        let (_, limiter) = limiter(1);
        let _a = limiter.request_connection(request("a")).await.unwrap();

        let mut b = tokio_test::task::spawn(limiter.request_connection(request("b")));
        assert!(assert_ready!(b.poll()).is_ok());
    }

    #[tokio::test]
    async fn test_inner_failure_returns_permit() {
        let (stage, limiter) = limiter(1);
        stage.set_failing(true);
        assert!(limiter.request_connection(request("t")).await.is_err());
        assert_eq!(limiter.stats("t").unwrap().in_use, 0);

        stage.set_failing(false);
        let access = limiter.request_connection(request("t")).await.unwrap();
        assert_eq!(limiter.stats("t").unwrap().in_use, 1);
        access.close().unwrap();
        assert_eq!(limiter.stats("t").unwrap().in_use, 0);
    }

    #[tokio::test]
    async fn test_interrupt_fails_waiters() {
        let (_, limiter) = limiter(1);
        let _held = limiter.request_connection(request("t")).await.unwrap();

        let mut waiting = tokio_test::task::spawn(limiter.request_connection(request("t")));
        assert_pending!(waiting.poll());

        limiter.interrupt_waiters();
        let result = assert_ready!(waiting.poll());
        assert!(matches!(
            result,
            Err(GatewayError::AdmissionInterrupted { token }) if token == "t"
        ));
    }

    #[test]
    fn test_release_unknown_token() {
        let table = PermitTable::new();
        assert!(matches!(
            release(&table, "ghost"),
            Err(GatewayError::PermitState { token }) if token == "ghost"
        ));
    }

    #[tokio::test]
    async fn test_zero_capacity_rejected() {
        let (stage, limiter) = limiter(0);
        assert!(matches!(
            limiter.request_connection(request("t")).await,
            Err(GatewayError::Configuration(_))
        ));
        assert_eq!(stage.calls(), 0);
    }
}
