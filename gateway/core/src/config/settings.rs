//! Live Settings
//!
//! The pool and limiter poll [`GatewaySettings`] on every access instead of
//! caching values, so operators can resize tenant pools while the gateway is
//! serving traffic.

use parking_lot::RwLock;
use tracing::info;

use super::{ConfigSource, GatewayConfig};

/// Settings read by the pipeline at request time
pub trait GatewaySettings: Send + Sync {
    /// Host handed to the adapter supplier
    fn db_host(&self) -> String;

    /// Target number of adapters per tenant
    fn adapters_per_tenant(&self) -> usize;

    /// Upper bound for the target
    fn adapter_limit(&self) -> usize;

    /// Concurrent requests admitted per tenant
    fn permits_per_tenant(&self) -> usize;
}

/// Mutable, shareable settings seeded from a [`GatewayConfig`]
#[derive(Debug)]
pub struct LiveSettings {
    config: RwLock<GatewayConfig>,
}

impl LiveSettings {
    /// Wrap a loaded configuration
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    /// Copy of the current configuration
    pub fn snapshot(&self) -> GatewayConfig {
        self.config.read().clone()
    }

    /// Change the per-tenant pool size; pools resize on their next access
    ///
    /// The value is not range-checked here: an out-of-range target is
    /// rejected by the pool when a request arrives.
    pub fn set_adapters_per_tenant(&self, n: usize) {
        let mut config = self.config.write();
        let previous = config.pool.adapters_per_tenant;
        config.pool.adapters_per_tenant = n;
        config.set_source(ConfigSource::Runtime);
        info!(previous, current = n, "Adapters per tenant changed");
    }

    /// Change the upper bound for the per-tenant pool size
    pub fn set_adapter_limit(&self, limit: usize) {
        let mut config = self.config.write();
        config.pool.adapter_limit = limit;
        config.set_source(ConfigSource::Runtime);
        info!(limit, "Adapter limit changed");
    }
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self::new(GatewayConfig::default())
    }
}

impl GatewaySettings for LiveSettings {
    fn db_host(&self) -> String {
        self.config.read().db_host.clone()
    }

    fn adapters_per_tenant(&self) -> usize {
        self.config.read().pool.adapters_per_tenant
    }

    fn adapter_limit(&self) -> usize {
        self.config.read().pool.adapter_limit
    }

    fn permits_per_tenant(&self) -> usize {
        self.config.read().admission.permits_per_tenant
    }
}
