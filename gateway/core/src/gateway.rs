//! Gateway - The Composition Root
//!
//! The [`Gateway`] owns every part of the core and wires the interceptor
//! pipeline from configuration:
//!
//! ```text
//!   Watchdog? ─► TimingRecorder ─► AdmissionLimiter? ─► SelectorStage ─► TenantPoolManager
//! ```
//!
//! There is no process-wide instance. Callers build one with
//! [`GatewayBuilder`], call [`Gateway::start`] inside a Tokio runtime, and
//! [`Gateway::shutdown`] when done.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::access::{QueryRequest, ScopedQueryAccess};
use crate::adapter::{AdapterError, AdapterSupplier, Row};
use crate::config::{GatewayConfig, GatewaySettings, LiveSettings};
use crate::error::GatewayError;
use crate::interceptor::{QueryInterceptor, TimingRecorder};
use crate::metrics::LatencyModel;
use crate::routing::{
    strategy_for, AdmissionLimiter, AdmissionStats, PoolStats, SelectionStrategy, SelectorStage,
    TenantPoolManager,
};
use crate::tenant::{StaticTenantRegistry, TenantRegistry};
use crate::watchdog::{QueryLogger, TracingQueryLogger, Watchdog, WatchdogError, WatchdogStats};

// ============================================================================
// Builder
// ============================================================================

/// Assembles a [`Gateway`] from configuration and collaborators
#[must_use]
pub struct GatewayBuilder {
    config: GatewayConfig,
    settings: Option<Arc<dyn GatewaySettings>>,
    registry: Option<Arc<dyn TenantRegistry>>,
    supplier: Option<Arc<dyn AdapterSupplier>>,
    logger: Option<Arc<dyn QueryLogger>>,
    strategy: Option<Arc<dyn SelectionStrategy>>,
}

impl GatewayBuilder {
    /// Start from a loaded configuration
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            settings: None,
            registry: None,
            supplier: None,
            logger: None,
            strategy: None,
        }
    }

    /// Poll these settings instead of a [`LiveSettings`] built from the config
    pub fn with_settings(mut self, settings: Arc<dyn GatewaySettings>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Resolve tokens here instead of the config's `[[tenants]]` table
    pub fn with_registry(mut self, registry: Arc<dyn TenantRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Adapter factory (required)
    pub fn with_supplier(mut self, supplier: Arc<dyn AdapterSupplier>) -> Self {
        self.supplier = Some(supplier);
        self
    }

    /// Slow-query sink; defaults to [`TracingQueryLogger`]
    pub fn with_query_logger(mut self, logger: Arc<dyn QueryLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Override the configured selection strategy
    pub fn with_strategy(mut self, strategy: Arc<dyn SelectionStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Wire the pipeline
    ///
    /// # Errors
    ///
    /// [`GatewayError::Configuration`] if no adapter supplier was given.
    pub fn build(self) -> Result<Gateway, GatewayError> {
        let supplier = self.supplier.ok_or_else(|| {
            GatewayError::Configuration("an adapter supplier is required".to_string())
        })?;

        let live = Arc::new(LiveSettings::new(self.config.clone()));
        let settings: Arc<dyn GatewaySettings> = match self.settings {
            Some(settings) => settings,
            None => Arc::clone(&live) as Arc<dyn GatewaySettings>,
        };
        let registry = self.registry.unwrap_or_else(|| {
            Arc::new(StaticTenantRegistry::from_entries(&self.config.tenants))
        });
        let strategy = self
            .strategy
            .unwrap_or_else(|| strategy_for(self.config.selection));
        let latency = Arc::new(LatencyModel::new());

        let pools = Arc::new(TenantPoolManager::new(
            Arc::clone(&settings),
            registry,
            supplier,
        ));

        let mut stage: Arc<dyn QueryInterceptor> =
            Arc::new(SelectorStage::new(Arc::clone(&pools), Arc::clone(&strategy)));

        let admission = if self.config.admission.enabled {
            let limiter = Arc::new(AdmissionLimiter::new(stage, Arc::clone(&settings)));
            stage = limiter.clone();
            Some(limiter)
        } else {
            None
        };

        stage = Arc::new(TimingRecorder::new(stage, Arc::clone(&latency)));

        let watchdog = if self.config.watchdog.enabled {
            let logger = self
                .logger
                .unwrap_or_else(|| Arc::new(TracingQueryLogger::new()));
            let watchdog = Arc::new(
                Watchdog::new(stage, &self.config.watchdog, Arc::clone(&latency), logger)
                    .with_pools(Arc::clone(&pools)),
            );
            stage = watchdog.clone();
            Some(watchdog)
        } else {
            None
        };

        info!(
            strategy = strategy.name(),
            admission = admission.is_some(),
            watchdog = watchdog.is_some(),
            "Gateway pipeline assembled"
        );

        Ok(Gateway {
            pipeline: stage,
            pools,
            latency,
            admission,
            watchdog,
            live,
        })
    }
}

// ============================================================================
// Gateway
// ============================================================================

/// Multi-tenant SQL gateway core
pub struct Gateway {
    pipeline: Arc<dyn QueryInterceptor>,
    pools: Arc<TenantPoolManager>,
    latency: Arc<LatencyModel>,
    admission: Option<Arc<AdmissionLimiter>>,
    watchdog: Option<Arc<Watchdog>>,
    live: Arc<LiveSettings>,
}

impl Gateway {
    /// Builder seeded with `config`
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    /// Start background work (the watchdog worker, if enabled)
    ///
    /// # Errors
    ///
    /// [`WatchdogError::AlreadyRunning`] when called twice.
    pub fn start(&self) -> Result<(), WatchdogError> {
        if let Some(watchdog) = &self.watchdog {
            watchdog.start()?;
        }
        info!("Gateway started");
        Ok(())
    }

    /// Stop the watchdog, fail pending admissions and close every adapter
    ///
    /// # Errors
    ///
    /// [`WatchdogError::ShutdownTimedOut`] if the worker had to be aborted;
    /// the remaining steps still run.
    pub async fn shutdown(&self) -> Result<(), WatchdogError> {
        let watchdog_result = match &self.watchdog {
            Some(watchdog) => watchdog.stop().await,
            None => Ok(()),
        };
        if let Some(admission) = &self.admission {
            admission.interrupt_waiters();
        }
        self.pools.close_all().await;
        info!("Gateway shut down");
        watchdog_result
    }

    /// Run `request` through the pipeline
    ///
    /// # Errors
    ///
    /// Any acquisition failure of the pipeline stages.
    pub async fn request_connection(
        &self,
        request: QueryRequest,
    ) -> Result<ScopedQueryAccess, GatewayError> {
        self.pipeline.request_connection(request).await
    }

    /// Run a row query for `token` and release the adapter
    ///
    /// # Errors
    ///
    /// Acquisition or statement failures; a close failure when the statement
    /// succeeded.
    pub async fn query(&self, token: &str, sql: &str) -> Result<Vec<Row>, GatewayError> {
        let access = self.request_connection(QueryRequest::new(token, sql)).await?;
        let result = access.query().await;
        complete(access, result)
    }

    /// Run an update for `token` and release the adapter
    ///
    /// # Errors
    ///
    /// Same as [`Gateway::query`].
    pub async fn update(&self, token: &str, sql: &str) -> Result<u64, GatewayError> {
        let access = self.request_connection(QueryRequest::new(token, sql)).await?;
        let result = access.update().await;
        complete(access, result)
    }

    /// Run an insert for `token` and release the adapter
    ///
    /// # Errors
    ///
    /// Same as [`Gateway::query`].
    pub async fn insert(&self, token: &str, sql: &str) -> Result<Vec<i64>, GatewayError> {
        let access = self.request_connection(QueryRequest::new(token, sql)).await?;
        let result = access.insert().await;
        complete(access, result)
    }

    /// Standard latency quantiles plus the sample count
    pub fn latency_snapshot(&self) -> BTreeMap<String, f64> {
        self.latency.snapshot()
    }

    /// Shared latency model
    pub fn latency(&self) -> &Arc<LatencyModel> {
        &self.latency
    }

    /// Pool statistics
    pub fn pool_stats(&self) -> PoolStats {
        self.pools.stats()
    }

    /// Tenant pools
    pub fn pools(&self) -> &Arc<TenantPoolManager> {
        &self.pools
    }

    /// Admission usage for `token`, when admission control is enabled
    pub fn admission_stats(&self, token: &str) -> Option<AdmissionStats> {
        self.admission.as_ref().and_then(|limiter| limiter.stats(token))
    }

    /// Watchdog counters, when the watchdog is enabled
    pub fn watchdog_stats(&self) -> Option<WatchdogStats> {
        self.watchdog.as_ref().map(|watchdog| watchdog.stats())
    }

    /// Runtime-adjustable settings built from the configuration
    ///
    /// Changes here only take effect when the gateway was built without
    /// [`GatewayBuilder::with_settings`].
    pub fn settings(&self) -> &Arc<LiveSettings> {
        &self.live
    }
}

/// Close `access` after a statement, preferring the statement's error
fn complete<T>(access: ScopedQueryAccess, result: Result<T, AdapterError>) -> Result<T, GatewayError> {
    let request_id = access.request().id();
    let closed = access.close();
    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(close_err)) => Err(close_err.into()),
        (Err(statement_err), Ok(())) => Err(statement_err.into()),
        (Err(statement_err), Err(close_err)) => {
            warn!(
                request_id = %request_id,
                error = %close_err,
                "Close failed after statement error"
            );
            Err(statement_err.into())
        }
    }
}
