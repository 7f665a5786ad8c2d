//! sqlgate Core - Multi-Tenant SQL Gateway
//!
//! This crate is the heart of the gateway. Callers hand it a tenant token
//! and a statement; it resolves the tenant, picks one of the tenant's
//! database adapters, optionally limits how many requests the tenant runs at
//! once, times the request and reports it when it runs slow.
//!
//! # Architecture
//!
//! ```text
//!                    request_connection(token, sql)
//!                                 |
//!                                 v
//! +-------------------------------------------------------------------+
//! |                              Gateway                              |
//! |                                                                   |
//! |  +----------+   +----------------+   +-----------+   +----------+ |
//! |  | Watchdog |-->| TimingRecorder |-->| Admission |-->| Selector | |
//! |  +----+-----+   +-------+--------+   +-----------+   +----+-----+ |
//! |       |                 |                                 |       |
//! |       v                 v                                 v       |
//! |  QueryLogger       LatencyModel                   TenantPoolManager|
//! |                    (t-digest)                      (per token)     |
//! +-------------------------------------------------------------------+
//!                                 |
//!                                 v
//!                        ScopedQueryAccess
//!              (query / update / insert, then close)
//! ```
//!
//! Every stage implements [`QueryInterceptor`] and wraps the next one. The
//! access returned to the caller carries close hooks pushed by the stages;
//! closing it runs them in the order they were added, so the watchdog hears
//! about the end of a request last.
//!
//! # Usage
//!
//! ```text
//! let config = sqlgate_core::load_config()?;
//! let gateway = Gateway::builder(config)
//!     .with_supplier(Arc::new(MySupplier))
//!     .build()?;
//! gateway.start()?;
//!
//! let rows = gateway.query("tenant-token", "SELECT 1").await?;
//!
//! gateway.shutdown().await?;
//! ```
//!
//! # Module Overview
//!
//! - [`access`]: Request descriptors and the scoped access handed to callers
//! - [`adapter`]: Database adapter and supplier traits
//! - [`config`]: TOML and environment configuration, live settings
//! - [`digest`]: Mergeable t-digest quantile estimator
//! - [`error`]: Gateway error types
//! - [`gateway`]: Composition root
//! - [`interceptor`]: Pipeline stage trait and latency recording stage
//! - [`metrics`]: Latency model and simple counters
//! - [`routing`]: Tenant pools, adapter selection, admission limiting
//! - [`telemetry`]: `tracing` subscriber setup
//! - [`tenant`]: Tenant credentials and token resolution
//! - [`watchdog`]: Slow-query detection and logging

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod access;
pub mod adapter;
pub mod config;
pub mod digest;
pub mod error;
pub mod gateway;
pub mod interceptor;
pub mod metrics;
pub mod routing;
pub mod telemetry;
pub mod tenant;
pub mod watchdog;

#[cfg(test)]
mod test_utils;

// Core exports
pub use access::{CloseHook, QueryRequest, ScopedQueryAccess};
pub use adapter::{AdapterError, AdapterHandle, AdapterSupplier, DatabaseAdapter, Row};
pub use error::{CompositeCloseError, GatewayError, GatewayResult};
pub use gateway::{Gateway, GatewayBuilder};
pub use interceptor::{QueryInterceptor, TimingRecorder};
pub use tenant::{StaticTenantRegistry, TenantCredentials, TenantRegistry};

// Latency exports
pub use digest::TDigest;
pub use metrics::{LatencyModel, ProcessUsage, SAMPLES_LABEL, STANDARD_QUANTILES};

// Routing exports
pub use routing::{
    strategy_for, AdmissionLimiter, AdmissionStats, PoolStats, RandomSelection,
    RoundRobinSelection, SelectionStrategy, SelectorStage, TenantPoolManager,
};

// Watchdog exports
pub use watchdog::{
    AdapterQueryLogger, QueryLogger, QueryLoggerError, RecordId, TimeoutRecord,
    TracingQueryLogger, Watchdog, WatchdogError, WatchdogStats,
};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, load_config_with_env,
    AdmissionConfig, ConfigError, ConfigSource, GatewayConfig, GatewaySettings, LiveSettings,
    PoolConfig, SelectionKind, WatchdogConfig,
};

// Telemetry exports
pub use telemetry::{init_tracing, TelemetryError};
