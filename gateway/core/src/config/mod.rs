//! TOML Configuration File Support
//!
//! Centralized configuration loading for the gateway, supporting a TOML file
//! at `~/.config/sqlgate/gateway.toml`.
//!
//! # Configuration Priority
//!
//! Values are loaded with the following priority (highest first):
//! 1. Environment variables (`SQLGATE_*`)
//! 2. TOML configuration file
//! 3. Default values
//!
//! Runtime changes after startup go through [`LiveSettings`].
//!
//! # Example Configuration
//!
//! ```toml
//! [database]
//! host = "db.internal:5432"
//!
//! [pool]
//! adapters_per_tenant = 2
//! adapter_limit = 16
//!
//! [selection]
//! strategy = "round_robin"
//!
//! [admission]
//! enabled = true
//! permits_per_tenant = 4
//!
//! [watchdog]
//! enabled = true
//! slow_query_threshold_ms = 2500
//! dynamic_threshold = true
//! dynamic_floor_ms = 500
//! slowest_quantile = 0.995
//!
//! [logging]
//! level = "info"
//!
//! [[tenants]]
//! token = "c0ffee"
//! db_user = "tenant_a"
//! db_password = "secret"
//! db_name = "tenant_a"
//! ```

mod settings;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use settings::{GatewaySettings, LiveSettings};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Value changed at runtime
    Runtime,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Runtime => write!(f, "runtime"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Database section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseToml {
    /// Host passed to the adapter supplier for every tenant
    pub host: Option<String>,
}

/// Pool section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolToml {
    /// Adapters kept per tenant
    pub adapters_per_tenant: Option<usize>,

    /// Upper bound for `adapters_per_tenant`
    pub adapter_limit: Option<usize>,
}

/// Selection section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionToml {
    /// `random` or `round_robin`
    pub strategy: Option<SelectionKind>,
}

/// Admission section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionToml {
    /// Whether per-tenant admission control is active
    pub enabled: Option<bool>,

    /// Concurrent requests allowed per tenant
    pub permits_per_tenant: Option<usize>,
}

/// Watchdog section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogToml {
    /// Whether slow queries are monitored
    pub enabled: Option<bool>,

    /// Static threshold, and ceiling of the dynamic one (milliseconds)
    pub slow_query_threshold_ms: Option<u64>,

    /// Derive the threshold from observed latencies
    pub dynamic_threshold: Option<bool>,

    /// Lower bound of the dynamic threshold (milliseconds, 0 means 1)
    pub dynamic_floor_ms: Option<u64>,

    /// Latency quantile used as the dynamic threshold
    pub slowest_quantile: Option<f64>,

    /// Bound on joining the watchdog worker at shutdown (milliseconds)
    pub shutdown_timeout_ms: Option<u64>,
}

/// Logging section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingToml {
    /// Default log directive when `RUST_LOG` is unset
    pub level: Option<String>,
}

/// One `[[tenants]]` entry for the static tenant registry
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantToml {
    /// Opaque token callers present
    pub token: String,
    /// Database user
    pub db_user: String,
    /// Database password
    pub db_password: String,
    /// Database name
    pub db_name: String,
}

impl std::fmt::Debug for TenantToml {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantToml")
            .field("token", &self.token)
            .field("db_user", &self.db_user)
            .field("db_password", &"<redacted>")
            .field("db_name", &self.db_name)
            .finish()
    }
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayToml {
    /// Database section
    pub database: DatabaseToml,

    /// Pool section
    pub pool: PoolToml,

    /// Selection section
    pub selection: SelectionToml,

    /// Admission section
    pub admission: AdmissionToml,

    /// Watchdog section
    pub watchdog: WatchdogToml,

    /// Logging section
    pub logging: LoggingToml,

    /// Static tenant table
    pub tenants: Vec<TenantToml>,
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Adapter selection strategy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionKind {
    /// Uniformly random slot
    #[default]
    Random,
    /// Per-tenant rotating slot
    RoundRobin,
}

impl std::str::FromStr for SelectionKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "random" => Ok(Self::Random),
            "round_robin" | "round-robin" | "roundrobin" => Ok(Self::RoundRobin),
            other => Err(ConfigError::ValidationError(format!(
                "unknown selection strategy '{other}'"
            ))),
        }
    }
}

/// Per-tenant pool sizing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    /// Adapters kept per tenant
    pub adapters_per_tenant: usize,
    /// Upper bound for `adapters_per_tenant`
    pub adapter_limit: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            adapters_per_tenant: 1,
            adapter_limit: 16,
        }
    }
}

/// Admission control settings
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdmissionConfig {
    /// Whether the limiter stage is installed
    pub enabled: bool,
    /// Concurrent requests allowed per tenant
    pub permits_per_tenant: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            permits_per_tenant: 1,
        }
    }
}

/// Slow-query watchdog settings
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WatchdogConfig {
    /// Whether the watchdog stage is installed
    pub enabled: bool,
    /// Static threshold, and ceiling of the dynamic one
    pub slow_query_threshold: Duration,
    /// Derive the threshold from observed latencies
    pub dynamic_threshold: bool,
    /// Lower bound of the dynamic threshold
    pub dynamic_floor: Duration,
    /// Latency quantile used as the dynamic threshold
    pub slowest_quantile: f64,
    /// Bound on joining the worker at shutdown
    pub shutdown_timeout: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            slow_query_threshold: Duration::from_millis(2500),
            dynamic_threshold: true,
            dynamic_floor: Duration::from_millis(500),
            slowest_quantile: 0.995,
            shutdown_timeout: Duration::from_millis(2000),
        }
    }
}

impl WatchdogConfig {
    /// Static threshold variant, useful for tests and fixed deployments
    #[must_use]
    pub fn fixed(threshold: Duration) -> Self {
        Self {
            slow_query_threshold: threshold,
            dynamic_threshold: false,
            ..Self::default()
        }
    }
}

/// Centralized configuration for the gateway
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Database host handed to the adapter supplier
    pub db_host: String,

    /// Pool sizing
    pub pool: PoolConfig,

    /// Adapter selection strategy
    pub selection: SelectionKind,

    /// Admission control
    pub admission: AdmissionConfig,

    /// Slow-query watchdog
    pub watchdog: WatchdogConfig,

    /// Default log directive
    pub log_level: String,

    /// Static tenant table
    pub tenants: Vec<TenantToml>,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    source: ConfigSource,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            db_host: "localhost".to_string(),
            pool: PoolConfig::default(),
            selection: SelectionKind::default(),
            admission: AdmissionConfig::default(),
            watchdog: WatchdogConfig::default(),
            log_level: "info".to_string(),
            tenants: Vec::new(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl GatewayConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.adapter_limit == 0 {
            return Err(ConfigError::ValidationError(
                "pool.adapter_limit must be at least 1".to_string(),
            ));
        }
        if self.pool.adapters_per_tenant == 0 || self.pool.adapters_per_tenant > self.pool.adapter_limit {
            return Err(ConfigError::ValidationError(format!(
                "pool.adapters_per_tenant must be within 1..={}, got {}",
                self.pool.adapter_limit, self.pool.adapters_per_tenant
            )));
        }
        if self.admission.permits_per_tenant == 0 {
            return Err(ConfigError::ValidationError(
                "admission.permits_per_tenant must be at least 1".to_string(),
            ));
        }
        if self.watchdog.slow_query_threshold.is_zero() {
            return Err(ConfigError::ValidationError(
                "watchdog.slow_query_threshold_ms must be positive".to_string(),
            ));
        }
        let q = self.watchdog.slowest_quantile;
        if !(q > 0.0 && q <= 1.0) {
            return Err(ConfigError::ValidationError(format!(
                "watchdog.slowest_quantile must be within (0, 1], got {q}"
            )));
        }
        if let Some(tenant) = self.tenants.iter().find(|t| t.token.is_empty()) {
            return Err(ConfigError::ValidationError(format!(
                "tenant '{}' has an empty token",
                tenant.db_name
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/sqlgate/gateway.toml` or
/// `~/.config/sqlgate/gateway.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("sqlgate").join("gateway.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if the
/// resulting configuration is invalid. A missing file is not an error.
pub fn load_config() -> Result<GatewayConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path, then the process environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or if validation fails.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<GatewayConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration using `env` to look up overrides
///
/// # Errors
///
/// Same as [`load_config_from_path`].
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<GatewayConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = GatewayConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: GatewayToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                tenants = config.tenants.len(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env)?;
    config.validate()?;

    Ok(config)
}

fn floor_duration(ms: u64) -> Duration {
    Duration::from_millis(ms.max(1))
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut GatewayConfig, toml: GatewayToml) {
    if let Some(host) = toml.database.host {
        config.db_host = host;
    }

    if let Some(n) = toml.pool.adapters_per_tenant {
        config.pool.adapters_per_tenant = n;
    }
    if let Some(limit) = toml.pool.adapter_limit {
        config.pool.adapter_limit = limit;
    }

    if let Some(kind) = toml.selection.strategy {
        config.selection = kind;
    }

    if let Some(enabled) = toml.admission.enabled {
        config.admission.enabled = enabled;
    }
    if let Some(permits) = toml.admission.permits_per_tenant {
        config.admission.permits_per_tenant = permits;
    }

    if let Some(enabled) = toml.watchdog.enabled {
        config.watchdog.enabled = enabled;
    }
    if let Some(ms) = toml.watchdog.slow_query_threshold_ms {
        config.watchdog.slow_query_threshold = Duration::from_millis(ms);
    }
    if let Some(dynamic) = toml.watchdog.dynamic_threshold {
        config.watchdog.dynamic_threshold = dynamic;
    }
    if let Some(ms) = toml.watchdog.dynamic_floor_ms {
        config.watchdog.dynamic_floor = floor_duration(ms);
    }
    if let Some(q) = toml.watchdog.slowest_quantile {
        config.watchdog.slowest_quantile = q;
    }
    if let Some(ms) = toml.watchdog.shutdown_timeout_ms {
        config.watchdog.shutdown_timeout = Duration::from_millis(ms);
    }

    if let Some(level) = toml.logging.level {
        config.log_level = level;
    }

    config.tenants = toml.tenants;
}

fn parse_flag(value: &str) -> bool {
    value != "0" && !value.eq_ignore_ascii_case("false")
}

/// Apply environment variable overrides to the config
fn apply_env_config<F>(config: &mut GatewayConfig, env: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = env("SQLGATE_DB_HOST") {
        config.db_host = host;
        config.source = ConfigSource::Env;
    }

    if let Some(n) = env("SQLGATE_ADAPTERS_PER_TENANT") {
        if let Ok(n) = n.parse::<usize>() {
            config.pool.adapters_per_tenant = n;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(limit) = env("SQLGATE_ADAPTER_LIMIT") {
        if let Ok(limit) = limit.parse::<usize>() {
            config.pool.adapter_limit = limit;
            config.source = ConfigSource::Env;
        }
    }

    if let Some(strategy) = env("SQLGATE_SELECTION") {
        config.selection = strategy.parse()?;
        config.source = ConfigSource::Env;
    }

    if let Some(enabled) = env("SQLGATE_ADMISSION") {
        config.admission.enabled = parse_flag(&enabled);
        config.source = ConfigSource::Env;
    }
    if let Some(permits) = env("SQLGATE_PERMITS_PER_TENANT") {
        if let Ok(permits) = permits.parse::<usize>() {
            config.admission.permits_per_tenant = permits;
            config.source = ConfigSource::Env;
        }
    }

    if let Some(enabled) = env("SQLGATE_WATCHDOG") {
        config.watchdog.enabled = parse_flag(&enabled);
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = env("SQLGATE_SLOW_QUERY_MS") {
        if let Ok(ms) = ms.parse::<u64>() {
            config.watchdog.slow_query_threshold = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(dynamic) = env("SQLGATE_DYNAMIC_THRESHOLD") {
        config.watchdog.dynamic_threshold = parse_flag(&dynamic);
        config.source = ConfigSource::Env;
    }

    if let Some(level) = env("SQLGATE_LOG_LEVEL") {
        config.log_level = level;
        config.source = ConfigSource::Env;
    }

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
