//! Logging setup
//!
//! Installs the process-wide `tracing` subscriber. `RUST_LOG` wins when set;
//! otherwise the configured level applies to this crate. Slow-query records
//! and their follow-ups stay visible at any configured level.

use thiserror::Error;
use tracing_subscriber::filter::{Directive, ParseError};
use tracing_subscriber::EnvFilter;

use crate::watchdog::SLOW_QUERY_TARGET;

/// Failure to install the global subscriber
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The configured level is not a valid filter directive
    #[error("invalid log directive '{directive}': {message}")]
    InvalidDirective {
        /// Directive that failed to parse
        directive: String,
        /// Parser message
        message: String,
    },

    /// A global subscriber was already installed
    #[error("failed to install tracing subscriber: {0}")]
    Install(String),
}

/// Build the filter used by [`init_tracing`]
///
/// # Errors
///
/// Returns [`TelemetryError::InvalidDirective`] if `level` does not parse.
pub fn env_filter(level: &str) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    Ok(EnvFilter::new("warn")
        .add_directive(parse_directive(&format!("sqlgate_core={level}"))?)
        .add_directive(parse_directive(&format!("{SLOW_QUERY_TARGET}=info"))?))
}

fn parse_directive(directive: &str) -> Result<Directive, TelemetryError> {
    directive
        .parse()
        .map_err(|e: ParseError| TelemetryError::InvalidDirective {
            directive: directive.to_string(),
            message: e.to_string(),
        })
}

/// Install a formatted subscriber filtered by `RUST_LOG` or `level`
///
/// # Errors
///
/// Fails if the directive is invalid or a subscriber is already installed.
pub fn init_tracing(level: &str) -> Result<(), TelemetryError> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(level)?)
        .with_target(true)
        .try_init()
        .map_err(|e| TelemetryError::Install(e.to_string()))
}
