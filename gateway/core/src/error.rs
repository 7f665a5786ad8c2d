//! Gateway Errors
//!
//! Errors surfaced to callers of the interceptor pipeline. Acquisition
//! failures are returned from `request_connection`; close-hook failures are
//! aggregated into a [`CompositeCloseError`] when the access is closed.
//! Watchdog failures never reach callers (see [`crate::watchdog::WatchdogError`]).

use thiserror::Error;

use crate::adapter::AdapterError;

/// Errors produced while acquiring or releasing a database adapter
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Pool or limiter settings are out of range
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No tenant row exists for the token
    #[error("no tenant registered for token '{token}'")]
    TenantNotFound {
        /// Token that was looked up
        token: String,
    },

    /// More than one tenant row exists for the token
    #[error("token '{token}' resolves to {matches} tenants")]
    AmbiguousTenant {
        /// Token that was looked up
        token: String,
        /// Number of matching tenant rows
        matches: usize,
    },

    /// Creating, using or closing an adapter failed
    #[error("database adapter error: {0}")]
    Connection(#[from] AdapterError),

    /// One or more close hooks failed
    #[error(transparent)]
    CompositeClose(#[from] CompositeCloseError),

    /// Waiting for an admission permit was interrupted
    #[error("admission wait for token '{token}' was interrupted")]
    AdmissionInterrupted {
        /// Token whose admission was pending
        token: String,
    },

    /// The tenant pools were closed by a gateway shutdown
    #[error("tenant pools are closed")]
    PoolsClosed,

    /// A permit was released for a token the limiter never admitted
    #[error("no admission semaphore exists for token '{token}'")]
    PermitState {
        /// Token the release was attempted for
        token: String,
    },
}

/// Aggregate of every close-hook failure raised while closing one access.
///
/// Always holds at least one failure: the first one is kept as the error
/// source, any later ones are available through [`CompositeCloseError::rest`].
#[derive(Debug, Error)]
#[error("{} close hook(s) failed, first cause: {first}", .rest.len() + 1)]
pub struct CompositeCloseError {
    #[source]
    first: Box<GatewayError>,
    rest: Vec<GatewayError>,
}

impl CompositeCloseError {
    /// Build from the collected failures; `None` when nothing failed
    pub fn from_failures(failures: Vec<GatewayError>) -> Option<Self> {
        let mut failures = failures.into_iter();
        let first = failures.next()?;
        Some(Self {
            first: Box::new(first),
            rest: failures.collect(),
        })
    }

    /// Number of hooks that failed
    pub fn count(&self) -> usize {
        self.rest.len() + 1
    }

    /// First failure in hook registration order
    pub fn first_cause(&self) -> &GatewayError {
        &self.first
    }

    /// Failures after the first one, in registration order
    pub fn rest(&self) -> &[GatewayError] {
        &self.rest
    }
}

/// Result alias for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_requires_a_failure() {
        assert!(CompositeCloseError::from_failures(Vec::new()).is_none());
    }

    #[test]
    fn test_composite_keeps_order() {
        let err = CompositeCloseError::from_failures(vec![
            GatewayError::PermitState {
                token: "a".to_string(),
            },
            GatewayError::Configuration("second".to_string()),
        ])
        .unwrap();

        assert_eq!(err.count(), 2);
        assert!(matches!(
            err.first_cause(),
            GatewayError::PermitState { token } if token == "a"
        ));
        assert_eq!(err.rest().len(), 1);
        assert!(err.to_string().starts_with("2 close hook(s) failed"));
    }
}
