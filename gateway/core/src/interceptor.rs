//! Interceptor Pipeline
//!
//! Every stage turns a [`QueryRequest`] into a [`ScopedQueryAccess`] by
//! asking the stage it wraps, optionally attaching close hooks on the way
//! out. Stages never close the access themselves.
//!
//! ```text
//!   Watchdog ─► TimingRecorder ─► AdmissionLimiter ─► SelectorStage ─► TenantPoolManager
//!   (optional)                     (optional)
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::trace;

use crate::access::{QueryRequest, ScopedQueryAccess};
use crate::error::GatewayError;
use crate::metrics::LatencyModel;

/// One stage of the connection pipeline
#[async_trait]
pub trait QueryInterceptor: Send + Sync {
    /// Produce an access bound to an adapter for `request`
    async fn request_connection(
        &self,
        request: QueryRequest,
    ) -> Result<ScopedQueryAccess, GatewayError>;
}

/// Feeds the latency model with the time each access stays open
pub struct TimingRecorder {
    inner: Arc<dyn QueryInterceptor>,
    latency: Arc<LatencyModel>,
}

impl TimingRecorder {
    /// Wrap `inner`, recording into `latency`
    pub fn new(inner: Arc<dyn QueryInterceptor>, latency: Arc<LatencyModel>) -> Self {
        Self { inner, latency }
    }
}

#[async_trait]
impl QueryInterceptor for TimingRecorder {
    async fn request_connection(
        &self,
        request: QueryRequest,
    ) -> Result<ScopedQueryAccess, GatewayError> {
        let mut access = self.inner.request_connection(request).await?;
        let started = Instant::now();
        let latency = Arc::clone(&self.latency);
        access.add_close_hook(move |req| {
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            latency.record(elapsed_ms);
            trace!(request_id = %req.id(), elapsed_ms, "Query latency recorded");
            Ok(())
        });
        Ok(access)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::test_utils::FixedStage;

    #[tokio::test(start_paused = true)]
    async fn test_records_open_duration() {
        let latency = Arc::new(LatencyModel::new());
        let recorder = TimingRecorder::new(Arc::new(FixedStage::new()), latency.clone());

        let access = recorder
            .request_connection(QueryRequest::new("t", "SELECT 1"))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_millis(120)).await;
        access.close().unwrap();

        assert_eq!(latency.sample_count(), 1);
        let recorded = latency.quantile(0.5).unwrap();
        assert!((recorded - 120.0).abs() < 1.0, "recorded {recorded}");
    }

    #[tokio::test]
    async fn test_inner_failure_records_nothing() {
        let latency = Arc::new(LatencyModel::new());
        let stage = Arc::new(FixedStage::new());
        stage.set_failing(true);
        let recorder = TimingRecorder::new(stage, latency.clone());

        assert!(recorder
            .request_connection(QueryRequest::new("t", "SELECT 1"))
            .await
            .is_err());
        assert_eq!(latency.sample_count(), 0);
    }
}
