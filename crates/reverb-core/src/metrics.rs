//! Best-effort run metrics.
//!
//! Recording is advisory: the orchestrator logs and swallows any error from
//! an implementation, so observability can never turn a successful run into
//! a reported failure.

use std::future::Future;

use uuid::Uuid;

use crate::error::AppError;
use crate::run::RunCounts;

/// Recorder for ingestion outcome counters.
pub trait MetricsRecorder: Send + Sync + Clone {
    /// Records a successful run.
    fn record_success(
        &self,
        app_id: Uuid,
        duration_ms: i64,
        counts: &RunCounts,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Records a failed run with its stable error code.
    fn record_failure(
        &self,
        app_id: Uuid,
        duration_ms: i64,
        error_code: &str,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Metrics recorder that emits structured tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsRecorder for TracingMetrics {
    async fn record_success(
        &self,
        app_id: Uuid,
        duration_ms: i64,
        counts: &RunCounts,
    ) -> Result<(), AppError> {
        tracing::info!(
            %app_id,
            duration_ms,
            fetched = counts.fetched,
            inserted = counts.inserted,
            duplicates = counts.duplicates,
            skipped = counts.skipped,
            "ingestion.run.succeeded"
        );
        Ok(())
    }

    async fn record_failure(
        &self,
        app_id: Uuid,
        duration_ms: i64,
        error_code: &str,
    ) -> Result<(), AppError> {
        tracing::info!(%app_id, duration_ms, error_code, "ingestion.run.failed");
        Ok(())
    }
}
