//! Ingestion orchestrator.
//!
//! This module owns the control path for one ingestion run:
//!
//! ```text
//! eligibility gate -> create run (pending) -> start (processing)
//!     -> multi-source aggregation -> chunked persistence
//!     -> terminal status + sync state + metrics + snapshot trigger
//! ```
//!
//! Every error thrown below the orchestrator is caught here, classified
//! into a stable `{code, message}` pair, and used to populate the failed
//! run record; the caller always receives a structured
//! [`IngestionOutcome`], never a raw error. Cancellation is distinct from
//! failure: it marks the run cancelled and leaves the failure counter and
//! backoff window untouched.
//!
//! # Architecture
//!
//! [`IngestionService`] is generic over four traits:
//! - [`IngestStore`] - persistence boundary
//! - [`ReviewFeedClient`] - upstream feed access
//! - [`SnapshotEnqueuer`] - downstream analysis boundary
//! - [`MetricsRecorder`] - best-effort observability
//!
//! This enables mock implementations for tests and keeps the orchestrator
//! decoupled from concrete I/O.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::aggregate::aggregate_sources;
use crate::config::{AppEntry, IngestConfig};
use crate::eligibility::{RunOptions, check_eligibility};
use crate::error::AppError;
use crate::metrics::MetricsRecorder;
use crate::models::{ReviewSort, SyncStateUpdate, TrackedApp, Workspace};
use crate::progress::{IngestEvent, IngestReporter, SilentReporter};
use crate::rate_limit::WorkspaceRateLimiter;
use crate::run::{NewRun, RunCounts, RunStateMachine, RunStatus, RunTerminal};
use crate::traits::{IngestStore, ReviewFeedClient, SnapshotEnqueuer};
use crate::writer::write_reviews;

/// Classified error surfaced to the run's caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunError {
    /// Stable error code from the closed set in [`AppError::code`].
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl RunError {
    fn from_app_error(err: &AppError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Structured result returned for every ingestion attempt.
#[derive(Debug, Clone)]
pub struct IngestionOutcome {
    /// True if the run reached `succeeded`.
    pub success: bool,
    /// The run record, when one was created. Eligibility failures happen
    /// before run creation and leave this `None`.
    pub run_id: Option<Uuid>,
    /// Snapshot enqueued downstream, if any.
    pub snapshot_id: Option<Uuid>,
    /// Feed entries considered across all sources.
    pub reviews_fetched: u64,
    /// Rows newly inserted.
    pub reviews_inserted: u64,
    /// Cross-source overlap plus natural-key conflicts.
    pub duplicate_count: u64,
    /// Rejected entries, cap truncation, and failed chunks.
    pub reviews_skipped: u64,
    /// Wall-clock duration of the attempt.
    pub duration_ms: i64,
    /// Classification of the failure, when not successful.
    pub error: Option<RunError>,
}

impl IngestionOutcome {
    fn failure(run_id: Option<Uuid>, duration_ms: i64, err: &AppError) -> Self {
        Self {
            success: false,
            run_id,
            snapshot_id: None,
            reviews_fetched: 0,
            reviews_inserted: 0,
            duplicate_count: 0,
            reviews_skipped: 0,
            duration_ms,
            error: Some(RunError::from_app_error(err)),
        }
    }

    /// True if the attempt ended through cancellation rather than failure.
    pub fn is_cancelled(&self) -> bool {
        self.error
            .as_ref()
            .is_some_and(|e| e.code == AppError::Cancelled.code())
    }
}

// =============================================================================
// Batch ingestion
// =============================================================================

/// Result of one app within a batch ingestion.
#[derive(Debug, Clone)]
pub struct AppIngestResult {
    /// Configured app name.
    pub app_name: String,
    /// External store identifier.
    pub store_id: String,
    /// The structured outcome for this app.
    pub outcome: IngestionOutcome,
}

/// Summary of a batch ingestion over several apps.
#[derive(Debug, Default, Clone)]
pub struct BatchIngestSummary {
    /// Per-app results, in processing order.
    pub results: Vec<AppIngestResult>,
}

impl BatchIngestSummary {
    /// Number of apps that succeeded.
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.success).count()
    }

    /// Number of apps that failed (including cancelled).
    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

// =============================================================================
// Ingestion service
// =============================================================================

/// Orchestrator for review ingestion runs.
///
/// # Type Parameters
///
/// * `S` - Store implementation (e.g. `PgIngestStore`)
/// * `C` - Feed client implementation (e.g. `AppStoreFeedClient`)
/// * `Q` - Snapshot enqueuer (e.g. `PgSnapshotQueue`, `NoopSnapshotEnqueuer`)
/// * `M` - Metrics recorder (e.g. `TracingMetrics`)
pub struct IngestionService<S, C, Q, M>
where
    S: IngestStore,
    C: ReviewFeedClient,
    Q: SnapshotEnqueuer,
    M: MetricsRecorder,
{
    store: S,
    client: C,
    snapshots: Q,
    metrics: M,
    limiter: Arc<WorkspaceRateLimiter>,
    config: IngestConfig,
}

impl<S, C, Q, M> Clone for IngestionService<S, C, Q, M>
where
    S: IngestStore,
    C: ReviewFeedClient,
    Q: SnapshotEnqueuer,
    M: MetricsRecorder,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            client: self.client.clone(),
            snapshots: self.snapshots.clone(),
            metrics: self.metrics.clone(),
            limiter: Arc::clone(&self.limiter),
            config: self.config.clone(),
        }
    }
}

impl<S, C, Q, M> IngestionService<S, C, Q, M>
where
    S: IngestStore,
    C: ReviewFeedClient,
    Q: SnapshotEnqueuer,
    M: MetricsRecorder,
{
    /// Creates a service with default configuration.
    pub fn new(store: S, client: C, snapshots: Q, metrics: M) -> Self {
        Self::with_config(store, client, snapshots, metrics, IngestConfig::default())
    }

    /// Creates a service with custom configuration.
    pub fn with_config(
        store: S,
        client: C,
        snapshots: Q,
        metrics: M,
        config: IngestConfig,
    ) -> Self {
        let limiter = Arc::new(WorkspaceRateLimiter::new(config.rate_limit.clone()));
        Self {
            store,
            client,
            snapshots,
            metrics,
            limiter,
            config,
        }
    }

    /// The shared rate limiter, for callers that run many apps concurrently.
    pub fn limiter(&self) -> Arc<WorkspaceRateLimiter> {
        Arc::clone(&self.limiter)
    }

    /// Ingests one app without progress reporting or cancellation.
    pub async fn ingest(&self, app_id: Uuid, options: RunOptions) -> IngestionOutcome {
        self.ingest_with_progress(app_id, options, CancellationToken::new(), &SilentReporter)
            .await
    }

    /// Ingests one app with cancellation support.
    pub async fn ingest_cancellable(
        &self,
        app_id: Uuid,
        options: RunOptions,
        cancel: CancellationToken,
    ) -> IngestionOutcome {
        self.ingest_with_progress(app_id, options, cancel, &SilentReporter)
            .await
    }

    /// Ingests one app with progress reporting and cancellation support.
    ///
    /// This is the full pipeline; the other `ingest*` methods delegate
    /// here. Never returns an error: failures are folded into the outcome.
    pub async fn ingest_with_progress<R: IngestReporter>(
        &self,
        app_id: Uuid,
        options: RunOptions,
        cancel: CancellationToken,
        reporter: &R,
    ) -> IngestionOutcome {
        let started = Instant::now();

        // Load inputs and run the eligibility gate. Failures here happen
        // before any run record exists.
        let (app, workspace) = match self.prepare(app_id, &options).await {
            Ok(prep) => prep,
            Err(err) => {
                let duration_ms = started.elapsed().as_millis() as i64;
                tracing::info!(%app_id, code = err.code(), error = %err, "Ingestion rejected by eligibility gate");
                self.record_failure_metrics(app_id, duration_ms, err.code())
                    .await;
                return IngestionOutcome::failure(None, duration_ms, &err);
            }
        };

        if cancel.is_cancelled() {
            let duration_ms = started.elapsed().as_millis() as i64;
            return IngestionOutcome::failure(None, duration_ms, &AppError::Cancelled);
        }

        // Create the audit record. A store failure here leaves no run to
        // mark failed, so it is reported like a gate failure.
        let run = match self
            .store
            .create_run(NewRun {
                app_id: app.id,
                workspace_id: workspace.id,
                reason: options.reason,
            })
            .await
        {
            Ok(run) => run,
            Err(err) => {
                let duration_ms = started.elapsed().as_millis() as i64;
                tracing::error!(%app_id, error = %err, "Failed to create run record");
                self.record_failure_metrics(app_id, duration_ms, err.code())
                    .await;
                return IngestionOutcome::failure(None, duration_ms, &err);
            }
        };

        let mut sm = RunStateMachine::new(run.id);

        let pipeline = self
            .run_pipeline(&app, &workspace, &mut sm, cancel.clone(), reporter)
            .await;
        let duration_ms = started.elapsed().as_millis() as i64;

        match pipeline {
            Ok((counts, sources_processed)) => {
                self.finish_success(
                    &app,
                    &mut sm,
                    counts,
                    sources_processed,
                    duration_ms,
                    reporter,
                )
                .await
            }
            Err(err) if err.is_cancelled() => {
                self.finish_cancelled(&mut sm, duration_ms, reporter).await
            }
            Err(err) => {
                self.finish_failure(&app, &mut sm, duration_ms, err, reporter)
                    .await
            }
        }
    }

    /// Loads the app and workspace and runs the eligibility gate.
    async fn prepare(
        &self,
        app_id: Uuid,
        options: &RunOptions,
    ) -> Result<(TrackedApp, Workspace), AppError> {
        let app = self
            .store
            .get_app(app_id)
            .await?
            .ok_or_else(|| AppError::AppNotFound(app_id.to_string()))?;

        let workspace = self
            .store
            .get_workspace(app.workspace_id)
            .await?
            .ok_or_else(|| AppError::WorkspaceNotFound(app.workspace_id.to_string()))?;

        check_eligibility(
            &self.store,
            &self.limiter,
            &app,
            &workspace,
            options,
            Utc::now(),
        )
        .await?;

        Ok((app, workspace))
    }

    /// The fallible middle of the pipeline: start, aggregate, persist.
    async fn run_pipeline<R: IngestReporter>(
        &self,
        app: &TrackedApp,
        workspace: &Workspace,
        sm: &mut RunStateMachine,
        cancel: CancellationToken,
        reporter: &R,
    ) -> Result<(RunCounts, Vec<ReviewSort>), AppError> {
        // The in-memory machine leads the persisted status by one step, so
        // a store failure here still leaves a legal Processing -> Failed
        // transition for the failure handler.
        sm.transition(RunStatus::Processing);
        self.store.mark_run_started(sm.run_id()).await?;
        reporter.report(IngestEvent::RunStarted {
            app_id: app.id,
            run_id: sm.run_id(),
        });

        let total_limit = workspace.plan.limits().max_reviews_per_run;
        let aggregated = aggregate_sources(
            &self.client,
            &self.limiter,
            &self.config,
            workspace.id,
            &app.store_id,
            &app.country,
            total_limit,
            &cancel,
            reporter,
        )
        .await?;

        let written = write_reviews(
            &self.store,
            app.id,
            &aggregated.reviews,
            self.config.insert_chunk_size,
        )
        .await;
        reporter.report(IngestEvent::ReviewsPersisted {
            inserted: written.inserted,
            duplicates: aggregated.duplicates + written.duplicates,
            skipped: written.skipped,
        });

        let counts = RunCounts {
            fetched: aggregated.fetched,
            inserted: written.inserted,
            duplicates: aggregated.duplicates + written.duplicates,
            skipped: aggregated.skipped + written.skipped,
        };

        Ok((counts, aggregated.sources_processed))
    }

    /// Success path: terminal write, sync-state reset, snapshot, metrics.
    async fn finish_success<R: IngestReporter>(
        &self,
        app: &TrackedApp,
        sm: &mut RunStateMachine,
        counts: RunCounts,
        sources_processed: Vec<ReviewSort>,
        duration_ms: i64,
        reporter: &R,
    ) -> IngestionOutcome {
        sm.transition(RunStatus::Succeeded);
        let run_id = sm.run_id();

        let terminal = RunTerminal {
            status: RunStatus::Succeeded,
            counts,
            sources_processed,
            duration_ms,
            error_code: None,
            error_message: None,
        };
        if let Err(e) = self.store.finish_run(run_id, &terminal).await {
            tracing::warn!(%run_id, error = %e, "Failed to persist terminal run status");
        }

        let update = SyncStateUpdate::success(Utc::now());
        if let Err(e) = self.store.update_app_sync_state(app.id, &update).await {
            tracing::warn!(app_id = %app.id, error = %e, "Failed to reset app sync state");
        }

        let snapshot_id = self.trigger_snapshot(app.id, run_id).await;

        if let Err(e) = self
            .metrics
            .record_success(app.id, duration_ms, &counts)
            .await
        {
            tracing::warn!(app_id = %app.id, error = %e, "Metrics recording failed");
        }

        reporter.report(IngestEvent::RunFinished {
            run_id,
            status: RunStatus::Succeeded.as_str(),
            counts: &counts,
        });

        IngestionOutcome {
            success: true,
            run_id: Some(run_id),
            snapshot_id,
            reviews_fetched: counts.fetched,
            reviews_inserted: counts.inserted,
            duplicate_count: counts.duplicates,
            reviews_skipped: counts.skipped,
            duration_ms,
            error: None,
        }
    }

    /// Failure path: terminal write, backoff advance, metrics.
    async fn finish_failure<R: IngestReporter>(
        &self,
        app: &TrackedApp,
        sm: &mut RunStateMachine,
        duration_ms: i64,
        err: AppError,
        reporter: &R,
    ) -> IngestionOutcome {
        sm.transition(RunStatus::Failed);
        let run_id = sm.run_id();
        let run_error = RunError::from_app_error(&err);

        tracing::warn!(
            %run_id,
            app_id = %app.id,
            code = %run_error.code,
            error = %err,
            "Ingestion run failed"
        );

        let counts = RunCounts::default();
        let terminal = RunTerminal {
            status: RunStatus::Failed,
            counts,
            sources_processed: Vec::new(),
            duration_ms,
            error_code: Some(run_error.code.clone()),
            error_message: Some(run_error.message.clone()),
        };
        if let Err(e) = self.store.finish_run(run_id, &terminal).await {
            tracing::warn!(%run_id, error = %e, "Failed to persist terminal run status");
        }

        let failures = app.consecutive_failures + 1;
        let next_retry_at = self.config.backoff.next_retry_at(Utc::now(), failures);
        let update = SyncStateUpdate::failure(failures, next_retry_at, &run_error.message);
        if let Err(e) = self.store.update_app_sync_state(app.id, &update).await {
            tracing::warn!(app_id = %app.id, error = %e, "Failed to advance failure backoff");
        }

        self.record_failure_metrics(app.id, duration_ms, &run_error.code)
            .await;

        reporter.report(IngestEvent::RunFinished {
            run_id,
            status: RunStatus::Failed.as_str(),
            counts: &counts,
        });

        IngestionOutcome::failure(Some(run_id), duration_ms, &err)
    }

    /// Cancellation path: terminal write only, failure counter untouched.
    async fn finish_cancelled<R: IngestReporter>(
        &self,
        sm: &mut RunStateMachine,
        duration_ms: i64,
        reporter: &R,
    ) -> IngestionOutcome {
        sm.transition(RunStatus::Cancelled);
        let run_id = sm.run_id();
        tracing::info!(%run_id, "Ingestion run cancelled");

        let counts = RunCounts::default();
        let terminal = RunTerminal {
            status: RunStatus::Cancelled,
            counts,
            sources_processed: Vec::new(),
            duration_ms,
            error_code: None,
            error_message: None,
        };
        if let Err(e) = self.store.finish_run(run_id, &terminal).await {
            tracing::warn!(%run_id, error = %e, "Failed to persist terminal run status");
        }

        reporter.report(IngestEvent::RunFinished {
            run_id,
            status: RunStatus::Cancelled.as_str(),
            counts: &counts,
        });

        IngestionOutcome::failure(Some(run_id), duration_ms, &AppError::Cancelled)
    }

    /// Fire-and-continue snapshot trigger.
    ///
    /// Skipped when the app already has a pending or processing snapshot
    /// (advisory check, not a lock). Any failure here is logged and
    /// swallowed.
    async fn trigger_snapshot(&self, app_id: Uuid, run_id: Uuid) -> Option<Uuid> {
        match self.store.has_active_snapshot(app_id).await {
            Ok(true) => {
                tracing::info!(%app_id, "Skipping snapshot enqueue, one is already active");
                return None;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(%app_id, error = %e, "Active-snapshot check failed, enqueueing anyway");
            }
        }

        match self.snapshots.enqueue(app_id, run_id).await {
            Ok(Some(snapshot_id)) => {
                if let Err(e) = self.store.set_run_snapshot(run_id, snapshot_id).await {
                    tracing::warn!(%run_id, %snapshot_id, error = %e, "Failed to attach snapshot to run");
                }
                Some(snapshot_id)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(%app_id, %run_id, error = %e, "Snapshot enqueue failed");
                None
            }
        }
    }

    async fn record_failure_metrics(&self, app_id: Uuid, duration_ms: i64, code: &str) {
        if let Err(e) = self.metrics.record_failure(app_id, duration_ms, code).await {
            tracing::warn!(%app_id, error = %e, "Metrics recording failed");
        }
    }

    // =========================================================================
    // Batch ingestion
    // =========================================================================

    /// Ingests a list of configured apps sequentially with error isolation.
    ///
    /// A failure for one app never stops the others; cancellation stops the
    /// batch after the in-flight app winds down.
    pub async fn ingest_all<R: IngestReporter>(
        &self,
        apps: &[&AppEntry],
        options: RunOptions,
        cancel: CancellationToken,
        reporter: &R,
    ) -> BatchIngestSummary {
        let mut summary = BatchIngestSummary::default();
        let total = apps.len();

        reporter.report(IngestEvent::BatchStarted { total_apps: total });

        for (i, entry) in apps.iter().enumerate() {
            if cancel.is_cancelled() {
                reporter.report(IngestEvent::BatchCancelled {
                    completed_apps: i,
                    total_apps: total,
                });
                break;
            }

            let outcome = match self.store.get_app_by_store_id(&entry.store_id).await {
                Ok(Some(app)) => {
                    self.ingest_with_progress(
                        app.id,
                        options.clone(),
                        cancel.clone(),
                        reporter,
                    )
                    .await
                }
                Ok(None) => {
                    let err = AppError::AppNotFound(entry.store_id.clone());
                    tracing::warn!(
                        app = %entry.name,
                        store_id = %entry.store_id,
                        "Configured app is not tracked"
                    );
                    IngestionOutcome::failure(None, 0, &err)
                }
                Err(err) => IngestionOutcome::failure(None, 0, &err),
            };

            let cancelled = outcome.is_cancelled();
            reporter.report(IngestEvent::AppProcessed {
                app_index: i,
                total_apps: total,
                app_name: &entry.name,
                success: outcome.success,
            });
            summary.results.push(AppIngestResult {
                app_name: entry.name.clone(),
                store_id: entry.store_id.clone(),
                outcome,
            });

            if cancelled {
                reporter.report(IngestEvent::BatchCancelled {
                    completed_apps: i + 1,
                    total_apps: total,
                });
                break;
            }
        }

        summary
    }
}
