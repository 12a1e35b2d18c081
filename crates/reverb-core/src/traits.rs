//! Trait definitions for external dependencies.
//!
//! This module defines traits that abstract over external collaborators
//! (the upstream review feed, the persistent store, the downstream analysis
//! queue, metrics), enabling:
//!
//! - **Testability**: mock implementations for unit and integration tests
//! - **Flexibility**: different backends behind the same orchestrator
//! - **Decoupling**: the pipeline never depends on concrete I/O types

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{FeedPage, FeedRequest, NormalizedReview, SyncStateUpdate, TrackedApp, Workspace};
use crate::run::{IngestionRun, NewRun, RunTerminal};

/// Client for the upstream paginated review feed.
///
/// Implementations fetch and normalize exactly one page per call; the
/// pagination loop, retry wrapper, and rate limiting live in the core
/// pipeline, which owns all cross-call policy.
pub trait ReviewFeedClient: Send + Sync + Clone {
    /// Fetches and normalizes a single feed page.
    ///
    /// # Errors
    ///
    /// Classified at the point of failure: 404 maps to
    /// [`AppError::AppNotFoundUpstream`], 429 to
    /// [`AppError::RateLimitedUpstream`] (with the provider's Retry-After
    /// hint when present), other non-2xx to [`AppError::UpstreamStatus`],
    /// transport failures to [`AppError::Network`] or [`AppError::Timeout`].
    fn fetch_page(
        &self,
        request: &FeedRequest,
    ) -> impl Future<Output = Result<FeedPage, AppError>> + Send;
}

/// Number of rows inserted and skipped-as-duplicate by one batch insert.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InsertStats {
    /// Rows newly inserted.
    pub inserted: u64,
    /// Rows skipped because the natural key already existed.
    pub duplicates: u64,
}

/// Persistence boundary for the ingestion pipeline.
///
/// Every operation must be idempotent or safely retryable from the
/// orchestrator's perspective.
pub trait IngestStore: Send + Sync + Clone {
    /// Loads a tracked app by internal id.
    fn get_app(
        &self,
        app_id: Uuid,
    ) -> impl Future<Output = Result<Option<TrackedApp>, AppError>> + Send;

    /// Loads a tracked app by its external store identifier.
    fn get_app_by_store_id(
        &self,
        store_id: &str,
    ) -> impl Future<Output = Result<Option<TrackedApp>, AppError>> + Send;

    /// Loads a workspace by id.
    fn get_workspace(
        &self,
        workspace_id: Uuid,
    ) -> impl Future<Output = Result<Option<Workspace>, AppError>> + Send;

    /// Creates a run record in `pending` status.
    fn create_run(
        &self,
        run: NewRun,
    ) -> impl Future<Output = Result<IngestionRun, AppError>> + Send;

    /// Marks a pending run as `processing` and stamps `started_at`.
    fn mark_run_started(
        &self,
        run_id: Uuid,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Writes the single terminal update for a run.
    fn finish_run(
        &self,
        run_id: Uuid,
        terminal: &RunTerminal,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Attaches the enqueued snapshot to a succeeded run.
    fn set_run_snapshot(
        &self,
        run_id: Uuid,
        snapshot_id: Uuid,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Idempotently inserts a batch of normalized reviews.
    ///
    /// A natural-key conflict (same app, same external id) skips the row
    /// and counts it as a duplicate rather than erroring.
    fn batch_insert_reviews(
        &self,
        app_id: Uuid,
        reviews: &[NormalizedReview],
    ) -> impl Future<Output = Result<InsertStats, AppError>> + Send;

    /// Applies a sync-state mutation to a tracked app.
    fn update_app_sync_state(
        &self,
        app_id: Uuid,
        update: &SyncStateUpdate,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Counts succeeded runs for a workspace since the given instant.
    ///
    /// Used by the eligibility gate's quota check.
    fn count_runs_in_period(
        &self,
        workspace_id: Uuid,
        since: DateTime<Utc>,
    ) -> impl Future<Output = Result<i64, AppError>> + Send;

    /// Advisory check: does the app already have a pending or processing
    /// downstream snapshot?
    fn has_active_snapshot(
        &self,
        app_id: Uuid,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Lists the most recent runs, newest first.
    fn list_recent_runs(
        &self,
        limit: i64,
    ) -> impl Future<Output = Result<Vec<IngestionRun>, AppError>> + Send;
}

/// Downstream analysis boundary.
///
/// Fire-and-continue from the orchestrator's perspective: a failure here is
/// logged and swallowed, never failing the ingestion run.
pub trait SnapshotEnqueuer: Send + Sync + Clone {
    /// Enqueues an analysis snapshot for the given run.
    ///
    /// Returns the snapshot id, or `None` for implementations that discard
    /// snapshots (tests, snapshot-disabled deployments).
    fn enqueue(
        &self,
        app_id: Uuid,
        run_id: Uuid,
    ) -> impl Future<Output = Result<Option<Uuid>, AppError>> + Send;
}

/// No-op snapshot enqueuer for tests and snapshot-disabled deployments.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSnapshotEnqueuer;

impl SnapshotEnqueuer for NoopSnapshotEnqueuer {
    async fn enqueue(&self, _app_id: Uuid, _run_id: Uuid) -> Result<Option<Uuid>, AppError> {
        Ok(None)
    }
}
