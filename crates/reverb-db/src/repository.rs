//! Ingest store for PostgreSQL.
//!
//! Implements the [`IngestStore`] trait with idempotent writes: review
//! inserts land with `ON CONFLICT DO NOTHING` on the natural key, and run
//! mutations are plain `UPDATE`s that are safe to retry.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres, QueryBuilder};
use uuid::Uuid;

use reverb_core::error::AppError;
use reverb_core::models::{
    AppStatus, NormalizedReview, PlanTier, ReviewSort, SyncStateUpdate, TrackedApp, Workspace,
};
use reverb_core::run::{IngestionRun, NewRun, RunCounts, RunReason, RunStatus, RunTerminal};
use reverb_core::traits::{IngestStore, InsertStats};

/// PostgreSQL implementation of the ingestion persistence boundary.
///
/// # Examples
///
/// ```no_run
/// use sqlx::postgres::PgPoolOptions;
/// use reverb_db::PgIngestStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = PgPoolOptions::new()
///     .max_connections(5)
///     .connect("postgresql://localhost/reverb")
///     .await?;
///
/// let store = PgIngestStore::new(pool);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PgIngestStore {
    pool: Pool<Postgres>,
}

impl PgIngestStore {
    /// Creates a store over the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// =============================================================================
// Helper types for database mapping
// =============================================================================

#[derive(sqlx::FromRow)]
struct AppRow {
    id: Uuid,
    workspace_id: Uuid,
    store_id: String,
    name: String,
    country: String,
    status: String,
    consecutive_failures: i32,
    next_retry_at: Option<DateTime<Utc>>,
    last_synced_at: Option<DateTime<Utc>>,
    last_failure_reason: Option<String>,
}

impl From<AppRow> for TrackedApp {
    fn from(row: AppRow) -> Self {
        Self {
            id: row.id,
            workspace_id: row.workspace_id,
            store_id: row.store_id,
            name: row.name,
            country: row.country,
            status: row.status.parse().unwrap_or(AppStatus::Paused),
            consecutive_failures: row.consecutive_failures.max(0) as u32,
            next_retry_at: row.next_retry_at,
            last_synced_at: row.last_synced_at,
            last_failure_reason: row.last_failure_reason,
        }
    }
}

#[derive(sqlx::FromRow)]
struct WorkspaceRow {
    id: Uuid,
    name: String,
    plan: String,
    deleted_at: Option<DateTime<Utc>>,
}

impl From<WorkspaceRow> for Workspace {
    fn from(row: WorkspaceRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            plan: row.plan.parse().unwrap_or(PlanTier::Free),
            deleted_at: row.deleted_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RunRow {
    id: Uuid,
    app_id: Uuid,
    workspace_id: Uuid,
    reason: String,
    status: String,
    requested_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    duration_ms: Option<i64>,
    reviews_fetched: i64,
    reviews_inserted: i64,
    duplicate_count: i64,
    reviews_skipped: i64,
    sources_processed: sqlx::types::Json<Vec<String>>,
    error_code: Option<String>,
    error_message: Option<String>,
    snapshot_id: Option<Uuid>,
}

impl From<RunRow> for IngestionRun {
    fn from(row: RunRow) -> Self {
        let sources_processed = row
            .sources_processed
            .0
            .iter()
            .filter_map(|s| s.parse::<ReviewSort>().ok())
            .collect();
        Self {
            id: row.id,
            app_id: row.app_id,
            workspace_id: row.workspace_id,
            reason: row.reason.parse().unwrap_or(RunReason::Scheduled),
            status: row.status.parse().unwrap_or(RunStatus::Pending),
            requested_at: row.requested_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
            duration_ms: row.duration_ms,
            counts: RunCounts {
                fetched: row.reviews_fetched.max(0) as u64,
                inserted: row.reviews_inserted.max(0) as u64,
                duplicates: row.duplicate_count.max(0) as u64,
                skipped: row.reviews_skipped.max(0) as u64,
            },
            sources_processed,
            error_code: row.error_code,
            error_message: row.error_message,
            snapshot_id: row.snapshot_id,
        }
    }
}

const RUN_COLUMNS: &str = "id, app_id, workspace_id, reason, status, requested_at, started_at, \
     finished_at, duration_ms, reviews_fetched, reviews_inserted, duplicate_count, \
     reviews_skipped, sources_processed, error_code, error_message, snapshot_id";

fn sources_json(sources: &[ReviewSort]) -> serde_json::Value {
    serde_json::Value::Array(
        sources
            .iter()
            .map(|s| serde_json::Value::String(s.as_str().to_string()))
            .collect(),
    )
}

// =============================================================================
// IngestStore trait implementation
// =============================================================================

impl IngestStore for PgIngestStore {
    async fn get_app(&self, app_id: Uuid) -> Result<Option<TrackedApp>, AppError> {
        let row: Option<AppRow> = sqlx::query_as(
            r#"
            SELECT id, workspace_id, store_id, name, country, status,
                   consecutive_failures, next_retry_at, last_synced_at, last_failure_reason
            FROM tracked_apps
            WHERE id = $1
            "#,
        )
        .bind(app_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn get_app_by_store_id(&self, store_id: &str) -> Result<Option<TrackedApp>, AppError> {
        let row: Option<AppRow> = sqlx::query_as(
            r#"
            SELECT id, workspace_id, store_id, name, country, status,
                   consecutive_failures, next_retry_at, last_synced_at, last_failure_reason
            FROM tracked_apps
            WHERE store_id = $1
            "#,
        )
        .bind(store_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn get_workspace(&self, workspace_id: Uuid) -> Result<Option<Workspace>, AppError> {
        let row: Option<WorkspaceRow> = sqlx::query_as(
            r#"
            SELECT id, name, plan, deleted_at
            FROM workspaces
            WHERE id = $1
            "#,
        )
        .bind(workspace_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn create_run(&self, run: NewRun) -> Result<IngestionRun, AppError> {
        let query = format!(
            "INSERT INTO ingestion_runs (app_id, workspace_id, reason) \
             VALUES ($1, $2, $3) RETURNING {RUN_COLUMNS}"
        );
        let row: RunRow = sqlx::query_as(&query)
            .bind(run.app_id)
            .bind(run.workspace_id)
            .bind(run.reason.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(row.into())
    }

    async fn mark_run_started(&self, run_id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE ingestion_runs
            SET status = 'processing', started_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn finish_run(&self, run_id: Uuid, terminal: &RunTerminal) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE ingestion_runs
            SET status = $2,
                finished_at = NOW(),
                duration_ms = $3,
                reviews_fetched = $4,
                reviews_inserted = $5,
                duplicate_count = $6,
                reviews_skipped = $7,
                sources_processed = $8,
                error_code = $9,
                error_message = $10
            WHERE id = $1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(run_id)
        .bind(terminal.status.as_str())
        .bind(terminal.duration_ms)
        .bind(terminal.counts.fetched as i64)
        .bind(terminal.counts.inserted as i64)
        .bind(terminal.counts.duplicates as i64)
        .bind(terminal.counts.skipped as i64)
        .bind(sources_json(&terminal.sources_processed))
        .bind(&terminal.error_code)
        .bind(&terminal.error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_run_snapshot(&self, run_id: Uuid, snapshot_id: Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE ingestion_runs SET snapshot_id = $2 WHERE id = $1")
            .bind(run_id)
            .bind(snapshot_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn batch_insert_reviews(
        &self,
        app_id: Uuid,
        reviews: &[NormalizedReview],
    ) -> Result<InsertStats, AppError> {
        if reviews.is_empty() {
            return Ok(InsertStats::default());
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO reviews (app_id, external_id, rating, title, content, author, \
             app_version, country, language, published_at, vote_sum, vote_count, source) ",
        );
        builder.push_values(reviews, |mut b, review| {
            b.push_bind(app_id)
                .push_bind(&review.external_id)
                .push_bind(review.rating)
                .push_bind(&review.title)
                .push_bind(&review.content)
                .push_bind(&review.author)
                .push_bind(&review.app_version)
                .push_bind(&review.country)
                .push_bind(&review.language)
                .push_bind(review.published_at)
                .push_bind(review.vote_sum)
                .push_bind(review.vote_count)
                .push_bind(review.source.as_str());
        });
        builder.push(" ON CONFLICT (app_id, external_id) DO NOTHING");

        let result = builder.build().execute(&self.pool).await?;

        let inserted = result.rows_affected();
        Ok(InsertStats {
            inserted,
            duplicates: reviews.len() as u64 - inserted,
        })
    }

    async fn update_app_sync_state(
        &self,
        app_id: Uuid,
        update: &SyncStateUpdate,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE tracked_apps
            SET consecutive_failures = $2,
                next_retry_at = $3,
                last_failure_reason = $4,
                last_synced_at = COALESCE($5, last_synced_at)
            WHERE id = $1
            "#,
        )
        .bind(app_id)
        .bind(update.consecutive_failures as i32)
        .bind(update.next_retry_at)
        .bind(&update.last_failure_reason)
        .bind(update.last_synced_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn count_runs_in_period(
        &self,
        workspace_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64, AppError> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM ingestion_runs
            WHERE workspace_id = $1
              AND status = 'succeeded'
              AND requested_at >= $2
            "#,
        )
        .bind(workspace_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.0)
    }

    async fn has_active_snapshot(&self, app_id: Uuid) -> Result<bool, AppError> {
        let exists: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM snapshots
                WHERE app_id = $1 AND status IN ('pending', 'processing')
            )
            "#,
        )
        .bind(app_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists.0)
    }

    async fn list_recent_runs(&self, limit: i64) -> Result<Vec<IngestionRun>, AppError> {
        let query = format!(
            "SELECT {RUN_COLUMNS} FROM ingestion_runs ORDER BY requested_at DESC LIMIT $1"
        );
        let rows: Vec<RunRow> = sqlx::query_as(&query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
