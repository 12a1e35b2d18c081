//! Snapshot queue for PostgreSQL.
//!
//! The downstream analysis worker polls the `snapshots` table; enqueueing
//! is a single insert. Failures are the caller's to swallow: the
//! orchestrator treats snapshot enqueueing as fire-and-continue.

use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use reverb_core::error::AppError;
use reverb_core::traits::SnapshotEnqueuer;

/// PostgreSQL implementation of the downstream analysis boundary.
#[derive(Clone)]
pub struct PgSnapshotQueue {
    pool: Pool<Postgres>,
}

impl PgSnapshotQueue {
    /// Creates a queue over the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl SnapshotEnqueuer for PgSnapshotQueue {
    async fn enqueue(&self, app_id: Uuid, run_id: Uuid) -> Result<Option<Uuid>, AppError> {
        let row: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO snapshots (app_id, run_id, status)
            VALUES ($1, $2, 'pending')
            RETURNING id
            "#,
        )
        .bind(app_id)
        .bind(run_id)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(%app_id, %run_id, snapshot_id = %row.0, "Snapshot enqueued");
        Ok(Some(row.0))
    }
}
