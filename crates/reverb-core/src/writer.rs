//! Chunked idempotent persistence of normalized reviews.
//!
//! Inserts run in fixed-size chunks to bound memory and per-call payload
//! size. Natural-key conflicts are counted as duplicates by the store; a
//! chunk that fails outright is logged, counted as skipped, and does not
//! abort the remaining chunks.

use uuid::Uuid;

use crate::models::NormalizedReview;
use crate::traits::IngestStore;

/// Counts returned by one persistence pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Rows newly inserted.
    pub inserted: u64,
    /// Rows skipped because the natural key already existed.
    pub duplicates: u64,
    /// Reviews lost to failed insert chunks.
    pub skipped: u64,
}

/// Persists the deduplicated review list for an app.
pub async fn write_reviews<S: IngestStore>(
    store: &S,
    app_id: Uuid,
    reviews: &[NormalizedReview],
    chunk_size: usize,
) -> WriteOutcome {
    let mut outcome = WriteOutcome::default();

    for chunk in reviews.chunks(chunk_size.max(1)) {
        match store.batch_insert_reviews(app_id, chunk).await {
            Ok(stats) => {
                outcome.inserted += stats.inserted;
                outcome.duplicates += stats.duplicates;
            }
            Err(err) => {
                tracing::warn!(
                    %app_id,
                    chunk_len = chunk.len(),
                    error = %err,
                    "Review insert chunk failed, continuing with remaining chunks"
                );
                outcome.skipped += chunk.len() as u64;
            }
        }
    }

    outcome
}
