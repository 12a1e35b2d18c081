//! Multi-source fan-out and deduplication.
//!
//! Runs the source fetcher once per configured sort order with bounded
//! concurrency, merges the results, and deduplicates by external id. A
//! single source failing does not abort the run; only a total failure of
//! every source does. Dedup ties are broken by the fixed sort-order
//! priority, never by completion order, so the merged set is deterministic
//! under concurrent fetches.

use std::collections::HashSet;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::error::AppError;
use crate::fetcher::{SourceFetchResult, SourceLimits, fetch_source};
use crate::models::{NormalizedReview, ReviewSort};
use crate::progress::{IngestEvent, IngestReporter};
use crate::rate_limit::WorkspaceRateLimiter;
use crate::traits::ReviewFeedClient;

/// A source's failure, recorded without aborting the run.
#[derive(Debug)]
pub struct SourceError {
    /// Which sort order failed.
    pub source: ReviewSort,
    /// Stable error code.
    pub code: &'static str,
    /// Human-readable message.
    pub message: String,
}

/// Merged result of fetching all configured sources.
#[derive(Debug)]
pub struct AggregateOutcome {
    /// Deduplicated reviews, highest-priority source first, truncated to
    /// the overall record cap.
    pub reviews: Vec<NormalizedReview>,
    /// Feed entries considered across all sources (valid and rejected).
    pub fetched: u64,
    /// Cross-source overlap dropped during the merge.
    pub duplicates: u64,
    /// Normalization rejects plus overall-cap truncation.
    pub skipped: u64,
    /// Sources that returned data.
    pub sources_processed: Vec<ReviewSort>,
    /// Failures from individual sources.
    pub errors: Vec<SourceError>,
}

/// Fetches every configured sort order and merges the results.
///
/// # Errors
///
/// Returns an error only when cancelled or when *all* sources failed; in
/// the latter case the error from the highest-priority source is surfaced.
#[allow(clippy::too_many_arguments)]
pub async fn aggregate_sources<C, R>(
    client: &C,
    limiter: &WorkspaceRateLimiter,
    config: &IngestConfig,
    workspace_id: Uuid,
    store_id: &str,
    country: &str,
    total_limit: u32,
    cancel: &CancellationToken,
    reporter: &R,
) -> Result<AggregateOutcome, AppError>
where
    C: ReviewFeedClient,
    R: IngestReporter,
{
    let limits = SourceLimits {
        page_cap: config.page_cap,
        record_cap: config.per_source_cap(total_limit),
        page_delay: config.page_delay,
    };

    let results: Vec<(ReviewSort, Result<SourceFetchResult, AppError>)> =
        stream::iter(config.sorts.clone())
            .map(|sort| {
                let cancel = cancel.clone();
                async move {
                    let result = fetch_source(
                        client,
                        limiter,
                        &config.retry,
                        workspace_id,
                        store_id,
                        country,
                        sort,
                        limits,
                        &cancel,
                    )
                    .await;
                    (sort, result)
                }
            })
            .buffer_unordered(config.source_concurrency.max(1))
            .collect()
            .await;

    let mut successes: Vec<SourceFetchResult> = Vec::new();
    let mut failures: Vec<(ReviewSort, AppError)> = Vec::new();

    for (sort, result) in results {
        match result {
            Ok(fetched) => {
                reporter.report(IngestEvent::SourceCompleted {
                    source: sort,
                    reviews: fetched.reviews.len(),
                    pages: fetched.pages_walked,
                });
                successes.push(fetched);
            }
            Err(err) if err.is_cancelled() => return Err(AppError::Cancelled),
            Err(err) => {
                tracing::warn!(
                    source = %sort,
                    code = err.code(),
                    error = %err,
                    "Source fetch failed, continuing with remaining sources"
                );
                reporter.report(IngestEvent::SourceFailed {
                    source: sort,
                    code: err.code(),
                    message: &err.to_string(),
                });
                failures.push((sort, err));
            }
        }
    }

    if successes.is_empty() {
        // Total failure: surface the highest-priority source's error.
        failures.sort_by_key(|(sort, _)| sort.priority());
        return match failures.into_iter().next() {
            Some((_, err)) => Err(err),
            None => Err(AppError::Generic("no sources configured".to_string())),
        };
    }

    // Merge in fixed priority order so ties are deterministic regardless of
    // which fetch finished first.
    successes.sort_by_key(|result| result.source.priority());

    let mut fetched: u64 = 0;
    let mut skipped: u64 = 0;
    let mut duplicates: u64 = 0;
    let mut sources_processed = Vec::with_capacity(successes.len());
    let mut seen: HashSet<String> = HashSet::new();
    let mut merged: Vec<NormalizedReview> = Vec::new();

    for result in successes {
        fetched += (result.reviews.len() + result.rejected) as u64;
        skipped += result.rejected as u64;
        sources_processed.push(result.source);

        for review in result.reviews {
            if seen.insert(review.external_id.clone()) {
                merged.push(review);
            } else {
                duplicates += 1;
            }
        }
    }

    if merged.len() > total_limit as usize {
        let truncated = merged.len() - total_limit as usize;
        tracing::debug!(truncated, total_limit, "Truncating merged reviews to cap");
        skipped += truncated as u64;
        merged.truncate(total_limit as usize);
    }

    let errors = failures
        .into_iter()
        .map(|(source, err)| SourceError {
            source,
            code: err.code(),
            message: err.to_string(),
        })
        .collect();

    Ok(AggregateOutcome {
        reviews: merged,
        fetched,
        duplicates,
        skipped,
        sources_processed,
        errors,
    })
}
