//! Pagination driver for one review listing.
//!
//! Walks a single sort order page by page through a [`ReviewFeedClient`].
//! Pages are strictly sequential: the next-page pointer comes from the
//! previous response. Every round-trip consumes a rate-limiter permit and
//! runs under the bounded retry wrapper; every inter-page delay is
//! cancellable.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{FeedRequest, NormalizedReview, ReviewSort};
use crate::rate_limit::WorkspaceRateLimiter;
use crate::retry::{RetryPolicy, with_retry};
use crate::traits::ReviewFeedClient;

/// Limits applied to one source walk.
#[derive(Debug, Clone, Copy)]
pub struct SourceLimits {
    /// Maximum pages to fetch.
    pub page_cap: u32,
    /// Maximum normalized reviews to collect.
    pub record_cap: u32,
    /// Minimum delay before every page after the first.
    pub page_delay: Duration,
}

/// Result of walking one source to exhaustion or a cap.
#[derive(Debug, Clone)]
pub struct SourceFetchResult {
    /// Sort order that was walked.
    pub source: ReviewSort,
    /// Normalized reviews in feed order, truncated to the record cap.
    pub reviews: Vec<NormalizedReview>,
    /// Pages actually fetched.
    pub pages_walked: u32,
    /// Entries dropped during normalization.
    pub rejected: usize,
}

/// Fetches one sort order for an app.
///
/// Stops when the feed stops advertising a next page, the page cap is
/// reached, or the record cap is reached. A 404 or 429 from any page aborts
/// the source immediately without consuming retry budget; transient
/// failures are retried per `policy` before giving up.
#[allow(clippy::too_many_arguments)]
pub async fn fetch_source<C: ReviewFeedClient>(
    client: &C,
    limiter: &WorkspaceRateLimiter,
    policy: &RetryPolicy,
    workspace_id: Uuid,
    store_id: &str,
    country: &str,
    sort: ReviewSort,
    limits: SourceLimits,
    cancel: &CancellationToken,
) -> Result<SourceFetchResult, AppError> {
    let mut reviews: Vec<NormalizedReview> = Vec::new();
    let mut rejected = 0usize;
    let mut pages_walked = 0u32;
    let mut page = 1u32;

    loop {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        if pages_walked > 0 {
            tokio::select! {
                _ = tokio::time::sleep(limits.page_delay) => {}
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
            }
        }

        // One permit per network round-trip, shared across concurrent
        // sources and runs for the same workspace.
        limiter.acquire(workspace_id)?;

        let request = FeedRequest {
            store_id: store_id.to_string(),
            country: country.to_string(),
            sort,
            page,
        };

        let fetched = with_retry(policy, cancel, |_| client.fetch_page(&request)).await?;
        pages_walked += 1;
        rejected += fetched.rejected;

        let remaining = limits.record_cap as usize - reviews.len();
        let taking = fetched.reviews.len().min(remaining);
        reviews.extend(fetched.reviews.into_iter().take(taking));

        tracing::debug!(
            source = %sort,
            page,
            collected = reviews.len(),
            record_cap = limits.record_cap,
            "Fetched feed page"
        );

        let next = match fetched.next_page {
            Some(next) => next,
            None => break,
        };
        if pages_walked >= limits.page_cap || reviews.len() >= limits.record_cap as usize {
            break;
        }
        page = next;
    }

    Ok(SourceFetchResult {
        source: sort,
        reviews,
        pages_walked,
        rejected,
    })
}
