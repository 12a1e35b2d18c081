//! Domain models for tracked apps, workspaces, and normalized reviews.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

// =============================================================================
// App status
// =============================================================================

/// Lifecycle status of a tracked app.
///
/// Status changes are administrative actions outside the ingestion pipeline;
/// the orchestrator only reads them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    /// App is tracked and eligible for ingestion.
    Active,
    /// Tracking temporarily suspended by the workspace.
    Paused,
    /// App removed from tracking; retained for history.
    Archived,
}

impl AppStatus {
    /// Returns the string representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            AppStatus::Active => "active",
            AppStatus::Paused => "paused",
            AppStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AppStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AppStatus::Active),
            "paused" => Ok(AppStatus::Paused),
            "archived" => Ok(AppStatus::Archived),
            other => Err(AppError::Generic(format!("invalid app status: {other}"))),
        }
    }
}

// =============================================================================
// Review sort orders
// =============================================================================

/// One upstream listing view of an app's reviews.
///
/// The feed exposes the same reviews under different sort orders; the
/// aggregator fetches each configured order and merges the overlap. The
/// variant order here is also the fixed dedup priority: when the same
/// review id appears under two sorts in one run, the entry fetched through
/// the earlier variant wins, regardless of which fetch completed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReviewSort {
    /// Reviews ranked by helpfulness votes.
    MostHelpful,
    /// Reviews in reverse chronological order.
    MostRecent,
}

impl ReviewSort {
    /// Returns the string representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewSort::MostHelpful => "mostHelpful",
            ReviewSort::MostRecent => "mostRecent",
        }
    }

    /// Returns the `sortby` path segment used in feed URLs.
    pub fn feed_param(&self) -> &'static str {
        match self {
            ReviewSort::MostHelpful => "mosthelpful",
            ReviewSort::MostRecent => "mostrecent",
        }
    }

    /// Dedup priority; lower wins.
    pub fn priority(&self) -> u8 {
        match self {
            ReviewSort::MostHelpful => 0,
            ReviewSort::MostRecent => 1,
        }
    }
}

impl fmt::Display for ReviewSort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ReviewSort {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mostHelpful" | "mosthelpful" => Ok(ReviewSort::MostHelpful),
            "mostRecent" | "mostrecent" => Ok(ReviewSort::MostRecent),
            other => Err(AppError::Generic(format!("invalid review sort: {other}"))),
        }
    }
}

// =============================================================================
// Tracked app
// =============================================================================

/// An app whose reviews are ingested on a recurring basis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedApp {
    /// Internal identifier.
    pub id: Uuid,

    /// Owning workspace.
    pub workspace_id: Uuid,

    /// External catalog identifier on the upstream store.
    pub store_id: String,

    /// Display name.
    pub name: String,

    /// Storefront country code used when building feed URLs.
    pub country: String,

    /// Current lifecycle status.
    pub status: AppStatus,

    /// Consecutive failed ingestion runs; reset on success.
    pub consecutive_failures: u32,

    /// Earliest time the next automatic ingestion may start, if backing off.
    pub next_retry_at: Option<DateTime<Utc>>,

    /// Completion time of the last successful ingestion.
    pub last_synced_at: Option<DateTime<Utc>>,

    /// Human-readable reason from the last failed run.
    pub last_failure_reason: Option<String>,
}

// =============================================================================
// Workspace
// =============================================================================

/// Subscription tier of a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    /// Free tier with tight limits.
    #[default]
    Free,
    /// Paid tier for individual teams.
    Pro,
    /// High-volume tier.
    Scale,
}

impl PlanTier {
    /// Returns the string representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Pro => "pro",
            PlanTier::Scale => "scale",
        }
    }

    /// Resource limits attached to this tier.
    pub fn limits(&self) -> PlanLimits {
        match self {
            PlanTier::Free => PlanLimits {
                max_reviews_per_run: 200,
                max_runs_per_period: 4,
            },
            PlanTier::Pro => PlanLimits {
                max_reviews_per_run: 1000,
                max_runs_per_period: 60,
            },
            PlanTier::Scale => PlanLimits {
                max_reviews_per_run: 5000,
                max_runs_per_period: 600,
            },
        }
    }
}

impl FromStr for PlanTier {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(PlanTier::Free),
            "pro" => Ok(PlanTier::Pro),
            "scale" => Ok(PlanTier::Scale),
            other => Err(AppError::Generic(format!("invalid plan tier: {other}"))),
        }
    }
}

/// Resource limits for a plan tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimits {
    /// Overall record cap for a single ingestion run.
    pub max_reviews_per_run: u32,
    /// Maximum successful ingestion runs per billing period.
    pub max_runs_per_period: i64,
}

/// The billing and isolation boundary that owns tracked apps.
///
/// Read-only input to the ingestion pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    /// Internal identifier.
    pub id: Uuid,

    /// Display name.
    pub name: String,

    /// Subscription tier, which determines quotas.
    pub plan: PlanTier,

    /// Soft-delete marker; a deleted workspace must never be ingested for.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Workspace {
    /// Returns true if the workspace has been soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

// =============================================================================
// Normalized review
// =============================================================================

/// A review entry normalized from the upstream feed format.
///
/// `external_id` is the natural key: unique per tracked app regardless of
/// which sort order the review was discovered through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedReview {
    /// Upstream-assigned review identifier.
    pub external_id: String,

    /// Star rating, always within `[1, 5]` after normalization.
    pub rating: i32,

    /// Review title, if present.
    pub title: Option<String>,

    /// Review body text.
    pub content: String,

    /// Author nickname, if present.
    pub author: Option<String>,

    /// App version the review was written against.
    pub app_version: Option<String>,

    /// Storefront country the review was fetched from.
    pub country: String,

    /// Review language, when the feed exposes it.
    pub language: Option<String>,

    /// Publication timestamp reported by the feed.
    pub published_at: DateTime<Utc>,

    /// Sum of helpfulness votes.
    pub vote_sum: i64,

    /// Total helpfulness votes cast.
    pub vote_count: i64,

    /// Sort order this entry was discovered through.
    pub source: ReviewSort,
}

/// One parsed page of the upstream review feed.
#[derive(Debug, Clone)]
pub struct FeedPage {
    /// Successfully normalized entries, in feed order.
    pub reviews: Vec<NormalizedReview>,

    /// Entries dropped during normalization (rating missing or out of range).
    pub rejected: usize,

    /// Page number to fetch next, if the feed advertised one.
    pub next_page: Option<u32>,
}

/// Parameters identifying a single feed page request.
#[derive(Debug, Clone)]
pub struct FeedRequest {
    /// External catalog identifier of the app.
    pub store_id: String,
    /// Storefront country code.
    pub country: String,
    /// Listing sort order.
    pub sort: ReviewSort,
    /// 1-based page number.
    pub page: u32,
}

// =============================================================================
// Sync state updates
// =============================================================================

/// Mutation applied to a tracked app's sync bookkeeping after a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStateUpdate {
    /// New consecutive failure count.
    pub consecutive_failures: u32,
    /// New backoff deadline, cleared on success.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// New failure reason, cleared on success.
    pub last_failure_reason: Option<String>,
    /// Success timestamp; `None` leaves the stored value untouched.
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl SyncStateUpdate {
    /// Builds the update applied after a successful run.
    pub fn success(now: DateTime<Utc>) -> Self {
        Self {
            consecutive_failures: 0,
            next_retry_at: None,
            last_failure_reason: None,
            last_synced_at: Some(now),
        }
    }

    /// Builds the update applied after a failed run.
    pub fn failure(
        consecutive_failures: u32,
        next_retry_at: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            consecutive_failures,
            next_retry_at: Some(next_retry_at),
            last_failure_reason: Some(reason.into()),
            last_synced_at: None,
        }
    }
}
