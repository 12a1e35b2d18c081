use std::time::Duration;

use thiserror::Error;

/// Application-wide error types.
///
/// Every failure that can occur during review ingestion is represented by a
/// variant of this enum, produced at the point of failure (HTTP status code,
/// transport error, eligibility check). Classification helpers below drive
/// retry decisions and the error code written into failed run records, so no
/// code path ever needs to inspect error message strings.
///
/// # Error Conversion
///
/// Library errors convert automatically via `#[from]`:
/// - `sqlx::Error` → `AppError::Database`
/// - `serde_json::Error` → `AppError::Serialization`
#[derive(Error, Debug)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client could not be built or the request could not be issued.
    #[error("Client error: {0}")]
    Client(String),

    /// Network or connection error while talking to the upstream feed.
    #[error("Network error: {0}")]
    Network(String),

    /// Upstream request exceeded the configured timeout.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Upstream returned a non-2xx status that is neither 404 nor 429.
    #[error("Upstream returned HTTP {status}")]
    UpstreamStatus {
        /// The HTTP status code received.
        status: u16,
    },

    /// The app does not exist on the upstream store (HTTP 404).
    #[error("App not found upstream")]
    AppNotFoundUpstream,

    /// The upstream store rate-limited this call (HTTP 429).
    ///
    /// Carries the provider-supplied `Retry-After` hint, or a default.
    #[error("Upstream rate limited, retry after {}s", retry_after.as_secs())]
    RateLimitedUpstream {
        /// How long the upstream asked us to wait.
        retry_after: Duration,
    },

    /// The workspace exhausted its own outbound call budget.
    #[error("Workspace rate limit reached")]
    RateLimited,

    /// The app is paused or archived and must not be ingested.
    #[error("App is not active (status: {0})")]
    AppNotActive(String),

    /// The owning workspace has been soft-deleted.
    #[error("Workspace has been deleted")]
    WorkspaceDeleted,

    /// The app is still inside its failure backoff window.
    #[error("Ingestion cooldown active, {remaining_secs}s remaining")]
    CooldownActive {
        /// Seconds until `next_retry_at` elapses.
        remaining_secs: i64,
    },

    /// The workspace used up its ingestion run quota for the current period.
    #[error("Ingestion quota exceeded ({used} of {limit} runs this period)")]
    QuotaExceeded {
        /// Runs already counted against the quota.
        used: i64,
        /// The plan limit.
        limit: i64,
    },

    /// No tracked app exists for the given identifier.
    #[error("App not found: {0}")]
    AppNotFound(String),

    /// No workspace exists for the given identifier.
    #[error("Workspace not found: {0}")]
    WorkspaceNotFound(String),

    /// The retry budget for a single call was exhausted.
    ///
    /// Wraps the last error observed so its context is not lost.
    #[error("Retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Total attempts made, including the first.
        attempts: u32,
        /// The error returned by the final attempt.
        source: Box<AppError>,
    },

    /// The run was cancelled via its cancellation token.
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration file error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic application error for cases not covered by specific variants.
    ///
    /// Use sparingly - prefer a dedicated variant.
    #[error("Error: {0}")]
    Generic(String),
}

impl AppError {
    /// Returns the stable error code for this error.
    ///
    /// These codes form a closed set: they are persisted on failed run
    /// records and returned to callers in [`crate::ingest::RunError`], so
    /// downstream consumers can match on them without parsing messages.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Client(_) => "CLIENT_ERROR",
            AppError::Network(_) => "NETWORK_ERROR",
            AppError::Timeout(_) => "TIMEOUT",
            AppError::UpstreamStatus { .. } => "UPSTREAM_ERROR",
            AppError::AppNotFoundUpstream => "APP_NOT_FOUND",
            AppError::RateLimitedUpstream { .. } => "RATE_LIMITED_UPSTREAM",
            AppError::RateLimited => "RATE_LIMITED",
            AppError::AppNotActive(_) => "APP_NOT_ACTIVE",
            AppError::WorkspaceDeleted => "WORKSPACE_DELETED",
            AppError::CooldownActive { .. } => "COOLDOWN_ACTIVE",
            AppError::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            AppError::AppNotFound(_) => "APP_NOT_FOUND",
            AppError::WorkspaceNotFound(_) => "WORKSPACE_NOT_FOUND",
            AppError::RetriesExhausted { .. } => "RETRIES_EXHAUSTED",
            AppError::Cancelled => "CANCELLED",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Generic(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns true if the in-place retry wrapper may re-attempt this call.
    ///
    /// Only transport failures, timeouts, and 5xx-class responses qualify.
    /// A 404 is final for the app; a 429 must propagate immediately so the
    /// retry budget is not burned waiting out an upstream rate limit.
    pub fn is_retryable_in_place(&self) -> bool {
        matches!(
            self,
            AppError::Network(_) | AppError::Timeout(_) | AppError::UpstreamStatus { .. }
        )
    }

    /// Returns true if a later scheduled attempt could plausibly succeed.
    ///
    /// Distinct from [`is_retryable_in_place`](Self::is_retryable_in_place):
    /// rate limits and exhausted retry budgets fail the current run, but the
    /// next scheduled run (after the backoff window) may still succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Network(_)
            | AppError::Timeout(_)
            | AppError::UpstreamStatus { .. }
            | AppError::RateLimited
            | AppError::RateLimitedUpstream { .. }
            | AppError::CooldownActive { .. } => true,
            AppError::RetriesExhausted { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Returns true if this error was caused by cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            AppError::Cancelled => true,
            AppError::RetriesExhausted { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}
