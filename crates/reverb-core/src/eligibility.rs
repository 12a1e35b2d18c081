//! Pre-flight eligibility checks for an ingestion run.
//!
//! Every check is a purely advisory read and fails fast with a distinct
//! error variant; nothing here mutates state or touches the network. The
//! gate runs before the run record is created, so an ineligible app never
//! produces a run.

use chrono::{DateTime, Datelike, TimeZone, Utc};

use crate::error::AppError;
use crate::models::{AppStatus, TrackedApp, Workspace};
use crate::rate_limit::WorkspaceRateLimiter;
use crate::run::RunReason;
use crate::traits::IngestStore;

/// Caller-supplied options for one ingestion run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Why the run was requested.
    pub reason: RunReason,
    /// Internal hook: skip the quota check (test and support tooling only).
    pub bypass_quota: bool,
}

impl RunOptions {
    /// Options for a manually triggered run.
    pub fn manual() -> Self {
        Self {
            reason: RunReason::Manual,
            ..Default::default()
        }
    }

    /// Options for a scheduler-triggered run.
    pub fn scheduled() -> Self {
        Self {
            reason: RunReason::Scheduled,
            ..Default::default()
        }
    }

    /// Skips the quota check.
    pub fn with_quota_bypass(mut self) -> Self {
        self.bypass_quota = true;
        self
    }
}

/// Start of the quota period containing `now` (calendar month, UTC).
pub fn period_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

/// Runs the ordered eligibility checks for an app.
///
/// Check order (each fails fast):
/// 1. App must be active (not paused or archived).
/// 2. Workspace must not be soft-deleted.
/// 3. The failure backoff window must have elapsed.
/// 4. The workspace's run quota for the current period must allow one more
///    run (unless bypassed).
/// 5. The rate limiter must currently permit a call (non-consuming probe).
pub async fn check_eligibility<S: IngestStore>(
    store: &S,
    limiter: &WorkspaceRateLimiter,
    app: &TrackedApp,
    workspace: &Workspace,
    options: &RunOptions,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    if app.status != AppStatus::Active {
        return Err(AppError::AppNotActive(app.status.as_str().to_string()));
    }

    if workspace.is_deleted() {
        return Err(AppError::WorkspaceDeleted);
    }

    if let Some(next_retry_at) = app.next_retry_at {
        if next_retry_at > now {
            return Err(AppError::CooldownActive {
                remaining_secs: (next_retry_at - now).num_seconds().max(1),
            });
        }
    }

    if !options.bypass_quota {
        let limit = workspace.plan.limits().max_runs_per_period;
        let used = store
            .count_runs_in_period(workspace.id, period_start(now))
            .await?;
        if used + 1 > limit {
            return Err(AppError::QuotaExceeded { used, limit });
        }
    }

    if !limiter.check(workspace.id) {
        return Err(AppError::RateLimited);
    }

    Ok(())
}
