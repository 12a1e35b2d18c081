//! Ingestion run records and the run lifecycle state machine.
//!
//! A run is the unit of observability for one ingestion attempt: it is
//! created `pending`, moved to `processing` before any network call, and
//! finishes in exactly one of `succeeded`, `failed`, or `cancelled`. The
//! transition table is enforced by [`RunStateMachine`]; violating it is a
//! programming error, not a domain error, and panics.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::ReviewSort;

// =============================================================================
// Run status
// =============================================================================

/// Status of an ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Run record created, processing not yet started.
    Pending,
    /// Run is actively fetching and persisting reviews.
    Processing,
    /// Run finished and its counts are final.
    Succeeded,
    /// Run hit a terminal error; counts reflect partial progress.
    Failed,
    /// Run was cancelled before completion.
    Cancelled,
}

impl RunStatus {
    /// Returns the string representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Processing => "processing",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    /// Returns true if the run is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "processing" => Ok(RunStatus::Processing),
            "succeeded" => Ok(RunStatus::Succeeded),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(AppError::Generic(format!("invalid run status: {other}"))),
        }
    }
}

/// Why a run was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunReason {
    /// Triggered by a user action.
    Manual,
    /// Selected by the external scheduler.
    #[default]
    Scheduled,
}

impl RunReason {
    /// Returns the string representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunReason::Manual => "manual",
            RunReason::Scheduled => "scheduled",
        }
    }
}

impl FromStr for RunReason {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(RunReason::Manual),
            "scheduled" => Ok(RunReason::Scheduled),
            other => Err(AppError::Generic(format!("invalid run reason: {other}"))),
        }
    }
}

// =============================================================================
// Run records
// =============================================================================

/// Review accounting for one run.
///
/// Invariant after persistence:
/// `inserted + duplicates + skipped == fetched`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    /// Feed entries considered across all sources, valid or not.
    pub fetched: u64,
    /// Rows newly inserted by this run.
    pub inserted: u64,
    /// Cross-source overlap plus natural-key conflicts with stored rows.
    pub duplicates: u64,
    /// Normalization rejects, cap truncation, and failed insert chunks.
    pub skipped: u64,
}

impl RunCounts {
    /// Returns true if the accounting invariant holds.
    pub fn is_balanced(&self) -> bool {
        self.inserted + self.duplicates + self.skipped == self.fetched
    }
}

/// A persisted ingestion run record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionRun {
    /// Unique run identifier.
    pub id: Uuid,
    /// Tracked app this run ingested.
    pub app_id: Uuid,
    /// Owning workspace.
    pub workspace_id: Uuid,
    /// Why the run was started.
    pub reason: RunReason,
    /// Current status.
    pub status: RunStatus,
    /// When the run was requested.
    pub requested_at: DateTime<Utc>,
    /// When processing started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the run reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    /// Wall-clock duration, stamped with the terminal status.
    pub duration_ms: Option<i64>,
    /// Review accounting.
    pub counts: RunCounts,
    /// Sort orders that returned data this run.
    pub sources_processed: Vec<ReviewSort>,
    /// Stable error code, for failed runs.
    pub error_code: Option<String>,
    /// Human-readable error message, for failed runs.
    pub error_message: Option<String>,
    /// Downstream analysis snapshot enqueued for this run, if any.
    pub snapshot_id: Option<Uuid>,
}

/// Fields for creating a new run record.
#[derive(Debug, Clone)]
pub struct NewRun {
    /// Tracked app to ingest.
    pub app_id: Uuid,
    /// Owning workspace.
    pub workspace_id: Uuid,
    /// Why the run was started.
    pub reason: RunReason,
}

/// Terminal update written exactly once per run.
#[derive(Debug, Clone)]
pub struct RunTerminal {
    /// Final status: succeeded, failed, or cancelled.
    pub status: RunStatus,
    /// Final review accounting.
    pub counts: RunCounts,
    /// Sort orders that returned data.
    pub sources_processed: Vec<ReviewSort>,
    /// Wall-clock duration of the run.
    pub duration_ms: i64,
    /// Stable error code when failed.
    pub error_code: Option<String>,
    /// Error message when failed.
    pub error_message: Option<String>,
}

// =============================================================================
// State machine
// =============================================================================

/// In-memory guard over the run lifecycle.
///
/// The orchestrator owns exactly one instance per invocation and funnels
/// every status change through [`transition`](Self::transition), so the
/// persisted record and the in-memory result cannot disagree about the
/// terminal state.
///
/// # Panics
///
/// `transition` panics on any move not in the table
/// `Pending → Processing → {Succeeded, Failed, Cancelled}`. A run already
/// in a terminal state must never be mutated again.
#[derive(Debug)]
pub struct RunStateMachine {
    run_id: Uuid,
    status: RunStatus,
}

impl RunStateMachine {
    /// Creates the guard for a freshly created (pending) run.
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            status: RunStatus::Pending,
        }
    }

    /// The run this guard tracks.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Current status.
    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Moves the run to `next`, enforcing the transition table.
    pub fn transition(&mut self, next: RunStatus) {
        let legal = matches!(
            (self.status, next),
            (RunStatus::Pending, RunStatus::Processing)
                | (RunStatus::Processing, RunStatus::Succeeded)
                | (RunStatus::Processing, RunStatus::Failed)
                | (RunStatus::Processing, RunStatus::Cancelled)
        );
        if !legal {
            panic!(
                "illegal run transition {} -> {} for run {}",
                self.status, next, self.run_id
            );
        }
        self.status = next;
    }
}
