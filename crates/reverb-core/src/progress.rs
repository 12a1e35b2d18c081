//! Progress reporting for ingestion runs.
//!
//! Events are emitted through a reporter trait so the pipeline stays
//! decoupled from logging and UI concerns. [`SilentReporter`] discards
//! everything; [`TracingReporter`] forwards to structured logs.

use uuid::Uuid;

use crate::models::ReviewSort;
use crate::run::RunCounts;

/// Events emitted while an ingestion run executes.
#[derive(Debug, Clone)]
pub enum IngestEvent<'a> {
    /// A run moved to processing.
    RunStarted {
        app_id: Uuid,
        run_id: Uuid,
    },
    /// One source finished fetching.
    SourceCompleted {
        source: ReviewSort,
        reviews: usize,
        pages: u32,
    },
    /// One source failed; the run continues with the others.
    SourceFailed {
        source: ReviewSort,
        code: &'a str,
        message: &'a str,
    },
    /// Deduplicated reviews were written to the store.
    ReviewsPersisted {
        inserted: u64,
        duplicates: u64,
        skipped: u64,
    },
    /// The run reached a terminal state.
    RunFinished {
        run_id: Uuid,
        status: &'a str,
        counts: &'a RunCounts,
    },
    /// Batch ingestion started.
    BatchStarted { total_apps: usize },
    /// One app in a batch finished (successfully or not).
    AppProcessed {
        app_index: usize,
        total_apps: usize,
        app_name: &'a str,
        success: bool,
    },
    /// Batch ingestion was cancelled partway.
    BatchCancelled {
        completed_apps: usize,
        total_apps: usize,
    },
}

/// Trait for reporting ingestion progress events.
pub trait IngestReporter: Send + Sync {
    /// Called for each event.
    ///
    /// The default implementation does nothing (silent mode).
    fn report(&self, event: IngestEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that ignores all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl IngestReporter for SilentReporter {}

/// Tracing-based reporter for CLI and service logging.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl IngestReporter for TracingReporter {
    fn report(&self, event: IngestEvent<'_>) {
        match event {
            IngestEvent::RunStarted { app_id, run_id } => {
                tracing::info!(%app_id, %run_id, "Run started");
            }
            IngestEvent::SourceCompleted {
                source,
                reviews,
                pages,
            } => {
                tracing::info!(source = %source, reviews, pages, "Source completed");
            }
            IngestEvent::SourceFailed {
                source,
                code,
                message,
            } => {
                tracing::warn!(source = %source, code, message, "Source failed");
            }
            IngestEvent::ReviewsPersisted {
                inserted,
                duplicates,
                skipped,
            } => {
                tracing::info!(inserted, duplicates, skipped, "Reviews persisted");
            }
            IngestEvent::RunFinished {
                run_id,
                status,
                counts,
            } => {
                tracing::info!(
                    %run_id,
                    status,
                    fetched = counts.fetched,
                    inserted = counts.inserted,
                    duplicates = counts.duplicates,
                    skipped = counts.skipped,
                    "Run finished"
                );
            }
            IngestEvent::BatchStarted { total_apps } => {
                tracing::info!(total_apps, "Batch ingestion started");
            }
            IngestEvent::AppProcessed {
                app_index,
                total_apps,
                app_name,
                success,
            } => {
                tracing::info!(
                    app = app_name,
                    current = app_index + 1,
                    total = total_apps,
                    success,
                    "App processed"
                );
            }
            IngestEvent::BatchCancelled {
                completed_apps,
                total_apps,
            } => {
                tracing::info!(completed_apps, total_apps, "Batch ingestion cancelled");
            }
        }
    }
}
