//! Reverb Core - domain types, business logic, and the ingestion pipeline.
//!
//! This crate provides the core functionality for Reverb, including:
//!
//! - **Domain models**: [`TrackedApp`], [`Workspace`], [`NormalizedReview`],
//!   [`IngestionRun`]
//! - **Services**: [`IngestionService`] for orchestrating review ingestion
//! - **Pipeline pieces**: eligibility gate, source fetcher, retry wrapper,
//!   multi-source aggregator, persistence writer, backoff tracker, workspace
//!   rate limiter
//! - **Traits**: [`IngestStore`], [`ReviewFeedClient`], [`SnapshotEnqueuer`],
//!   [`MetricsRecorder`] for dependency injection
//! - **Progress reporting**: [`IngestReporter`] for decoupled logging/UI
//!
//! # Architecture
//!
//! Business logic is decoupled from I/O through traits, so the same
//! orchestrator runs against PostgreSQL and the live feed in production and
//! against in-memory mocks in tests:
//!
//! # Example
//!
//! ```ignore
//! use reverb_core::{IngestionService, RunOptions, TracingMetrics, TracingReporter};
//! use reverb_core::traits::NoopSnapshotEnqueuer;
//! use tokio_util::sync::CancellationToken;
//!
//! let service = IngestionService::new(store, feed_client, NoopSnapshotEnqueuer, TracingMetrics);
//! let outcome = service
//!     .ingest_with_progress(app_id, RunOptions::manual(), CancellationToken::new(), &TracingReporter)
//!     .await;
//! println!("inserted {} reviews", outcome.reviews_inserted);
//! ```

pub mod aggregate;
pub mod backoff;
pub mod config;
pub mod eligibility;
pub mod error;
pub mod fetcher;
pub mod ingest;
pub mod metrics;
pub mod models;
pub mod progress;
pub mod rate_limit;
pub mod retry;
pub mod run;
pub mod traits;
pub mod writer;

// Error handling
pub use error::AppError;

// Configuration
pub use config::{
    AppEntry, AppsConfig, DbConfig, HttpConfig, IngestConfig, default_config_path,
    load_apps_config,
};

// Domain models
pub use models::{
    AppStatus, FeedPage, FeedRequest, NormalizedReview, PlanLimits, PlanTier, ReviewSort,
    SyncStateUpdate, TrackedApp, Workspace,
};

// Run records and lifecycle
pub use run::{
    IngestionRun, NewRun, RunCounts, RunReason, RunStateMachine, RunStatus, RunTerminal,
};

// Pipeline pieces
pub use aggregate::{AggregateOutcome, SourceError};
pub use backoff::BackoffSchedule;
pub use eligibility::{RunOptions, check_eligibility, period_start};
pub use fetcher::{SourceFetchResult, SourceLimits, fetch_source};
pub use rate_limit::{RateLimitConfig, WorkspaceRateLimiter};
pub use retry::{RetryPolicy, with_retry};
pub use writer::{WriteOutcome, write_reviews};

// Services
pub use ingest::{
    AppIngestResult, BatchIngestSummary, IngestionOutcome, IngestionService, RunError,
};

// Traits for dependency injection
pub use traits::{
    IngestStore, InsertStats, NoopSnapshotEnqueuer, ReviewFeedClient, SnapshotEnqueuer,
};

// Metrics
pub use metrics::{MetricsRecorder, TracingMetrics};

// Progress reporting
pub use progress::{IngestEvent, IngestReporter, SilentReporter, TracingReporter};
