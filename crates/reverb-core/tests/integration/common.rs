//! Test utilities and mock implementations for integration tests.
//!
//! Provides in-memory implementations of the core traits for testing
//! `IngestionService` in isolation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use reverb_core::metrics::MetricsRecorder;
use reverb_core::models::{
    AppStatus, FeedPage, FeedRequest, NormalizedReview, PlanTier, ReviewSort, SyncStateUpdate,
    TrackedApp, Workspace,
};
use reverb_core::run::{IngestionRun, NewRun, RunCounts, RunStatus, RunTerminal};
use reverb_core::traits::{IngestStore, InsertStats, ReviewFeedClient, SnapshotEnqueuer};
use reverb_core::{AppError, IngestConfig, RateLimitConfig, RetryPolicy, RunReason};

/// Ingest configuration tuned for fast tests: tiny delays, no retries,
/// and a wide-open rate limiter.
pub fn test_config() -> IngestConfig {
    IngestConfig {
        page_delay: Duration::from_millis(1),
        retry: RetryPolicy::none(),
        rate_limit: RateLimitConfig {
            max_calls: 10_000,
            window: Duration::from_secs(60),
        },
        ..Default::default()
    }
}

/// Builds an active tracked app owned by the given workspace.
pub fn app(workspace_id: Uuid) -> TrackedApp {
    TrackedApp {
        id: Uuid::new_v4(),
        workspace_id,
        store_id: "425073498".to_string(),
        name: "procreate".to_string(),
        country: "us".to_string(),
        status: AppStatus::Active,
        consecutive_failures: 0,
        next_retry_at: None,
        last_synced_at: None,
        last_failure_reason: None,
    }
}

/// Builds a live workspace on the given plan.
pub fn workspace(plan: PlanTier) -> Workspace {
    Workspace {
        id: Uuid::new_v4(),
        name: "acme".to_string(),
        plan,
        deleted_at: None,
    }
}

/// Builds a 5-star review with the given external id.
pub fn review(id: &str, sort: ReviewSort) -> NormalizedReview {
    NormalizedReview {
        external_id: id.to_string(),
        rating: 5,
        title: Some("Love it".to_string()),
        content: "Does what it says.".to_string(),
        author: Some("reviewer".to_string()),
        app_version: Some("5.3.1".to_string()),
        country: "us".to_string(),
        language: None,
        published_at: Utc::now(),
        vote_sum: 2,
        vote_count: 3,
        source: sort,
    }
}

/// Builds a single feed page from review ids.
pub fn page(ids: &[&str], sort: ReviewSort, next_page: Option<u32>) -> FeedPage {
    FeedPage {
        reviews: ids.iter().map(|id| review(id, sort)).collect(),
        rejected: 0,
        next_page,
    }
}

// =============================================================================
// MockFeedClient
// =============================================================================

/// Feed client backed by a fixed (sort, page) -> response map.
#[derive(Clone)]
pub struct MockFeedClient {
    pages: Arc<HashMap<(ReviewSort, u32), Result<FeedPage, &'static str>>>,
    /// Total fetch_page invocations.
    pub calls: Arc<AtomicU32>,
    delay: Duration,
}

impl MockFeedClient {
    pub fn new(pages: Vec<((ReviewSort, u32), Result<FeedPage, &'static str>)>) -> Self {
        Self {
            pages: Arc::new(pages.into_iter().collect()),
            calls: Arc::new(AtomicU32::new(0)),
            delay: Duration::ZERO,
        }
    }

    /// Adds an artificial per-page latency, for cancellation tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ReviewFeedClient for MockFeedClient {
    async fn fetch_page(&self, request: &FeedRequest) -> Result<FeedPage, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.pages.get(&(request.sort, request.page)) {
            Some(Ok(page)) => Ok(page.clone()),
            Some(Err("429")) => Err(AppError::RateLimitedUpstream {
                retry_after: Duration::from_secs(60),
            }),
            Some(Err("network")) => Err(AppError::Network("connection reset".to_string())),
            Some(Err(_)) | None => Err(AppError::AppNotFoundUpstream),
        }
    }
}

// =============================================================================
// MockIngestStore
// =============================================================================

/// In-memory store with full `IngestStore` coverage for orchestrator tests.
#[derive(Clone)]
pub struct MockIngestStore {
    apps: Arc<Mutex<HashMap<Uuid, TrackedApp>>>,
    workspaces: Arc<Mutex<HashMap<Uuid, Workspace>>>,
    /// All run records, keyed by run id.
    pub runs: Arc<Mutex<HashMap<Uuid, IngestionRun>>>,
    /// Stored reviews keyed by (app_id, external_id).
    pub reviews: Arc<Mutex<HashMap<(Uuid, String), NormalizedReview>>>,
    /// History of sync-state updates, oldest first.
    pub sync_updates: Arc<Mutex<Vec<SyncStateUpdate>>>,
    /// Value returned by `count_runs_in_period`.
    pub runs_this_period: Arc<Mutex<i64>>,
    /// Value returned by `has_active_snapshot`.
    pub active_snapshot: Arc<Mutex<bool>>,
    /// When true, every `batch_insert_reviews` call fails.
    pub fail_inserts: Arc<Mutex<bool>>,
}

impl MockIngestStore {
    pub fn new(app: TrackedApp, workspace: Workspace) -> Self {
        let mut apps = HashMap::new();
        apps.insert(app.id, app);
        let mut workspaces = HashMap::new();
        workspaces.insert(workspace.id, workspace);
        Self {
            apps: Arc::new(Mutex::new(apps)),
            workspaces: Arc::new(Mutex::new(workspaces)),
            runs: Arc::new(Mutex::new(HashMap::new())),
            reviews: Arc::new(Mutex::new(HashMap::new())),
            sync_updates: Arc::new(Mutex::new(Vec::new())),
            runs_this_period: Arc::new(Mutex::new(0)),
            active_snapshot: Arc::new(Mutex::new(false)),
            fail_inserts: Arc::new(Mutex::new(false)),
        }
    }

    /// Registers an additional tracked app.
    pub fn insert_app(&self, app: TrackedApp) {
        self.apps.lock().unwrap().insert(app.id, app);
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }

    /// The single run record, for tests that expect exactly one.
    pub fn only_run(&self) -> IngestionRun {
        let runs = self.runs.lock().unwrap();
        assert_eq!(runs.len(), 1, "expected exactly one run record");
        runs.values().next().cloned().unwrap()
    }

    pub fn stored_review_count(&self) -> usize {
        self.reviews.lock().unwrap().len()
    }

    pub fn last_sync_update(&self) -> Option<SyncStateUpdate> {
        self.sync_updates.lock().unwrap().last().cloned()
    }
}

impl IngestStore for MockIngestStore {
    async fn get_app(&self, app_id: Uuid) -> Result<Option<TrackedApp>, AppError> {
        Ok(self.apps.lock().unwrap().get(&app_id).cloned())
    }

    async fn get_app_by_store_id(&self, store_id: &str) -> Result<Option<TrackedApp>, AppError> {
        Ok(self
            .apps
            .lock()
            .unwrap()
            .values()
            .find(|a| a.store_id == store_id)
            .cloned())
    }

    async fn get_workspace(&self, workspace_id: Uuid) -> Result<Option<Workspace>, AppError> {
        Ok(self.workspaces.lock().unwrap().get(&workspace_id).cloned())
    }

    async fn create_run(&self, run: NewRun) -> Result<IngestionRun, AppError> {
        let record = IngestionRun {
            id: Uuid::new_v4(),
            app_id: run.app_id,
            workspace_id: run.workspace_id,
            reason: run.reason,
            status: RunStatus::Pending,
            requested_at: Utc::now(),
            started_at: None,
            finished_at: None,
            duration_ms: None,
            counts: RunCounts::default(),
            sources_processed: Vec::new(),
            error_code: None,
            error_message: None,
            snapshot_id: None,
        };
        self.runs.lock().unwrap().insert(record.id, record.clone());
        Ok(record)
    }

    async fn mark_run_started(&self, run_id: Uuid) -> Result<(), AppError> {
        let mut runs = self.runs.lock().unwrap();
        let run = runs
            .get_mut(&run_id)
            .ok_or_else(|| AppError::Generic(format!("run not found: {run_id}")))?;
        run.status = RunStatus::Processing;
        run.started_at = Some(Utc::now());
        Ok(())
    }

    async fn finish_run(&self, run_id: Uuid, terminal: &RunTerminal) -> Result<(), AppError> {
        let mut runs = self.runs.lock().unwrap();
        let run = runs
            .get_mut(&run_id)
            .ok_or_else(|| AppError::Generic(format!("run not found: {run_id}")))?;
        run.status = terminal.status;
        run.finished_at = Some(Utc::now());
        run.duration_ms = Some(terminal.duration_ms);
        run.counts = terminal.counts;
        run.sources_processed = terminal.sources_processed.clone();
        run.error_code = terminal.error_code.clone();
        run.error_message = terminal.error_message.clone();
        Ok(())
    }

    async fn set_run_snapshot(&self, run_id: Uuid, snapshot_id: Uuid) -> Result<(), AppError> {
        let mut runs = self.runs.lock().unwrap();
        if let Some(run) = runs.get_mut(&run_id) {
            run.snapshot_id = Some(snapshot_id);
        }
        Ok(())
    }

    async fn batch_insert_reviews(
        &self,
        app_id: Uuid,
        reviews: &[NormalizedReview],
    ) -> Result<InsertStats, AppError> {
        if *self.fail_inserts.lock().unwrap() {
            return Err(AppError::Database(sqlx::Error::PoolTimedOut));
        }
        let mut stored = self.reviews.lock().unwrap();
        let mut stats = InsertStats::default();
        for review in reviews {
            let key = (app_id, review.external_id.clone());
            if stored.contains_key(&key) {
                stats.duplicates += 1;
            } else {
                stored.insert(key, review.clone());
                stats.inserted += 1;
            }
        }
        Ok(stats)
    }

    async fn update_app_sync_state(
        &self,
        app_id: Uuid,
        update: &SyncStateUpdate,
    ) -> Result<(), AppError> {
        self.sync_updates.lock().unwrap().push(update.clone());
        let mut apps = self.apps.lock().unwrap();
        if let Some(app) = apps.get_mut(&app_id) {
            app.consecutive_failures = update.consecutive_failures;
            app.next_retry_at = update.next_retry_at;
            app.last_failure_reason = update.last_failure_reason.clone();
            if let Some(synced) = update.last_synced_at {
                app.last_synced_at = Some(synced);
            }
        }
        Ok(())
    }

    async fn count_runs_in_period(
        &self,
        _workspace_id: Uuid,
        _since: DateTime<Utc>,
    ) -> Result<i64, AppError> {
        Ok(*self.runs_this_period.lock().unwrap())
    }

    async fn has_active_snapshot(&self, _app_id: Uuid) -> Result<bool, AppError> {
        Ok(*self.active_snapshot.lock().unwrap())
    }

    async fn list_recent_runs(&self, limit: i64) -> Result<Vec<IngestionRun>, AppError> {
        let mut runs: Vec<_> = self.runs.lock().unwrap().values().cloned().collect();
        runs.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        runs.truncate(limit as usize);
        Ok(runs)
    }
}

// =============================================================================
// MockSnapshotEnqueuer
// =============================================================================

/// Snapshot enqueuer that records calls and can be made to fail.
#[derive(Clone)]
pub struct MockSnapshotEnqueuer {
    /// Number of enqueue calls.
    pub calls: Arc<AtomicU32>,
    fail: bool,
}

impl MockSnapshotEnqueuer {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(AtomicU32::new(0)),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            calls: Arc::new(AtomicU32::new(0)),
            fail: true,
        }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SnapshotEnqueuer for MockSnapshotEnqueuer {
    async fn enqueue(&self, _app_id: Uuid, _run_id: Uuid) -> Result<Option<Uuid>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AppError::Generic("queue unavailable".to_string()));
        }
        Ok(Some(Uuid::new_v4()))
    }
}

// =============================================================================
// MockMetrics
// =============================================================================

/// Metrics recorder that counts invocations and can be made to fail.
#[derive(Clone)]
pub struct MockMetrics {
    /// Successful-run recordings.
    pub successes: Arc<AtomicU32>,
    /// Failed-run recordings.
    pub failures: Arc<AtomicU32>,
    /// Last failure code recorded.
    pub last_failure_code: Arc<Mutex<Option<String>>>,
    fail: bool,
}

impl MockMetrics {
    pub fn new() -> Self {
        Self {
            successes: Arc::new(AtomicU32::new(0)),
            failures: Arc::new(AtomicU32::new(0)),
            last_failure_code: Arc::new(Mutex::new(None)),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }
}

impl MetricsRecorder for MockMetrics {
    async fn record_success(
        &self,
        _app_id: Uuid,
        _duration_ms: i64,
        _counts: &RunCounts,
    ) -> Result<(), AppError> {
        if self.fail {
            return Err(AppError::Generic("metrics sink down".to_string()));
        }
        self.successes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn record_failure(
        &self,
        _app_id: Uuid,
        _duration_ms: i64,
        error_code: &str,
    ) -> Result<(), AppError> {
        if self.fail {
            return Err(AppError::Generic("metrics sink down".to_string()));
        }
        self.failures.fetch_add(1, Ordering::SeqCst);
        *self.last_failure_code.lock().unwrap() = Some(error_code.to_string());
        Ok(())
    }
}

/// Convenience: options for a scheduled run, matching the default reason.
pub fn scheduled() -> reverb_core::RunOptions {
    reverb_core::RunOptions {
        reason: RunReason::Scheduled,
        bypass_quota: false,
    }
}
