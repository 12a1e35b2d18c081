//! Integration tests for IngestionService.
//!
//! These tests drive the full orchestration path with mock collaborators
//! and verify run records, review persistence, sync-state bookkeeping, and
//! the accounting invariant.

use chrono::{TimeDelta, Utc};

use reverb_core::models::{AppStatus, PlanTier, ReviewSort};
use reverb_core::run::RunStatus;
use reverb_core::{AppError, IngestionService, RunOptions};

use crate::integration::common::{
    MockFeedClient, MockIngestStore, MockMetrics, MockSnapshotEnqueuer, app, page, scheduled,
    test_config, workspace,
};

type Service = IngestionService<MockIngestStore, MockFeedClient, MockSnapshotEnqueuer, MockMetrics>;

fn service(store: MockIngestStore, client: MockFeedClient) -> Service {
    IngestionService::with_config(
        store,
        client,
        MockSnapshotEnqueuer::new(),
        MockMetrics::new(),
        test_config(),
    )
}

/// Two single-page sources returning 10 and 8 entries with 3 overlapping
/// ids: 15 unique reviews, 3 duplicates, accounting balanced.
#[tokio::test]
async fn test_successful_run_end_to_end() {
    let ws = workspace(PlanTier::Pro);
    let mut tracked = app(ws.id);
    tracked.consecutive_failures = 2;
    tracked.next_retry_at = None;
    let app_id = tracked.id;

    let helpful: Vec<String> = (0..10).map(|i| format!("r{i}")).collect();
    let recent: Vec<String> = (7..15).map(|i| format!("r{i}")).collect();
    let client = MockFeedClient::new(vec![
        (
            (ReviewSort::MostHelpful, 1),
            Ok(page(
                &helpful.iter().map(String::as_str).collect::<Vec<_>>(),
                ReviewSort::MostHelpful,
                None,
            )),
        ),
        (
            (ReviewSort::MostRecent, 1),
            Ok(page(
                &recent.iter().map(String::as_str).collect::<Vec<_>>(),
                ReviewSort::MostRecent,
                None,
            )),
        ),
    ]);

    let store = MockIngestStore::new(tracked, ws);
    let snapshots = MockSnapshotEnqueuer::new();
    let metrics = MockMetrics::new();
    let service = IngestionService::with_config(
        store.clone(),
        client,
        snapshots.clone(),
        metrics.clone(),
        test_config(),
    );

    let outcome = service.ingest(app_id, scheduled()).await;

    assert!(outcome.success, "outcome: {:?}", outcome.error);
    assert_eq!(outcome.reviews_fetched, 18);
    assert_eq!(outcome.reviews_inserted, 15);
    assert_eq!(outcome.duplicate_count, 3);
    assert_eq!(outcome.reviews_skipped, 0);
    assert_eq!(
        outcome.reviews_inserted + outcome.duplicate_count + outcome.reviews_skipped,
        outcome.reviews_fetched
    );
    assert!(outcome.snapshot_id.is_some());

    // Run record reached succeeded with matching counts.
    let run = store.only_run();
    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.counts.inserted, 15);
    assert_eq!(run.counts.duplicates, 3);
    assert!(run.counts.is_balanced());
    assert_eq!(run.sources_processed.len(), 2);
    assert_eq!(run.snapshot_id, outcome.snapshot_id);
    assert!(run.finished_at.is_some());

    // Success reset the failure counter and stamped last_synced_at.
    let update = store.last_sync_update().unwrap();
    assert_eq!(update.consecutive_failures, 0);
    assert!(update.next_retry_at.is_none());
    assert!(update.last_synced_at.is_some());

    assert_eq!(store.stored_review_count(), 15);
    assert_eq!(snapshots.call_count(), 1);
    assert_eq!(metrics.successes.load(std::sync::atomic::Ordering::SeqCst), 1);
}

/// Re-ingesting the same feed stores each review exactly once and counts
/// the second pass entirely as duplicates.
#[tokio::test]
async fn test_reingest_is_idempotent() {
    let ws = workspace(PlanTier::Pro);
    let tracked = app(ws.id);
    let app_id = tracked.id;

    let client = MockFeedClient::new(vec![
        (
            (ReviewSort::MostHelpful, 1),
            Ok(page(&["a", "b", "c"], ReviewSort::MostHelpful, None)),
        ),
        (
            (ReviewSort::MostRecent, 1),
            Ok(page(&["c", "d"], ReviewSort::MostRecent, None)),
        ),
    ]);

    let store = MockIngestStore::new(tracked, ws);
    let service = service(store.clone(), client);

    let first = service.ingest(app_id, scheduled()).await;
    assert!(first.success);
    assert_eq!(first.reviews_inserted, 4);
    assert_eq!(first.duplicate_count, 1);
    assert_eq!(store.stored_review_count(), 4);

    let second = service.ingest(app_id, scheduled()).await;
    assert!(second.success);
    assert_eq!(second.reviews_inserted, 0);
    // 1 cross-source duplicate + 4 natural-key conflicts.
    assert_eq!(second.duplicate_count, 5);
    assert_eq!(second.reviews_fetched, 5);
    assert_eq!(
        second.reviews_inserted + second.duplicate_count + second.reviews_skipped,
        second.reviews_fetched
    );
    assert_eq!(store.stored_review_count(), 4, "no duplicate rows stored");
}

/// An archived app is rejected by the gate: no run record, no network call.
#[tokio::test]
async fn test_archived_app_never_creates_run() {
    let ws = workspace(PlanTier::Free);
    let mut tracked = app(ws.id);
    tracked.status = AppStatus::Archived;
    let app_id = tracked.id;

    let client = MockFeedClient::new(vec![]);
    let store = MockIngestStore::new(tracked, ws);
    let service = service(store.clone(), client.clone());

    let outcome = service.ingest(app_id, scheduled()).await;

    assert!(!outcome.success);
    assert_eq!(outcome.error.as_ref().unwrap().code, "APP_NOT_ACTIVE");
    assert!(outcome.run_id.is_none());
    assert_eq!(store.run_count(), 0, "run must never be created");
    assert_eq!(client.call_count(), 0, "no network call may be made");
    assert!(store.last_sync_update().is_none(), "backoff untouched");
}

#[tokio::test]
async fn test_deleted_workspace_rejected() {
    let mut ws = workspace(PlanTier::Pro);
    ws.deleted_at = Some(Utc::now());
    let tracked = app(ws.id);
    let app_id = tracked.id;

    let store = MockIngestStore::new(tracked, ws);
    let service = service(store.clone(), MockFeedClient::new(vec![]));

    let outcome = service.ingest(app_id, scheduled()).await;
    assert_eq!(outcome.error.as_ref().unwrap().code, "WORKSPACE_DELETED");
    assert_eq!(store.run_count(), 0);
}

#[tokio::test]
async fn test_cooldown_window_rejected() {
    let ws = workspace(PlanTier::Pro);
    let mut tracked = app(ws.id);
    tracked.consecutive_failures = 1;
    tracked.next_retry_at = Some(Utc::now() + TimeDelta::minutes(10));
    let app_id = tracked.id;

    let store = MockIngestStore::new(tracked, ws);
    let service = service(store.clone(), MockFeedClient::new(vec![]));

    let outcome = service.ingest(app_id, scheduled()).await;
    let error = outcome.error.unwrap();
    assert_eq!(error.code, "COOLDOWN_ACTIVE");
    assert!(error.message.contains("remaining"));
    assert_eq!(store.run_count(), 0);
}

#[tokio::test]
async fn test_quota_exceeded_and_bypass() {
    let ws = workspace(PlanTier::Free); // 4 runs per period
    let tracked = app(ws.id);
    let app_id = tracked.id;

    let client = MockFeedClient::new(vec![
        (
            (ReviewSort::MostHelpful, 1),
            Ok(page(&["a"], ReviewSort::MostHelpful, None)),
        ),
        (
            (ReviewSort::MostRecent, 1),
            Ok(page(&["b"], ReviewSort::MostRecent, None)),
        ),
    ]);
    let store = MockIngestStore::new(tracked, ws);
    *store.runs_this_period.lock().unwrap() = 4;
    let service = service(store.clone(), client);

    let rejected = service.ingest(app_id, scheduled()).await;
    assert_eq!(rejected.error.as_ref().unwrap().code, "QUOTA_EXCEEDED");
    assert_eq!(store.run_count(), 0);

    let bypassed = service
        .ingest(app_id, RunOptions::scheduled().with_quota_bypass())
        .await;
    assert!(bypassed.success);
    assert_eq!(store.run_count(), 1);
}

/// A run where every source fails marks the run failed, increments the
/// failure counter, and schedules the next retry per the backoff table.
#[tokio::test]
async fn test_total_failure_advances_backoff() {
    let ws = workspace(PlanTier::Pro);
    let mut tracked = app(ws.id);
    tracked.consecutive_failures = 1;
    let app_id = tracked.id;

    let client = MockFeedClient::new(vec![
        ((ReviewSort::MostHelpful, 1), Err("network")),
        ((ReviewSort::MostRecent, 1), Err("network")),
    ]);
    let store = MockIngestStore::new(tracked, ws);
    let metrics = MockMetrics::new();
    let service = IngestionService::with_config(
        store.clone(),
        client,
        MockSnapshotEnqueuer::new(),
        metrics.clone(),
        test_config(),
    );

    let before = Utc::now();
    let outcome = service.ingest(app_id, scheduled()).await;

    assert!(!outcome.success);
    assert_eq!(outcome.error.as_ref().unwrap().code, "RETRIES_EXHAUSTED");
    assert!(outcome.run_id.is_some());

    let run = store.only_run();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error_code.as_deref(), Some("RETRIES_EXHAUSTED"));
    assert!(run.error_message.is_some());

    // Second consecutive failure: backoff table entry is 15 minutes.
    let update = store.last_sync_update().unwrap();
    assert_eq!(update.consecutive_failures, 2);
    let next_retry = update.next_retry_at.unwrap();
    assert!(next_retry >= before + TimeDelta::minutes(14));
    assert!(next_retry <= Utc::now() + TimeDelta::minutes(16));
    assert!(update.last_failure_reason.is_some());

    assert_eq!(metrics.failures.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(
        metrics.last_failure_code.lock().unwrap().as_deref(),
        Some("RETRIES_EXHAUSTED")
    );
}

/// One source failing does not abort the run; the other's data is kept and
/// the run still succeeds.
#[tokio::test]
async fn test_single_source_failure_still_succeeds() {
    let ws = workspace(PlanTier::Pro);
    let tracked = app(ws.id);
    let app_id = tracked.id;

    let client = MockFeedClient::new(vec![
        ((ReviewSort::MostHelpful, 1), Err("network")),
        (
            (ReviewSort::MostRecent, 1),
            Ok(page(&["x", "y", "z"], ReviewSort::MostRecent, None)),
        ),
    ]);
    let store = MockIngestStore::new(tracked, ws);
    let service = service(store.clone(), client);

    let outcome = service.ingest(app_id, scheduled()).await;

    assert!(outcome.success);
    assert_eq!(outcome.reviews_inserted, 3);
    let run = store.only_run();
    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.sources_processed, vec![ReviewSort::MostRecent]);

    // No backoff advance on a successful run.
    let update = store.last_sync_update().unwrap();
    assert_eq!(update.consecutive_failures, 0);
}

/// Multi-page pagination follows next-page pointers within one source.
#[tokio::test]
async fn test_multi_page_source() {
    let ws = workspace(PlanTier::Pro);
    let tracked = app(ws.id);
    let app_id = tracked.id;

    let client = MockFeedClient::new(vec![
        (
            (ReviewSort::MostHelpful, 1),
            Ok(page(&["a", "b"], ReviewSort::MostHelpful, Some(2))),
        ),
        (
            (ReviewSort::MostHelpful, 2),
            Ok(page(&["c"], ReviewSort::MostHelpful, None)),
        ),
        (
            (ReviewSort::MostRecent, 1),
            Ok(page(&["d"], ReviewSort::MostRecent, None)),
        ),
    ]);
    let store = MockIngestStore::new(tracked, ws);
    let service = service(store.clone(), client.clone());

    let outcome = service.ingest(app_id, scheduled()).await;

    assert!(outcome.success);
    assert_eq!(outcome.reviews_inserted, 4);
    assert_eq!(client.call_count(), 3);
}

/// Snapshot enqueue failure is swallowed: the run still succeeds.
#[tokio::test]
async fn test_snapshot_failure_does_not_fail_run() {
    let ws = workspace(PlanTier::Pro);
    let tracked = app(ws.id);
    let app_id = tracked.id;

    let client = MockFeedClient::new(vec![
        (
            (ReviewSort::MostHelpful, 1),
            Ok(page(&["a"], ReviewSort::MostHelpful, None)),
        ),
        (
            (ReviewSort::MostRecent, 1),
            Ok(page(&["b"], ReviewSort::MostRecent, None)),
        ),
    ]);
    let store = MockIngestStore::new(tracked, ws);
    let snapshots = MockSnapshotEnqueuer::failing();
    let service = IngestionService::with_config(
        store.clone(),
        client,
        snapshots.clone(),
        MockMetrics::new(),
        test_config(),
    );

    let outcome = service.ingest(app_id, scheduled()).await;

    assert!(outcome.success);
    assert!(outcome.snapshot_id.is_none());
    assert_eq!(snapshots.call_count(), 1);
    assert_eq!(store.only_run().status, RunStatus::Succeeded);
}

/// An already-active downstream snapshot skips the enqueue (advisory check).
#[tokio::test]
async fn test_active_snapshot_skips_enqueue() {
    let ws = workspace(PlanTier::Pro);
    let tracked = app(ws.id);
    let app_id = tracked.id;

    let client = MockFeedClient::new(vec![
        (
            (ReviewSort::MostHelpful, 1),
            Ok(page(&["a"], ReviewSort::MostHelpful, None)),
        ),
        (
            (ReviewSort::MostRecent, 1),
            Ok(page(&["b"], ReviewSort::MostRecent, None)),
        ),
    ]);
    let store = MockIngestStore::new(tracked, ws);
    *store.active_snapshot.lock().unwrap() = true;
    let snapshots = MockSnapshotEnqueuer::new();
    let service = IngestionService::with_config(
        store.clone(),
        client,
        snapshots.clone(),
        MockMetrics::new(),
        test_config(),
    );

    let outcome = service.ingest(app_id, scheduled()).await;

    assert!(outcome.success);
    assert!(outcome.snapshot_id.is_none());
    assert_eq!(snapshots.call_count(), 0);
}

/// Metrics failures are swallowed: the run still succeeds.
#[tokio::test]
async fn test_metrics_failure_swallowed() {
    let ws = workspace(PlanTier::Pro);
    let tracked = app(ws.id);
    let app_id = tracked.id;

    let client = MockFeedClient::new(vec![
        (
            (ReviewSort::MostHelpful, 1),
            Ok(page(&["a"], ReviewSort::MostHelpful, None)),
        ),
        (
            (ReviewSort::MostRecent, 1),
            Ok(page(&["b"], ReviewSort::MostRecent, None)),
        ),
    ]);
    let store = MockIngestStore::new(tracked, ws);
    let service = IngestionService::with_config(
        store.clone(),
        client,
        MockSnapshotEnqueuer::new(),
        MockMetrics::failing(),
        test_config(),
    );

    let outcome = service.ingest(app_id, scheduled()).await;
    assert!(outcome.success, "metrics failures must never fail the run");
}

/// Failed insert chunks are counted as skipped and keep the invariant.
#[tokio::test]
async fn test_failed_inserts_counted_as_skipped() {
    let ws = workspace(PlanTier::Pro);
    let tracked = app(ws.id);
    let app_id = tracked.id;

    let client = MockFeedClient::new(vec![
        (
            (ReviewSort::MostHelpful, 1),
            Ok(page(&["a", "b"], ReviewSort::MostHelpful, None)),
        ),
        (
            (ReviewSort::MostRecent, 1),
            Ok(page(&["c"], ReviewSort::MostRecent, None)),
        ),
    ]);
    let store = MockIngestStore::new(tracked, ws);
    *store.fail_inserts.lock().unwrap() = true;
    let service = service(store.clone(), client);

    let outcome = service.ingest(app_id, scheduled()).await;

    // Persistence trouble is not a run failure; the skips are reported.
    assert!(outcome.success);
    assert_eq!(outcome.reviews_inserted, 0);
    assert_eq!(outcome.reviews_skipped, 3);
    assert_eq!(
        outcome.reviews_inserted + outcome.duplicate_count + outcome.reviews_skipped,
        outcome.reviews_fetched
    );
}

/// An unknown app id fails with a terminal code and creates nothing.
#[tokio::test]
async fn test_unknown_app_id() {
    let ws = workspace(PlanTier::Pro);
    let tracked = app(ws.id);

    let store = MockIngestStore::new(tracked, ws);
    let service = service(store.clone(), MockFeedClient::new(vec![]));

    let outcome = service.ingest(uuid::Uuid::new_v4(), scheduled()).await;
    assert_eq!(outcome.error.as_ref().unwrap().code, "APP_NOT_FOUND");
    assert_eq!(store.run_count(), 0);
}

/// The gate consults the rate limiter before any run record is created.
#[tokio::test]
async fn test_rate_limiter_gate() {
    let ws = workspace(PlanTier::Pro);
    let tracked = app(ws.id);
    let app_id = tracked.id;

    let mut config = test_config();
    config.rate_limit = reverb_core::RateLimitConfig {
        max_calls: 0,
        window: std::time::Duration::from_secs(60),
    };
    let store = MockIngestStore::new(tracked, ws);
    let client = MockFeedClient::new(vec![]);
    let service = IngestionService::with_config(
        store.clone(),
        client.clone(),
        MockSnapshotEnqueuer::new(),
        MockMetrics::new(),
        config,
    );

    let outcome = service.ingest(app_id, scheduled()).await;
    assert_eq!(outcome.error.as_ref().unwrap().code, "RATE_LIMITED");
    assert!(AppError::RateLimited.is_retryable());
    assert_eq!(store.run_count(), 0);
    assert_eq!(client.call_count(), 0);
}
