//! Integration tests for cancellation support in IngestionService.

use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use reverb_core::models::{PlanTier, ReviewSort};
use reverb_core::run::RunStatus;
use reverb_core::{AppEntry, IngestionService};

use crate::integration::common::{
    MockFeedClient, MockIngestStore, MockMetrics, MockSnapshotEnqueuer, app, page, scheduled,
    test_config, workspace,
};

#[tokio::test]
async fn test_cancellation_before_start() {
    let ws = workspace(PlanTier::Pro);
    let tracked = app(ws.id);
    let app_id = tracked.id;

    let store = MockIngestStore::new(tracked, ws);
    let client = MockFeedClient::new(vec![]);
    let service = IngestionService::with_config(
        store.clone(),
        client.clone(),
        MockSnapshotEnqueuer::new(),
        MockMetrics::new(),
        test_config(),
    );

    let token = CancellationToken::new();
    token.cancel(); // cancel immediately

    let outcome = service.ingest_cancellable(app_id, scheduled(), token).await;

    assert!(!outcome.success);
    assert!(outcome.is_cancelled());
    // Cancelled before the run record existed.
    assert!(outcome.run_id.is_none());
    assert_eq!(store.run_count(), 0);
    assert_eq!(client.call_count(), 0);
}

#[tokio::test]
async fn test_cancellation_mid_pagination() {
    let ws = workspace(PlanTier::Pro);
    let tracked = app(ws.id);
    let app_id = tracked.id;

    // Every page takes 50ms and advertises a successor, so an uncancelled
    // walk would spend 10 pages x 2 sources x 50ms.
    let mut pages = Vec::new();
    for sort in [ReviewSort::MostHelpful, ReviewSort::MostRecent] {
        for n in 1..=10u32 {
            pages.push((
                (sort, n),
                Ok(page(&[&format!("{sort}-{n}")], sort, Some(n + 1))),
            ));
        }
    }
    let client = MockFeedClient::new(pages).with_delay(Duration::from_millis(50));

    let store = MockIngestStore::new(tracked, ws);
    let service = IngestionService::with_config(
        store.clone(),
        client.clone(),
        MockSnapshotEnqueuer::new(),
        MockMetrics::new(),
        test_config(),
    );

    let token = CancellationToken::new();
    let token_clone = token.clone();
    let service_clone = service.clone();
    let handle = tokio::spawn(async move {
        service_clone
            .ingest_cancellable(app_id, scheduled(), token_clone)
            .await
    });

    // Let the first pages go out, then cancel mid-walk.
    sleep(Duration::from_millis(120)).await;
    token.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("cancellation must stop the run promptly")
        .unwrap();

    assert!(outcome.is_cancelled());
    assert!(outcome.run_id.is_some());

    // The run record reached cancelled, not failed.
    let run = store.only_run();
    assert_eq!(run.status, RunStatus::Cancelled);

    // The failure counter was not touched by cancellation.
    assert!(store.last_sync_update().is_none());

    // Far fewer pages were fetched than a full walk would need.
    assert!(client.call_count() < 20);
}

#[tokio::test]
async fn test_batch_ingest_stops_after_cancellation() {
    let ws = workspace(PlanTier::Pro);
    let mut first = app(ws.id);
    first.store_id = "111".to_string();
    let mut second = app(ws.id);
    second.store_id = "222".to_string();

    // Slow pages so the batch is still inside the first app when cancelled.
    let mut pages = Vec::new();
    for sort in [ReviewSort::MostHelpful, ReviewSort::MostRecent] {
        for n in 1..=10u32 {
            pages.push((
                (sort, n),
                Ok(page(&[&format!("{sort}-{n}")], sort, Some(n + 1))),
            ));
        }
    }
    let client = MockFeedClient::new(pages).with_delay(Duration::from_millis(50));

    let store = MockIngestStore::new(first, ws.clone());
    store.insert_app(second);

    let service = IngestionService::with_config(
        store.clone(),
        client,
        MockSnapshotEnqueuer::new(),
        MockMetrics::new(),
        test_config(),
    );

    let entries = vec![
        AppEntry {
            name: "first".to_string(),
            store_id: "111".to_string(),
            country: "us".to_string(),
            enabled: true,
            description: None,
        },
        AppEntry {
            name: "second".to_string(),
            store_id: "222".to_string(),
            country: "us".to_string(),
            enabled: true,
            description: None,
        },
    ];

    let token = CancellationToken::new();
    let token_clone = token.clone();
    let service_clone = service.clone();
    let handle = tokio::spawn(async move {
        let refs: Vec<&AppEntry> = entries.iter().collect();
        service_clone
            .ingest_all(
                &refs,
                reverb_core::RunOptions::scheduled(),
                token_clone,
                &reverb_core::SilentReporter,
            )
            .await
    });

    sleep(Duration::from_millis(100)).await;
    token.cancel();

    let summary = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("batch must stop promptly after cancellation")
        .unwrap();

    // Only the first app was attempted; the batch stopped before the second.
    assert_eq!(summary.results.len(), 1);
    assert!(summary.results[0].outcome.is_cancelled());
    assert_eq!(summary.succeeded(), 0);
}
