mod config;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use reverb_client::AppStoreFeedClient;
use reverb_core::{
    AppEntry, DbConfig, IngestionOutcome, IngestionService, RunOptions, TracingMetrics,
    TracingReporter, load_apps_config,
};
use reverb_db::{PgIngestStore, PgSnapshotQueue};

use config::{Command, Config};

type Service = IngestionService<PgIngestStore, AppStoreFeedClient, PgSnapshotQueue, TracingMetrics>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let config = Config::parse();

    info!("Connecting to database...");
    let db_config = DbConfig::default();
    let pool = PgPoolOptions::new()
        .max_connections(db_config.max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    let store = PgIngestStore::new(pool.clone());
    let snapshots = PgSnapshotQueue::new(pool);
    let feed_client = AppStoreFeedClient::new(&config.feed_base_url)
        .context("Failed to build feed client")?;

    let service = IngestionService::new(store.clone(), feed_client, snapshots, TracingMetrics);

    // Ctrl-C cancels in-flight runs instead of killing them mid-write.
    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling...");
            cancel_on_signal.cancel();
        }
    });

    match config.command {
        Command::Ingest {
            app,
            store_id,
            config: config_path,
            bypass_quota,
        } => {
            let mut options = RunOptions::manual();
            if bypass_quota {
                options = options.with_quota_bypass();
            }
            handle_ingest(&service, &store, app, store_id, config_path, options, cancel).await?;
        }
        Command::Runs { limit } => {
            show_runs(&store, limit).await?;
        }
    }

    Ok(())
}

/// Handle the ingest command with its three modes:
/// 1. Single app by store id
/// 2. Single app by configured name
/// 3. Batch mode (all enabled apps from config)
async fn handle_ingest(
    service: &Service,
    store: &PgIngestStore,
    app_name: Option<String>,
    store_id: Option<String>,
    config_path: Option<PathBuf>,
    options: RunOptions,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let reporter = TracingReporter;

    match (store_id, app_name) {
        (Some(store_id), _) => {
            let outcome = ingest_by_store_id(service, store, &store_id, options, cancel).await?;
            print_outcome(&store_id, &outcome);
            Ok(())
        }
        (None, Some(name)) => {
            let apps_config = load_apps_config(config_path)?
                .context("No apps.toml found; pass --config or create one")?;
            let entry = apps_config
                .find_by_name(&name)
                .with_context(|| format!("App '{name}' not found in config"))?;
            let outcome =
                ingest_by_store_id(service, store, &entry.store_id, options, cancel).await?;
            print_outcome(&entry.name, &outcome);
            Ok(())
        }
        (None, None) => {
            let apps_config = load_apps_config(config_path)?
                .context("No apps.toml found; pass --config or create one")?;
            let enabled: Vec<&AppEntry> = apps_config.enabled_apps();
            if enabled.is_empty() {
                println!("No enabled apps in config.");
                return Ok(());
            }

            let summary = service
                .ingest_all(&enabled, options, cancel, &reporter)
                .await;

            println!(
                "\nBatch finished: {} succeeded, {} failed",
                summary.succeeded(),
                summary.failed()
            );
            for result in &summary.results {
                print_outcome(&result.app_name, &result.outcome);
            }
            Ok(())
        }
    }
}

async fn ingest_by_store_id(
    service: &Service,
    store: &PgIngestStore,
    store_id: &str,
    options: RunOptions,
    cancel: CancellationToken,
) -> anyhow::Result<IngestionOutcome> {
    use reverb_core::IngestStore;

    let app = store
        .get_app_by_store_id(store_id)
        .await?
        .with_context(|| format!("No tracked app with store id {store_id}"))?;

    Ok(service
        .ingest_with_progress(app.id, options, cancel, &TracingReporter)
        .await)
}

fn print_outcome(name: &str, outcome: &IngestionOutcome) {
    if outcome.success {
        println!(
            "{name}: ok - {} fetched, {} inserted, {} duplicates, {} skipped ({} ms)",
            outcome.reviews_fetched,
            outcome.reviews_inserted,
            outcome.duplicate_count,
            outcome.reviews_skipped,
            outcome.duration_ms
        );
    } else {
        let error = outcome
            .error
            .as_ref()
            .map(|e| format!("{} ({})", e.message, e.code))
            .unwrap_or_else(|| "unknown error".to_string());
        println!("{name}: failed - {error}");
    }
}

async fn show_runs(store: &PgIngestStore, limit: i64) -> anyhow::Result<()> {
    use reverb_core::IngestStore;

    let runs = store.list_recent_runs(limit).await?;
    if runs.is_empty() {
        println!("No runs recorded yet.");
        return Ok(());
    }

    for run in runs {
        let duration = run
            .duration_ms
            .map(|ms| format!("{ms} ms"))
            .unwrap_or_else(|| "-".to_string());
        let error = run
            .error_code
            .as_deref()
            .map(|c| format!(" [{c}]"))
            .unwrap_or_default();
        println!(
            "{} {} {:<10} fetched={} inserted={} dup={} skipped={} {}{}",
            run.requested_at.format("%Y-%m-%d %H:%M:%S"),
            run.id,
            run.status,
            run.counts.fetched,
            run.counts.inserted,
            run.counts.duplicates,
            run.counts.skipped,
            duration,
            error
        );
    }
    Ok(())
}
