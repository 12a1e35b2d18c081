//! Configuration types for Reverb components.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffSchedule;
use crate::error::AppError;
use crate::models::ReviewSort;
use crate::rate_limit::RateLimitConfig;
use crate::retry::RetryPolicy;

/// Database connection pool configuration.
pub struct DbConfig {
    pub max_connections: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self { max_connections: 5 }
    }
}

/// HTTP client configuration for upstream feed calls.
pub struct HttpConfig {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: "Reverb/0.1 (review-ingest-bot)".to_string(),
        }
    }
}

/// Ingestion pipeline configuration.
///
/// The overall record cap for a run is the workspace plan's
/// `max_reviews_per_run`; everything else about the fetch shape lives here.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Sort orders to fetch, in dedup priority order.
    pub sorts: Vec<ReviewSort>,
    /// Concurrent source fetches per run.
    pub source_concurrency: usize,
    /// Maximum pages walked per source.
    pub page_cap: u32,
    /// Minimum delay before every page after the first.
    pub page_delay: Duration,
    /// Chunk size for batched review inserts.
    pub insert_chunk_size: usize,
    /// Retry policy for individual page fetches.
    pub retry: RetryPolicy,
    /// Backoff table applied after failed runs.
    pub backoff: BackoffSchedule,
    /// Per-workspace upstream call budget.
    pub rate_limit: RateLimitConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            sorts: vec![ReviewSort::MostHelpful, ReviewSort::MostRecent],
            source_concurrency: 2,
            page_cap: 10,
            page_delay: Duration::from_millis(500),
            insert_chunk_size: 100,
            retry: RetryPolicy::default(),
            backoff: BackoffSchedule::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl IngestConfig {
    /// Per-source record cap for the given overall limit.
    ///
    /// `ceil(total / sources)` so one pathological source cannot starve the
    /// others of the shared budget.
    pub fn per_source_cap(&self, total_limit: u32) -> u32 {
        let sources = self.sorts.len().max(1) as u32;
        total_limit.div_ceil(sources)
    }
}

// =============================================================================
// Tracked app configuration (apps.toml)
// =============================================================================

/// Default enabled status when not specified in configuration.
fn default_enabled() -> bool {
    true
}

/// Default storefront country when not specified.
fn default_country() -> String {
    "us".to_string()
}

/// Root configuration structure for apps.toml.
///
/// # Example
///
/// ```toml
/// [[apps]]
/// name = "procreate"
/// store_id = "425073498"
/// country = "us"
///
/// [[apps]]
/// name = "things"
/// store_id = "904237743"
/// enabled = false
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppsConfig {
    /// Array of tracked app entries.
    pub apps: Vec<AppEntry>,
}

impl AppsConfig {
    /// Returns only enabled apps.
    pub fn enabled_apps(&self) -> Vec<&AppEntry> {
        self.apps.iter().filter(|a| a.enabled).collect()
    }

    /// Find an app by name (case-insensitive).
    pub fn find_by_name(&self, name: &str) -> Option<&AppEntry> {
        self.apps.iter().find(|a| a.name.eq_ignore_ascii_case(name))
    }
}

/// A single tracked app entry in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppEntry {
    /// Human-readable app name, used for `--app <name>` lookup and logging.
    pub name: String,

    /// External catalog identifier on the upstream store.
    pub store_id: String,

    /// Storefront country code. Defaults to `"us"`.
    #[serde(default = "default_country")]
    pub country: String,

    /// Whether this app is included in batch ingestion.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Optional description of the app.
    pub description: Option<String>,
}

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "apps.toml";

/// Returns the default configuration directory path (`~/.config/reverb/`).
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("reverb"))
}

/// Returns the default configuration file path.
pub fn default_config_path() -> Option<PathBuf> {
    default_config_dir().map(|p| p.join(CONFIG_FILE_NAME))
}

/// Template written when no configuration file exists yet.
const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Reverb tracked app configuration
#
# Usage:
#   reverb ingest                  # Ingest all enabled apps
#   reverb ingest --app procreate  # Ingest a specific app by name
#
# Set enabled = false to skip an app during batch ingestion.

[[apps]]
name = "procreate"
store_id = "425073498"
country = "us"
description = "Sketch, paint, create"
"#;

/// Load tracked app configuration from a TOML file.
///
/// # Arguments
/// * `path` - Optional custom path. If `None`, uses the default XDG path.
///
/// # Returns
/// * `Ok(Some(config))` - Configuration loaded successfully
/// * `Ok(None)` - No configuration file found at the default path
/// * `Err(e)` - Configuration file exists but is invalid
///
/// # Behavior
/// If no configuration file exists at the default path, a template file is
/// created so users can edit it and re-run.
pub fn load_apps_config(path: Option<PathBuf>) -> Result<Option<AppsConfig>, AppError> {
    let using_default_path = path.is_none();
    let config_path = match path {
        Some(p) => p,
        None => match default_config_path() {
            Some(p) => p,
            None => return Ok(None),
        },
    };

    if !config_path.exists() {
        if using_default_path {
            match create_default_config(&config_path) {
                Ok(()) => {
                    tracing::info!(
                        path = %config_path.display(),
                        "Created default apps.toml template"
                    );
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Could not create default config template");
                    return Ok(None);
                }
            }
        } else {
            return Err(AppError::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }
    }

    let content = std::fs::read_to_string(&config_path).map_err(|e| {
        AppError::Config(format!(
            "Failed to read config file '{}': {}",
            config_path.display(),
            e
        ))
    })?;

    let config: AppsConfig = toml::from_str(&content).map_err(|e| {
        AppError::Config(format!(
            "Invalid TOML in '{}': {}",
            config_path.display(),
            e
        ))
    })?;

    Ok(Some(config))
}

fn create_default_config(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, DEFAULT_CONFIG_TEMPLATE)
}
