use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// CLI configuration parsed from command line arguments and environment variables
#[derive(Parser, Debug)]
#[command(name = "reverb")]
#[command(
    author,
    version,
    about = "Multi-tenant app review tracking and ingestion"
)]
#[command(after_help = "Examples:
  reverb ingest                    # Ingest all enabled apps from config
  reverb ingest --app procreate    # Ingest a specific app by name
  reverb ingest --store-id 425073498
  reverb runs --limit 20")]
pub struct Config {
    /// PostgreSQL database connection URL
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Base URL of the upstream review feed
    #[arg(long, env = "FEED_BASE_URL", default_value = reverb_client::DEFAULT_BASE_URL)]
    pub feed_base_url: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Ingest reviews for tracked apps
    #[command(after_help = "Examples:
  reverb ingest                        # All enabled apps from apps.toml
  reverb ingest --app procreate        # One app by configured name
  reverb ingest --store-id 425073498   # One app by store id
  reverb ingest --config ~/custom.toml # Custom config file")]
    Ingest {
        /// Ingest a specific app by name from the config file
        #[arg(short, long, value_name = "NAME", conflicts_with = "store_id")]
        app: Option<String>,

        /// Ingest a specific app by its external store id
        #[arg(long, value_name = "ID")]
        store_id: Option<String>,

        /// Custom path to the apps.toml configuration file
        #[arg(short, long, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Skip the workspace run-quota check (support tooling)
        #[arg(long)]
        bypass_quota: bool,
    },
    /// List recent ingestion runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },
}
