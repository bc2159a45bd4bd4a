//! ytetl Ingest Library
//!
//! Batch pipeline that collects YouTube search results and keeps a SQL table
//! of videos up to date.
//!
//! # Stages
//!
//! - **Extract** ([`youtube`]): paginated search with bounded retry, one
//!   immutable JSON snapshot per query
//! - **Transform** ([`normalize`]): snapshots → fixed-shape records in CSV,
//!   malformed items quarantined
//! - **Load** ([`sink`]): idempotent upsert keyed by `video_id`
//!
//! [`coordinator`] wires the stages together and records each run's
//! artifacts in a manifest so stages can also run as separate processes.
//!
//! # Example
//!
//! ```no_run
//! use ytetl_ingest::config::PipelineConfig;
//! use ytetl_ingest::coordinator::{run_pipeline, RunId};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PipelineConfig::builder()
//!         .queries(["kpop", "music"])
//!         .max_total(50)
//!         .api_key(std::env::var("YT_API_KEY")?)
//!         .db_url("sqlite://data/yt.db?mode=rwc")
//!         .build();
//!
//!     let summary = run_pipeline(&config, RunId::generate()).await?;
//!     println!("loaded {} rows", summary.load.rows_loaded);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod artifacts;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod normalize;
pub mod sink;
pub mod youtube;

// Re-export commonly used types
pub use config::PipelineConfig;
pub use error::{ConfigError, IngestError, Result};

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{
    LoadModePreference, DEFAULT_API_BASE_URL, DEFAULT_DATA_DIR, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_MAX_TOTAL, DEFAULT_PAGE_DELAY_MS, DEFAULT_QUERY_CONCURRENCY, DEFAULT_TABLE_NAME,
};

/// ytetl - YouTube search to SQL batch pipeline
#[derive(Parser, Debug)]
#[command(name = "ytetl")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Root directory for snapshots, tables and run manifests
    #[arg(long, env = "YTETL_DATA_DIR", default_value = DEFAULT_DATA_DIR, global = true)]
    pub data_dir: PathBuf,

    /// Destination table name
    #[arg(long, env = "YTETL_TABLE", default_value = DEFAULT_TABLE_NAME, global = true)]
    pub table: String,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch search results and write one snapshot per query
    Extract {
        #[command(flatten)]
        source: SourceArgs,

        /// Run id to record the snapshots under (generated if omitted)
        #[arg(long)]
        run_id: Option<String>,
    },

    /// Normalize a run's snapshots into CSV tables
    Transform {
        /// Run whose snapshots to read (most recently created run if omitted)
        #[arg(long)]
        run_id: Option<String>,

        /// Snapshot files to read instead of a run's manifest
        #[arg(long = "input", value_name = "PATH")]
        inputs: Vec<PathBuf>,
    },

    /// Merge a run's CSV tables into the destination table
    Load {
        #[command(flatten)]
        sink: SinkArgs,

        /// Run whose tables to load (most recently created run if omitted)
        #[arg(long)]
        run_id: Option<String>,

        /// CSV files to load instead of a run's manifest
        #[arg(long = "input", value_name = "PATH")]
        inputs: Vec<PathBuf>,
    },

    /// Extract, transform and load in one go
    Run {
        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        sink: SinkArgs,

        /// Run id (generated if omitted)
        #[arg(long)]
        run_id: Option<String>,
    },
}

/// Search API settings
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Comma-separated search keywords
    #[arg(short, long, env = "YT_QUERY")]
    pub query: Option<String>,

    /// Items to collect per query
    #[arg(long, env = "YT_MAX_TOTAL", default_value_t = DEFAULT_MAX_TOTAL)]
    pub max_total: usize,

    /// YouTube Data API key
    #[arg(long, env = "YT_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, env = "YT_API_BASE_URL", default_value = DEFAULT_API_BASE_URL, hide = true)]
    pub api_base_url: String,

    /// Queries fetched at the same time
    #[arg(long, env = "YTETL_QUERY_CONCURRENCY", default_value_t = DEFAULT_QUERY_CONCURRENCY)]
    pub query_concurrency: usize,

    /// Pause between pages in milliseconds
    #[arg(long, env = "YTETL_PAGE_DELAY_MS", default_value_t = DEFAULT_PAGE_DELAY_MS)]
    pub page_delay_ms: u64,

    /// Attempts per page before giving up
    #[arg(long, env = "YTETL_MAX_ATTEMPTS", default_value_t = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,
}

/// Destination settings
#[derive(Args, Debug, Clone)]
pub struct SinkArgs {
    /// Database URL (postgres://… or sqlite://…)
    #[arg(long, env = "DB_URL", hide_env_values = true)]
    pub db_url: Option<String>,

    /// How batches are merged
    #[arg(long, env = "YTETL_LOAD_MODE", value_enum, default_value_t = LoadModePreference::Auto)]
    pub load_mode: LoadModePreference,
}
