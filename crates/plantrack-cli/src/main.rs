//! plantrack - versioned plan store on the command line
//!
//! Results are printed to stdout as JSON; logs go to stderr.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use plantrack_core::{constants, Config, Database};

mod commands;

/// plantrack - Versioned plan storage
#[derive(Parser)]
#[command(name = "plantrack")]
#[command(about = "Store, version and measure plans", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Database file (overrides PLANTRACK_DB and the config file)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Config file (defaults to ~/.plantrack/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or update a plan; payload comes from --data, --file or stdin
    Put {
        id: String,

        /// Display name (defaults to the existing name, or the id)
        #[arg(long)]
        name: Option<String>,

        /// Inline JSON payload
        #[arg(long, conflicts_with = "file")]
        data: Option<String>,

        /// Read the JSON payload from a file
        #[arg(long)]
        file: Option<PathBuf>,

        /// Change summary recorded on the archived version
        #[arg(short = 'm', long)]
        summary: Option<String>,

        /// Only write if the live version equals this (0 = must not exist)
        #[arg(long)]
        expect_version: Option<i64>,
    },

    /// Show the current plan, or one version of it
    Get {
        id: String,

        #[arg(long)]
        version: Option<i64>,
    },

    /// List every version of a plan, oldest first
    Versions { id: String },

    /// List plans, most recently updated first
    List {
        #[arg(long)]
        status: Option<String>,

        /// Match the payload "type" field
        #[arg(long = "type")]
        kind: Option<String>,

        #[arg(long)]
        updated_after: Option<DateTime<Utc>>,

        #[arg(long)]
        updated_before: Option<DateTime<Utc>>,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Find plans whose payload fingerprint matches
    FindHash { hash: String },

    /// Record and query metric samples
    Metric {
        #[command(subcommand)]
        action: MetricCommands,
    },

    /// Apply the configured retention policy
    Prune {
        /// Report what would be removed without deleting
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum MetricCommands {
    /// Record one sample
    Record {
        plan_id: String,
        version: i64,
        name: String,
        step: i64,
        #[arg(allow_negative_numbers = true)]
        value: f64,

        /// Sample time (RFC 3339); defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Print one series ordered by step
    Query {
        plan_id: String,
        version: i64,
        name: String,
    },
    /// Print a plan's samples in a time window [from, to)
    Range {
        plan_id: String,

        #[arg(long)]
        from: DateTime<Utc>,

        #[arg(long)]
        to: DateTime<Utc>,
    },
}

fn init_tracing(config: &Config) {
    let fallback = config
        .log_filter
        .as_deref()
        .unwrap_or(constants::config::DEFAULT_LOG_FILTER);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    init_tracing(&config);

    let db_path = config.resolve_database_path(cli.db.as_deref());
    tracing::info!("Using database {}", db_path.display());
    let db = Database::new(&db_path)?;

    let output = commands::run(&db, &config, cli.command)?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
