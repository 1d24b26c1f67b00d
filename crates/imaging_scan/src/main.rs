//! imaging-scan: register calcium-imaging scans and ingest their headers.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use imaging_logging::LogConfig;
use std::path::PathBuf;
use std::process::ExitCode;

mod cli;

#[derive(Parser, Debug)]
#[command(name = "imaging-scan", about = "Calcium-imaging scan metadata ingestion")]
struct Cli {
    /// Configuration file (default: ~/.imaging_scan/imaging_scan.toml)
    #[arg(long, global = true, env = "IMAGING_SCAN_CONFIG")]
    config: Option<PathBuf>,

    /// Database path, overriding the configuration
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the database and write a configuration file
    Init {
        /// Root directory of raw imaging data (repeatable, searched in order)
        #[arg(long = "root")]
        roots: Vec<PathBuf>,

        /// Root directory of processed data
        #[arg(long)]
        processed: Option<PathBuf>,

        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },

    /// Register an upstream recording session
    AddSession {
        subject: String,
        /// Session start, e.g. "2024-03-05 14:07:09"
        datetime: String,
    },

    /// Insert one Scan per raw-data directory of a session
    Autogen {
        subject: String,
        datetime: String,

        /// Scanner (equipment) recorded on every generated scan
        #[arg(long)]
        scanner: Option<String>,

        /// Notes recorded on every generated scan
        #[arg(long)]
        notes: Option<String>,
    },

    /// Ingest ScanInfo for one scan
    Ingest {
        subject: String,
        datetime: String,
        scan_id: i32,

        /// Delete existing ScanInfo first
        #[arg(long)]
        force: bool,
    },

    /// Ingest ScanInfo for every scan that lacks it
    Populate,

    /// List scans, or show one scan with its fields and files
    Show {
        subject: Option<String>,
        datetime: Option<String>,
        scan_id: Option<i32>,
    },

    /// Print the effective configuration
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _log_guard = match imaging_logging::init_logging(LogConfig {
        app_name: "imaging-scan",
        verbose: cli.verbose,
        console_only: false,
    }) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Warning: file logging disabled: {:#}", err);
            None
        }
    };

    let json = cli.json;
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if json {
                cli::output::print_json_error(&err);
            } else {
                eprintln!("Error: {:#}", err);
            }
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let command = cli.command;
    let ctx = cli::Context::load(cli.config, cli.db, cli.json)?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    rt.block_on(async {
        match command {
            Commands::Init {
                roots,
                processed,
                force,
            } => cli::init(ctx, roots, processed, force).await,
            Commands::AddSession { subject, datetime } => {
                cli::add_session(&ctx, &subject, &datetime).await
            }
            Commands::Autogen {
                subject,
                datetime,
                scanner,
                notes,
            } => cli::autogen(ctx, &subject, &datetime, scanner, notes).await,
            Commands::Ingest {
                subject,
                datetime,
                scan_id,
                force,
            } => cli::ingest(ctx, &subject, &datetime, scan_id, force).await,
            Commands::Populate => cli::populate(ctx).await,
            Commands::Show {
                subject,
                datetime,
                scan_id,
            } => cli::show(&ctx, subject, datetime, scan_id).await,
            Commands::Config => cli::print_config(&ctx),
        }
    })
}
