//! Subcommand implementations for the imaging-scan binary.

pub mod output;

use anyhow::{bail, Context as _, Result};
use chrono::NaiveDateTime;
use imaging_db::{ImagingDb, ScanKey, SessionKey};
use imaging_scan::{
    AutoGenerateOptions, DirectoryLink, ImagingConfig, ParserRegistry, ScanModule,
};
use output::{print_json, print_table};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Accepted spellings of a session datetime on the command line.
const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y%m%d_%H%M%S"];

/// Configuration and flags shared by every subcommand.
pub struct Context {
    pub config: ImagingConfig,
    pub config_path: PathBuf,
    pub json: bool,
}

impl Context {
    /// Load the configuration file if it exists, else start from defaults.
    pub fn load(config_path: Option<PathBuf>, db: Option<PathBuf>, json: bool) -> Result<Self> {
        let config_path = config_path.unwrap_or_else(ImagingConfig::default_path);
        let mut config = if config_path.exists() {
            ImagingConfig::load(&config_path)
                .with_context(|| format!("Failed to load {}", config_path.display()))?
        } else {
            ImagingConfig::default()
        };
        if let Some(db) = db {
            config.database_path = db;
        }

        Ok(Self {
            config,
            config_path,
            json,
        })
    }

    async fn open_db(&self) -> Result<ImagingDb> {
        ImagingDb::open_existing(&self.config.database_path)
            .await
            .with_context(|| {
                format!(
                    "Cannot open {} (run `imaging-scan init` first)",
                    self.config.database_path.display()
                )
            })
    }

    async fn into_module(self) -> Result<ScanModule> {
        let db = self.open_db().await?;
        let link = Arc::new(DirectoryLink::new(self.config));
        Ok(ScanModule::new(
            db,
            link,
            ParserRegistry::with_builtin_readers(),
        ))
    }
}

pub fn parse_session(subject: &str, datetime: &str) -> Result<SessionKey> {
    let parsed = DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(datetime.trim(), format).ok())
        .with_context(|| {
            format!(
                "Invalid session datetime '{}' (expected e.g. 2024-03-05 14:07:09)",
                datetime
            )
        })?;
    Ok(SessionKey::new(subject, parsed))
}

// ============================================================================
// Commands
// ============================================================================

pub async fn init(
    mut ctx: Context,
    roots: Vec<PathBuf>,
    processed: Option<PathBuf>,
    force: bool,
) -> Result<()> {
    if ctx.config_path.exists() && !force && (!roots.is_empty() || processed.is_some()) {
        bail!(
            "{} already exists; pass --force to overwrite it",
            ctx.config_path.display()
        );
    }
    if !roots.is_empty() {
        ctx.config.imaging_root_data_dirs = roots;
    }
    if processed.is_some() {
        ctx.config.processed_data_dir = processed;
    }
    if !ctx.config_path.exists() || force {
        ctx.config
            .save(&ctx.config_path)
            .with_context(|| format!("Failed to write {}", ctx.config_path.display()))?;
    }

    let db = ImagingDb::open(&ctx.config.database_path).await?;
    let software = db.list_acquisition_software().await?;
    db.close().await;

    info!(config = %ctx.config_path.display(), "Initialized");
    if ctx.json {
        print_json(&serde_json::json!({
            "config": ctx.config_path,
            "database": ctx.config.database_path,
            "acquisition_software": software,
        }))
    } else {
        println!("Config:   {}", ctx.config_path.display());
        println!("Database: {}", ctx.config.database_path.display());
        if ctx.config.imaging_root_data_dirs.is_empty() {
            println!("No imaging roots configured yet; re-run with --root <DIR> --force.");
        }
        Ok(())
    }
}

pub async fn add_session(ctx: &Context, subject: &str, datetime: &str) -> Result<()> {
    let session = parse_session(subject, datetime)?;
    let db = ctx.open_db().await?;
    db.insert_session(&session).await?;

    if ctx.json {
        print_json(&session)
    } else {
        println!("Session {}", session);
        Ok(())
    }
}

pub async fn autogen(
    ctx: Context,
    subject: &str,
    datetime: &str,
    scanner: Option<String>,
    notes: Option<String>,
) -> Result<()> {
    let session = parse_session(subject, datetime)?;
    let json = ctx.json;
    let module = ctx.into_module().await?;

    if !module.db().session_exists(&session).await? {
        bail!(
            "Unknown session {} (register it with `imaging-scan add-session`)",
            session
        );
    }
    if let Some(scanner) = &scanner {
        module.db().insert_equipment(scanner).await?;
    }

    let options = AutoGenerateOptions {
        scanner,
        scan_notes: notes,
    };
    let report = module.auto_generate_scan(&session, &options).await?;

    if json {
        return print_json(&report);
    }
    println!(
        "{}: {} scan(s) inserted ({})",
        report.session,
        report.inserted.len(),
        report.acq_software
    );
    if !report.skipped.is_empty() {
        print_table(
            &["scan_id", "directory", "reason"],
            report
                .skipped
                .iter()
                .map(|s| {
                    vec![
                        s.scan_id.to_string(),
                        s.directory.display().to_string(),
                        s.reason.clone(),
                    ]
                })
                .collect(),
        );
    }
    Ok(())
}

pub async fn ingest(
    ctx: Context,
    subject: &str,
    datetime: &str,
    scan_id: i32,
    force: bool,
) -> Result<()> {
    let key = ScanKey::new(parse_session(subject, datetime)?, scan_id);
    let json = ctx.json;
    let module = ctx.into_module().await?;

    if force {
        module.delete_scan_info(&key).await?;
    }
    let record = module.ingest(&key).await?;

    if json {
        return print_json(&ScanDetail {
            key: &key,
            info: Some(&record.info),
            fields: &record.fields,
            files: &record.files,
        });
    }
    println!(
        "{}: {} field(s), {} file(s)",
        key,
        record.info.nfields,
        record.files.len()
    );
    Ok(())
}

pub async fn populate(ctx: Context) -> Result<()> {
    let json = ctx.json;
    let module = ctx.into_module().await?;
    let report = module.populate().await?;

    if json {
        return print_json(&report);
    }
    println!(
        "Ingested {} scan(s), {} failed",
        report.ingested.len(),
        report.failed.len()
    );
    if !report.failed.is_empty() {
        print_table(
            &["scan", "error"],
            report
                .failed
                .iter()
                .map(|f| vec![f.key.to_string(), f.error.clone()])
                .collect(),
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct ScanDetail<'a> {
    #[serde(flatten)]
    key: &'a ScanKey,
    info: Option<&'a imaging_db::ScanInfo>,
    fields: &'a [imaging_db::ScanField],
    files: &'a [imaging_db::ScanFile],
}

pub async fn show(
    ctx: &Context,
    subject: Option<String>,
    datetime: Option<String>,
    scan_id: Option<i32>,
) -> Result<()> {
    let db = ctx.open_db().await?;

    let session = match (&subject, &datetime) {
        (Some(subject), Some(datetime)) => Some(parse_session(subject, datetime)?),
        (None, None) => None,
        _ => bail!("Give both SUBJECT and DATETIME to select a session"),
    };

    if let (Some(session), Some(scan_id)) = (&session, scan_id) {
        let key = ScanKey::new(session.clone(), scan_id);
        let scan = db
            .get_scan(&key)
            .await?
            .with_context(|| format!("Scan {} not found", key))?;
        let info = db.get_scan_info(&key).await?;
        let fields = db.list_scan_fields(&key).await?;
        let files = db.list_scan_files(&key).await?;

        if ctx.json {
            return print_json(&ScanDetail {
                key: &key,
                info: info.as_ref(),
                fields: &fields,
                files: &files,
            });
        }
        output::print_scan_detail(&scan, info.as_ref(), &fields, &files);
        return Ok(());
    }

    let scans = db.list_scans(session.as_ref()).await?;
    if ctx.json {
        return print_json(&scans);
    }
    let pending: HashSet<ScanKey> = db.scans_without_info().await?.into_iter().collect();
    print_table(
        &["subject", "session_datetime", "scan_id", "acq_software", "scanner", "ingested"],
        scans
            .iter()
            .map(|scan| {
                vec![
                    scan.key.session.subject.clone(),
                    scan.key.session.datetime_str(),
                    scan.key.scan_id.to_string(),
                    scan.acq_software.clone(),
                    scan.scanner.clone().unwrap_or_default(),
                    (if pending.contains(&scan.key) { "no" } else { "yes" }).to_string(),
                ]
            })
            .collect(),
    );
    Ok(())
}

pub fn print_config(ctx: &Context) -> Result<()> {
    if ctx.json {
        return print_json(&ctx.config);
    }
    println!("# {}", ctx.config_path.display());
    print!(
        "{}",
        toml::to_string_pretty(&ctx.config).context("Failed to render configuration")?
    );
    Ok(())
}
