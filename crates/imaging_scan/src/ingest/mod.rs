//! ScanInfo ingestion.
//!
//! A [`ScanParser`] turns the raw files of one acquisition software into
//! ScanInfo and Field rows. [`ParserRegistry`] selects the parser from the
//! scan's `acq_software` tag and [`ScanModule`] runs the whole step: locate,
//! parse, relativize file paths, persist.

mod nikon;
mod scanbox;
mod scanimage;

pub use nikon::NikonParser;
pub use scanbox::ScanboxParser;
pub use scanimage::ScanImageParser;

use crate::error::{Result, ScanError};
use crate::link::{self, ImagingLink};
use crate::paths;
use crate::readers::TiffScanImageReader;
use imaging_db::{ImagingDb, ScanField, ScanFile, ScanInfo, ScanInfoRecord, ScanKey};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// ScanInfo and Field rows parsed from raw files, before file rows are added.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedScan {
    pub info: ScanInfo,
    pub fields: Vec<ScanField>,
}

/// Ingestion strategy for one acquisition software.
pub trait ScanParser: Send + Sync {
    /// The `acq_software` tag this parser handles.
    fn acq_software(&self) -> &str;

    /// Raw files of the scan, in acquisition order.
    fn locate(&self, link: &dyn ImagingLink, key: &ScanKey) -> Result<Vec<PathBuf>>;

    /// Parse the raw files into normalized rows.
    fn parse(&self, key: &ScanKey, files: &[PathBuf]) -> Result<ParsedScan>;
}

/// First file of a scan; vendors that store metadata per file only need this one.
pub(crate) fn first_file(files: &[PathBuf]) -> Result<&Path> {
    files
        .first()
        .map(PathBuf::as_path)
        .ok_or_else(|| ScanError::not_found("scan has no raw files"))
}

pub(crate) fn to_i32(path: &Path, what: &str, value: i64) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| ScanError::reader(path, format!("{} out of range: {}", what, value)))
}

/// Position of a field in the parsed list, as stored in `field_idx`.
pub(crate) fn field_index(path: &Path, idx: usize) -> Result<i32> {
    i32::try_from(idx)
        .map_err(|_| ScanError::reader(path, format!("field index out of range: {}", idx)))
}

// ============================================================================
// Registry
// ============================================================================

/// Parsers keyed on the acquisition-software tag.
pub struct ParserRegistry {
    parsers: HashMap<String, Box<dyn ScanParser>>,
}

impl ParserRegistry {
    /// Empty registry; every tag is not-implemented until registered.
    pub fn new() -> Self {
        Self {
            parsers: HashMap::new(),
        }
    }

    /// Registry with the readers that ship with the crate (ScanImage TIFF).
    pub fn with_builtin_readers() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(ScanImageParser::new(Arc::new(
            TiffScanImageReader::new(),
        ))));
        registry
    }

    /// Register a parser, replacing any parser for the same tag.
    pub fn register(&mut self, parser: Box<dyn ScanParser>) {
        let tag = parser.acq_software().to_string();
        debug!(acq_software = %tag, "Registering scan parser");
        self.parsers.insert(tag, parser);
    }

    pub fn with_parser(mut self, parser: Box<dyn ScanParser>) -> Self {
        self.register(parser);
        self
    }

    /// The parser for `acq_software`, or not-implemented.
    pub fn get_parser(&self, acq_software: &str) -> Result<&dyn ScanParser> {
        self.parsers
            .get(acq_software)
            .map(|parser| parser.as_ref())
            .ok_or_else(|| {
                ScanError::not_implemented(format!(
                    "Loading routine not implemented for {} acquisition software",
                    acq_software
                ))
            })
    }

    pub fn has_parser(&self, acq_software: &str) -> bool {
        self.parsers.contains_key(acq_software)
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.parsers.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Scan module
// ============================================================================

/// Outcome of [`ScanModule::populate`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PopulateReport {
    pub ingested: Vec<ScanKey>,
    pub failed: Vec<PopulateFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopulateFailure {
    #[serde(flatten)]
    pub key: ScanKey,
    pub error: String,
}

/// The scan schema bound to one storage link and one set of parsers.
pub struct ScanModule {
    db: ImagingDb,
    link: Arc<dyn ImagingLink>,
    registry: ParserRegistry,
}

impl ScanModule {
    pub fn new(db: ImagingDb, link: Arc<dyn ImagingLink>, registry: ParserRegistry) -> Self {
        Self { db, link, registry }
    }

    pub fn db(&self) -> &ImagingDb {
        &self.db
    }

    pub fn link(&self) -> &dyn ImagingLink {
        self.link.as_ref()
    }

    pub fn registry(&self) -> &ParserRegistry {
        &self.registry
    }

    /// Ingest one scan: parse its raw files and persist ScanInfo, Fields and
    /// ScanFiles in one transaction.
    ///
    /// A scan that was already ingested fails with a duplicate-key error.
    pub async fn ingest(&self, key: &ScanKey) -> Result<ScanInfoRecord> {
        let acq_software = self.db.fetch_acq_software(key).await?;
        let parser = self.registry.get_parser(&acq_software)?;

        let raw_files = parser.locate(self.link(), key)?;
        let first = first_file(&raw_files)?;
        let parsed = parser.parse(key, &raw_files)?;

        let roots = link::imaging_root_data_dirs(self.link())?;
        let root = paths::find_root_directory(&roots, first)?;
        let files = raw_files
            .iter()
            .map(|path| {
                Ok(ScanFile {
                    key: key.clone(),
                    file_path: paths::relative_posix(&root, path)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let record = ScanInfoRecord {
            info: parsed.info,
            fields: parsed.fields,
            files,
        };
        self.db.insert_scan_info(&record).await?;

        info!(
            scan = %key,
            acq_software = %acq_software,
            nfields = record.info.nfields,
            files = record.files.len(),
            root = %root.display(),
            "Ingested scan info"
        );
        Ok(record)
    }

    /// Ingest every scan without ScanInfo, in key order.
    ///
    /// Failures are logged and collected; they do not stop the run.
    pub async fn populate(&self) -> Result<PopulateReport> {
        let pending = self.db.scans_without_info().await?;
        let mut report = PopulateReport::default();

        for key in pending {
            match self.ingest(&key).await {
                Ok(_) => report.ingested.push(key),
                Err(err) => {
                    warn!(scan = %key, error = %err, "Scan info ingestion failed");
                    report.failed.push(PopulateFailure {
                        key,
                        error: err.to_string(),
                    });
                }
            }
        }

        info!(
            ingested = report.ingested.len(),
            failed = report.failed.len(),
            "Populate finished"
        );
        Ok(report)
    }

    /// Remove a scan's ScanInfo (and its parts) so it can be ingested again.
    pub async fn delete_scan_info(&self, key: &ScanKey) -> Result<bool> {
        let deleted = self.db.delete_scan_info(key).await?;
        if deleted {
            info!(scan = %key, "Deleted scan info");
        }
        Ok(deleted)
    }
}
