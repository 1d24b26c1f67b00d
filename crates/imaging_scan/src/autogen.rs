//! Scan auto-generation from the raw files under a session directory.

use crate::discover;
use crate::error::{Result, ScanError};
use crate::ingest::ScanModule;
use crate::link;
use crate::paths;
use imaging_db::{AcquisitionSoftware, Scan, ScanKey, SessionKey};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Suffixes probed in priority order; the first with any file decides the
/// acquisition software of the whole session.
pub const PROBE_ORDER: [AcquisitionSoftware; 3] = [
    AcquisitionSoftware::Nis,
    AcquisitionSoftware::Scanbox,
    AcquisitionSoftware::ScanImage,
];

/// Values applied to every generated Scan row.
#[derive(Debug, Clone, Default)]
pub struct AutoGenerateOptions {
    pub scanner: Option<String>,
    pub scan_notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutoGenerateReport {
    pub session: SessionKey,
    pub acq_software: AcquisitionSoftware,
    pub inserted: Vec<ScanKey>,
    pub skipped: Vec<SkippedScan>,
}

/// A candidate scan whose raw files could not be resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedScan {
    pub scan_id: i32,
    pub directory: PathBuf,
    pub reason: String,
}

/// The acquisition software of a session directory and all of its raw files.
pub fn probe_session(session_dir: &Path) -> Result<(AcquisitionSoftware, Vec<PathBuf>)> {
    for software in PROBE_ORDER {
        let files = discover::files_with_extension(session_dir, software.file_extension())?;
        if !files.is_empty() {
            debug!(
                dir = %session_dir.display(),
                acq_software = %software,
                files = files.len(),
                "Detected acquisition software"
            );
            return Ok((software, files));
        }
    }

    Err(ScanError::not_found(format!(
        "Unable to identify scan files under {}",
        session_dir.display()
    )))
}

impl ScanModule {
    /// Insert one Scan row per directory of raw files in the session.
    ///
    /// `scan_id`s follow the lexicographic order of the directories. A
    /// candidate whose files cannot be located (not found, I/O) is skipped
    /// and reported; any other failure aborts before anything is inserted.
    pub async fn auto_generate_scan(
        &self,
        session: &SessionKey,
        options: &AutoGenerateOptions,
    ) -> Result<AutoGenerateReport> {
        let roots = link::imaging_root_data_dirs(self.link())?;
        let session_dir =
            paths::find_full_path(&roots, &self.link().session_directory(session)?)?;
        let (software, files) = probe_session(&session_dir)?;

        let mut scans = Vec::new();
        let mut skipped = Vec::new();
        for (idx, directory) in discover::group_by_parent(&files).into_keys().enumerate() {
            let scan_id = i32::try_from(idx)
                .map_err(|_| ScanError::config("too many scan directories in one session"))?;
            let key = ScanKey::new(session.clone(), scan_id);

            match link::locate_raw_files(self.link(), software, &key) {
                Ok(_) => {
                    let mut scan = Scan::new(key, software);
                    if let Some(scanner) = &options.scanner {
                        scan = scan.with_scanner(scanner.clone());
                    }
                    if let Some(notes) = &options.scan_notes {
                        scan = scan.with_notes(notes.clone());
                    }
                    scans.push(scan);
                }
                Err(err @ (ScanError::NotFound(_) | ScanError::Io(_))) => {
                    warn!(
                        scan = %key,
                        dir = %directory.display(),
                        error = %err,
                        "Skipping scan candidate"
                    );
                    skipped.push(SkippedScan {
                        scan_id,
                        directory,
                        reason: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }

        self.db().insert_scans(&scans).await?;
        if !self.registry().has_parser(software.as_str()) {
            warn!(
                acq_software = %software,
                "No parser registered; ingestion of these scans will fail"
            );
        }

        info!(
            session = %session,
            acq_software = %software,
            inserted = scans.len(),
            skipped = skipped.len(),
            "Auto-generated scans"
        );
        Ok(AutoGenerateReport {
            session: session.clone(),
            acq_software: software,
            inserted: scans.into_iter().map(|scan| scan.key).collect(),
            skipped,
        })
    }
}
