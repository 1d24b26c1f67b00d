//! The link between the scan schema and a lab's storage layout.
//!
//! Where raw data lives differs per lab and per machine. An [`ImagingLink`]
//! is handed to [`crate::ScanModule`] once at construction and answers every
//! question about roots, session directories and raw files.

use crate::config::ImagingConfig;
use crate::discover;
use crate::error::{Result, ScanError};
use crate::paths;
use imaging_db::{AcquisitionSoftware, ScanKey, SessionKey};
use std::fmt::Write as _;
use std::path::PathBuf;

/// Environment-specific path and file resolution.
pub trait ImagingLink: Send + Sync {
    /// Candidate root directories for raw imaging data, in search order.
    fn imaging_root_data_dirs(&self) -> Result<Vec<PathBuf>>;

    /// Root directory for processed data, if the lab keeps one.
    fn processed_root_data_dir(&self) -> Option<PathBuf> {
        None
    }

    /// Session directory, absolute or relative to one of the roots.
    fn session_directory(&self, session: &SessionKey) -> Result<PathBuf>;

    /// Full paths of the ScanImage `.tif` files of a scan.
    fn scan_image_files(&self, _scan: &ScanKey) -> Result<Vec<PathBuf>> {
        Err(missing_locator("scan_image_files"))
    }

    /// Full paths of the Scanbox `.sbx` files of a scan.
    fn scan_box_files(&self, _scan: &ScanKey) -> Result<Vec<PathBuf>> {
        Err(missing_locator("scan_box_files"))
    }

    /// Full paths of the Nikon `.nd2` files of a scan.
    fn nd2_files(&self, _scan: &ScanKey) -> Result<Vec<PathBuf>> {
        Err(missing_locator("nd2_files"))
    }
}

fn missing_locator(name: &str) -> ScanError {
    ScanError::config(format!("the imaging link does not provide {}", name))
}

/// Link roots followed by the processed-data root, when one is configured.
pub fn imaging_root_data_dirs(link: &dyn ImagingLink) -> Result<Vec<PathBuf>> {
    let mut roots = link.imaging_root_data_dirs()?;
    if let Some(processed) = link.processed_root_data_dir() {
        roots.push(processed);
    }
    if roots.is_empty() {
        return Err(ScanError::config("no imaging root data directories configured"));
    }
    Ok(roots)
}

/// Raw files of a scan for the given software; an empty list is not-found.
pub fn locate_raw_files(
    link: &dyn ImagingLink,
    software: AcquisitionSoftware,
    scan: &ScanKey,
) -> Result<Vec<PathBuf>> {
    let files = match software {
        AcquisitionSoftware::ScanImage => link.scan_image_files(scan)?,
        AcquisitionSoftware::Scanbox => link.scan_box_files(scan)?,
        AcquisitionSoftware::Nis => link.nd2_files(scan)?,
    };
    if files.is_empty() {
        return Err(ScanError::not_found(format!(
            "no {} files for scan {}",
            software, scan
        )));
    }
    Ok(files)
}

// ============================================================================
// Directory layout link
// ============================================================================

/// Link for the layout `<root>/<subject>/<session datetime>/<scan dir>/<files>`.
///
/// Scan directories are the directories holding raw files of the scan's
/// format, in lexicographic order; `scan_id` indexes into that order, which
/// matches the ids assigned by auto-generation.
#[derive(Debug, Clone)]
pub struct DirectoryLink {
    config: ImagingConfig,
}

impl DirectoryLink {
    pub fn new(config: ImagingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ImagingConfig {
        &self.config
    }

    fn files_for(&self, scan: &ScanKey, software: AcquisitionSoftware) -> Result<Vec<PathBuf>> {
        let roots = imaging_root_data_dirs(self)?;
        let session_dir = paths::find_full_path(&roots, &self.session_directory(&scan.session)?)?;
        let extension = software.file_extension();

        let scan_dirs = discover::scan_directories(&session_dir, extension)?;
        let scan_dir = usize::try_from(scan.scan_id)
            .ok()
            .and_then(|idx| scan_dirs.get(idx))
            .ok_or_else(|| {
                ScanError::not_found(format!(
                    "scan {} has no directory of .{} files under {} ({} found)",
                    scan,
                    extension,
                    session_dir.display(),
                    scan_dirs.len()
                ))
            })?;

        discover::files_in_directory(scan_dir, extension)
    }
}

impl ImagingLink for DirectoryLink {
    fn imaging_root_data_dirs(&self) -> Result<Vec<PathBuf>> {
        if self.config.imaging_root_data_dirs.is_empty() {
            return Err(ScanError::config(
                "imaging_root_data_dirs is empty in the configuration",
            ));
        }
        Ok(self.config.imaging_root_data_dirs.clone())
    }

    fn processed_root_data_dir(&self) -> Option<PathBuf> {
        self.config.processed_data_dir.clone()
    }

    fn session_directory(&self, session: &SessionKey) -> Result<PathBuf> {
        let mut dir_name = String::new();
        write!(
            dir_name,
            "{}",
            session
                .session_datetime
                .format(&self.config.session_dir_format)
        )
        .map_err(|_| {
            ScanError::config(format!(
                "invalid session_dir_format '{}'",
                self.config.session_dir_format
            ))
        })?;
        Ok(PathBuf::from(&session.subject).join(dir_name))
    }

    fn scan_image_files(&self, scan: &ScanKey) -> Result<Vec<PathBuf>> {
        self.files_for(scan, AcquisitionSoftware::ScanImage)
    }

    fn scan_box_files(&self, scan: &ScanKey) -> Result<Vec<PathBuf>> {
        self.files_for(scan, AcquisitionSoftware::Scanbox)
    }

    fn nd2_files(&self, scan: &ScanKey) -> Result<Vec<PathBuf>> {
        self.files_for(scan, AcquisitionSoftware::Nis)
    }
}
