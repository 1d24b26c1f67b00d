//! Row types for the scan schema.
//!
//! These mirror the tables one-to-one. Keys are kept as nested structs so a
//! `ScanKey` can be handed to any table that hangs off `scan`.

use crate::blob::DelayImage;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Text format of `session.session_datetime`.
pub const SESSION_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Maximum length of `scan.scan_notes`.
pub const SCAN_NOTES_MAX_LEN: usize = 4095;

/// Maximum length of `scan_info_file.file_path`.
pub const FILE_PATH_MAX_LEN: usize = 255;

/// Maximum length of an `acquisition_software` name.
pub const ACQ_SOFTWARE_MAX_LEN: usize = 24;

/// Seeded contents of the `channel` lookup.
pub const CHANNELS: [i32; 5] = [0, 1, 2, 3, 4];

// ============================================================================
// Keys
// ============================================================================

/// Primary key of an upstream recording session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    pub subject: String,
    pub session_datetime: NaiveDateTime,
}

impl SessionKey {
    pub fn new(subject: impl Into<String>, session_datetime: NaiveDateTime) -> Self {
        Self {
            subject: subject.into(),
            session_datetime,
        }
    }

    /// The datetime as stored in the database.
    pub fn datetime_str(&self) -> String {
        self.session_datetime
            .format(SESSION_DATETIME_FORMAT)
            .to_string()
    }

    /// Parse the stored datetime text.
    pub fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(value, SESSION_DATETIME_FORMAT).ok()
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.subject, self.datetime_str())
    }
}

/// Primary key of a scan: the session key plus `scan_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScanKey {
    #[serde(flatten)]
    pub session: SessionKey,
    pub scan_id: i32,
}

impl ScanKey {
    pub fn new(session: SessionKey, scan_id: i32) -> Self {
        Self { session, scan_id }
    }
}

impl fmt::Display for ScanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.session, self.scan_id)
    }
}

// ============================================================================
// Lookups
// ============================================================================

/// Acquisition software with a built-in ingestion routine.
///
/// The `acquisition_software` lookup may hold further names inserted by a
/// host; those are carried as plain strings on [`Scan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AcquisitionSoftware {
    ScanImage,
    Scanbox,
    #[serde(rename = "NIS")]
    Nis,
}

impl AcquisitionSoftware {
    /// All seeded values.
    pub const ALL: [AcquisitionSoftware; 3] = [Self::ScanImage, Self::Scanbox, Self::Nis];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScanImage => "ScanImage",
            Self::Scanbox => "Scanbox",
            Self::Nis => "NIS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ScanImage" => Some(Self::ScanImage),
            "Scanbox" => Some(Self::Scanbox),
            "NIS" => Some(Self::Nis),
            _ => None,
        }
    }

    /// Raw file extension written by this software (without the dot).
    pub fn file_extension(&self) -> &'static str {
        match self {
            Self::ScanImage => "tif",
            Self::Scanbox => "sbx",
            Self::Nis => "nd2",
        }
    }
}

impl fmt::Display for AcquisitionSoftware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Scan
// ============================================================================

/// A row of `scan`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scan {
    #[serde(flatten)]
    pub key: ScanKey,
    /// Equipment reference (nullable)
    pub scanner: Option<String>,
    /// Acquisition-software lookup value
    pub acq_software: String,
    #[serde(default)]
    pub scan_notes: String,
}

impl Scan {
    pub fn new(key: ScanKey, acq_software: AcquisitionSoftware) -> Self {
        Self {
            key,
            scanner: None,
            acq_software: acq_software.as_str().to_string(),
            scan_notes: String::new(),
        }
    }

    pub fn with_scanner(mut self, scanner: impl Into<String>) -> Self {
        self.scanner = Some(scanner.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.scan_notes = notes.into();
        self
    }

    /// The tag as a known software, if it is one of the seeded values.
    pub fn software(&self) -> Option<AcquisitionSoftware> {
        AcquisitionSoftware::parse(&self.acq_software)
    }
}

/// A row of `scan_location`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanLocation {
    #[serde(flatten)]
    pub key: ScanKey,
    pub anatomical_location: String,
}

// ============================================================================
// ScanInfo and parts
// ============================================================================

/// A row of `scan_info`: header-level metadata of one scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanInfo {
    #[serde(flatten)]
    pub key: ScanKey,
    pub nfields: i32,
    pub nchannels: i32,
    /// Number of scanning depths (planes)
    pub ndepths: i32,
    pub nframes: i64,
    /// Number of ROIs; 0 outside multi-ROI mode, null when unknown
    pub nrois: Option<i32>,
    /// (um) motor position at the acquisition software's origin
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    /// (Hz) volume rate
    pub fps: f64,
    pub bidirectional: bool,
    pub usecs_per_line: Option<f64>,
    pub fill_fraction: Option<f64>,
}

/// A row of `scan_info_field`: geometry of one imaging field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanField {
    #[serde(flatten)]
    pub key: ScanKey,
    pub field_idx: i32,
    pub px_height: i32,
    pub px_width: i32,
    pub um_height: Option<f64>,
    pub um_width: Option<f64>,
    /// (um) field center in motor coordinates
    pub field_x: Option<f64>,
    pub field_y: Option<f64>,
    /// (um) field depth
    pub field_z: Option<f64>,
    /// (ms) per-pixel delay from the start of the volume
    #[serde(skip)]
    pub delay_image: Option<DelayImage>,
    /// Scanning ROI containing this field (multi-ROI scans only)
    pub roi: Option<i32>,
}

/// A row of `scan_info_file`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFile {
    #[serde(flatten)]
    pub key: ScanKey,
    /// Posix path relative to the root data directory that holds the file
    pub file_path: String,
}

/// Everything written by one ingestion, persisted atomically.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanInfoRecord {
    pub info: ScanInfo,
    pub fields: Vec<ScanField>,
    pub files: Vec<ScanFile>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn session() -> SessionKey {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(14, 7, 9)
            .unwrap();
        SessionKey::new("mouse01", dt)
    }

    #[test]
    fn test_session_datetime_text_roundtrip() {
        let key = session();
        assert_eq!(key.datetime_str(), "2024-03-05 14:07:09");
        assert_eq!(
            SessionKey::parse_datetime(&key.datetime_str()),
            Some(key.session_datetime)
        );
        assert_eq!(SessionKey::parse_datetime("yesterday"), None);
    }

    #[test]
    fn test_acquisition_software_names() {
        for software in AcquisitionSoftware::ALL {
            assert_eq!(AcquisitionSoftware::parse(software.as_str()), Some(software));
            assert!(software.as_str().len() <= ACQ_SOFTWARE_MAX_LEN);
        }
        assert_eq!(AcquisitionSoftware::parse("Nikon"), None);
        assert_eq!(AcquisitionSoftware::Nis.file_extension(), "nd2");
    }

    #[test]
    fn test_scan_key_display() {
        let key = ScanKey::new(session(), 2);
        assert_eq!(key.to_string(), "mouse01@2024-03-05 14:07:09#2");
    }

    #[test]
    fn test_scan_software_for_host_value() {
        let mut scan = Scan::new(ScanKey::new(session(), 0), AcquisitionSoftware::Scanbox);
        assert_eq!(scan.software(), Some(AcquisitionSoftware::Scanbox));
        scan.acq_software = "PrairieView".to_string();
        assert_eq!(scan.software(), None);
    }
}
