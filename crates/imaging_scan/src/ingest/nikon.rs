use super::{to_i32, ParsedScan, ScanParser};
use crate::error::{Result, ScanError};
use crate::link::{locate_raw_files, ImagingLink};
use crate::readers::{Nd2Reader, Nd2Summary};
use imaging_db::{AcquisitionSoftware, ScanField, ScanInfo, ScanKey};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Location of the scan-direction setting inside the ND2 custom data.
const SCAN_DIRECTION_POINTER: &str =
    "/GrabberCameraSettingsV1_0/GrabberCameraSettings/PropertiesQuality/ScanDirection";

/// Nikon NIS-Elements `.nd2` scans (no multi-ROI, no stage coordinates).
pub struct NikonParser {
    reader: Arc<dyn Nd2Reader>,
}

impl NikonParser {
    pub fn new(reader: Arc<dyn Nd2Reader>) -> Self {
        Self { reader }
    }
}

impl ScanParser for NikonParser {
    fn acq_software(&self) -> &str {
        AcquisitionSoftware::Nis.as_str()
    }

    fn locate(&self, link: &dyn ImagingLink, key: &ScanKey) -> Result<Vec<PathBuf>> {
        locate_raw_files(link, AcquisitionSoftware::Nis, key)
    }

    fn parse(&self, key: &ScanKey, files: &[PathBuf]) -> Result<ParsedScan> {
        let first = super::first_file(files)?;
        let summary = self.reader.read_summary(first)?;
        normalize(key, first, &summary)
    }
}

/// Scan direction 1 is unidirectional; anything else scans both ways.
fn is_bidirectional(path: &Path, custom_data: &Value) -> bool {
    match custom_data.pointer(SCAN_DIRECTION_POINTER).and_then(Value::as_f64) {
        Some(direction) => direction - 1.0 != 0.0,
        None => {
            warn!(
                path = %path.display(),
                "ND2 custom data has no ScanDirection; assuming unidirectional"
            );
            false
        }
    }
}

fn normalize(key: &ScanKey, path: &Path, summary: &Nd2Summary) -> Result<ParsedScan> {
    if summary.period_diff_avg_ms.is_nan() || summary.period_diff_avg_ms <= 0.0 {
        return Err(ScanError::reader(
            path,
            format!(
                "frame period must be positive, got {} ms",
                summary.period_diff_avg_ms
            ),
        ));
    }

    let ndepths = to_i32(path, "Z size", summary.size_or_one("Z"))?;
    let positions = to_i32(path, "P size", summary.size_or_one("P"))?;
    let nfields = ndepths
        .checked_mul(positions)
        .filter(|n| *n > 0)
        .ok_or_else(|| ScanError::reader(path, "invalid Z/P sizes"))?;

    let [voxel_x, voxel_y, _] = summary.voxel_size;
    let fields = (0..nfields)
        .map(|field_idx| ScanField {
            key: key.clone(),
            field_idx,
            px_height: summary.height_px,
            px_width: summary.width_px,
            um_height: Some(f64::from(summary.height_px) * voxel_y),
            um_width: Some(f64::from(summary.width_px) * voxel_x),
            field_x: None,
            field_y: None,
            field_z: None,
            delay_image: None,
            roi: None,
        })
        .collect();

    let info = ScanInfo {
        key: key.clone(),
        nfields,
        nchannels: summary.channel_count,
        ndepths,
        nframes: summary.frame_count,
        nrois: None,
        x: None,
        y: None,
        z: None,
        fps: 1000.0 / summary.period_diff_avg_ms,
        bidirectional: is_bidirectional(path, &summary.custom_data),
        usecs_per_line: None,
        fill_fraction: None,
    };

    Ok(ParsedScan { info, fields })
}
