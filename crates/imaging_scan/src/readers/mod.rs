//! Vendor reader seams.
//!
//! Ingestion consumes metadata the way each vendor library exposes it. The
//! structs below carry those already-parsed values; the traits are the
//! boundary a host plugs its readers into. [`TiffScanImageReader`] is the one
//! reader that ships with the crate.

mod scanimage_tiff;
mod si_header;

pub use scanimage_tiff::TiffScanImageReader;
pub use si_header::{HeaderValue, SiHeader};

use crate::error::Result;
use imaging_db::DelayImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// ============================================================================
// ScanImage
// ============================================================================

/// A ScanImage scan as a whole (all of its files).
#[derive(Debug, Clone, PartialEq)]
pub struct ScanImageScan {
    pub num_channels: i32,
    pub num_frames: i64,
    /// Motor (x, y, z) in microns at ScanImage's origin
    pub motor_position_at_zero: [f64; 3],
    /// Volume rate in Hz
    pub fps: f64,
    pub is_bidirectional: bool,
    pub seconds_per_line: f64,
    pub temporal_fill_fraction: f64,
    pub layout: ScanImageLayout,
}

/// How the fields of a ScanImage scan are laid out.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanImageLayout {
    /// Independent regions scanned within one volume.
    MultiRoi {
        num_rois: i32,
        num_scanning_depths: i32,
        /// Conversion of scan angles to microns
        microns_per_degree: f64,
        fields: Vec<ScanImageField>,
    },
    /// One full-frame field per scanning depth.
    Planar {
        image_height: i32,
        image_width: i32,
        image_height_um: Option<f64>,
        image_width_um: Option<f64>,
        /// Depth of each plane relative to the motor zero
        scanning_depths: Vec<f64>,
        /// Delay image of each plane, parallel to `scanning_depths`
        field_offsets: Vec<DelayImage>,
    },
}

/// One field of a multi-ROI scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanImageField {
    pub height: i32,
    pub width: i32,
    pub height_um: f64,
    pub width_um: f64,
    /// Field center in scan degrees
    pub x: f64,
    pub y: f64,
    pub depth: f64,
    pub offsets: DelayImage,
    /// ROIs contributing to this field
    pub rois: Vec<i32>,
}

impl ScanImageScan {
    pub fn is_multi_roi(&self) -> bool {
        matches!(self.layout, ScanImageLayout::MultiRoi { .. })
    }

    pub fn num_scanning_depths(&self) -> i32 {
        match &self.layout {
            ScanImageLayout::MultiRoi {
                num_scanning_depths,
                ..
            } => *num_scanning_depths,
            ScanImageLayout::Planar {
                scanning_depths, ..
            } => scanning_depths.len() as i32,
        }
    }

    pub fn num_fields(&self) -> i32 {
        match &self.layout {
            ScanImageLayout::MultiRoi { fields, .. } => fields.len() as i32,
            ScanImageLayout::Planar {
                scanning_depths, ..
            } => scanning_depths.len() as i32,
        }
    }
}

pub trait ScanImageReader: Send + Sync {
    /// Read every file of one scan.
    fn read_scan(&self, files: &[PathBuf]) -> Result<ScanImageScan>;
}

// ============================================================================
// Scanbox
// ============================================================================

/// Metadata of an `.sbx` recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SbxMetadata {
    pub num_planes: i32,
    pub num_channels: i32,
    pub num_frames: i64,
    /// Stage (x, y, z) in microns
    pub stage_pos: [f64; 3],
    pub frame_rate: f64,
    /// `bidirectional` or `unidirectional`
    pub scanning_mode: String,
    /// (width, height) in pixels
    pub frame_size: (i32, i32),
    pub um_per_pixel_x: Option<f64>,
    pub um_per_pixel_y: Option<f64>,
    /// Electrically tunable lens position of each plane, in microns
    pub etl_pos: Vec<f64>,
}

/// The acquisition info block of an `.sbx` recording.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SbxInfo {
    pub mesoscope_enabled: bool,
}

pub trait ScanboxReader: Send + Sync {
    fn metadata(&self, file: &Path) -> Result<SbxMetadata>;
    fn info(&self, file: &Path) -> Result<SbxInfo>;
}

// ============================================================================
// Nikon NIS
// ============================================================================

/// What ingestion needs from an `.nd2` file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Nd2Summary {
    /// Dimension sizes keyed by axis letter (`T`, `Z`, `P`, `C`, ...)
    pub sizes: BTreeMap<String, i64>,
    /// Voxel size (x, y, z) in microns
    pub voxel_size: [f64; 3],
    pub channel_count: i32,
    pub height_px: i32,
    pub width_px: i32,
    pub frame_count: i64,
    /// Average period between frames of the first experiment loop, in ms
    pub period_diff_avg_ms: f64,
    /// Vendor custom data, kept as an opaque tree
    #[serde(default)]
    pub custom_data: serde_json::Value,
}

impl Nd2Summary {
    /// Size of an axis, 1 when the axis is absent.
    pub fn size_or_one(&self, axis: &str) -> i64 {
        self.sizes.get(axis).copied().unwrap_or(1)
    }
}

pub trait Nd2Reader: Send + Sync {
    fn read_summary(&self, file: &Path) -> Result<Nd2Summary>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planar(depths: Vec<f64>) -> ScanImageScan {
        let offsets = depths
            .iter()
            .map(|_| DelayImage::from_fn(2, 2, |_, _| 0.0))
            .collect();
        ScanImageScan {
            num_channels: 1,
            num_frames: 10,
            motor_position_at_zero: [0.0; 3],
            fps: 30.0,
            is_bidirectional: false,
            seconds_per_line: 6.3e-5,
            temporal_fill_fraction: 0.7,
            layout: ScanImageLayout::Planar {
                image_height: 2,
                image_width: 2,
                image_height_um: None,
                image_width_um: None,
                scanning_depths: depths,
                field_offsets: offsets,
            },
        }
    }

    #[test]
    fn test_planar_counts_follow_depths() {
        let scan = planar(vec![0.0, 25.0, 50.0]);
        assert!(!scan.is_multi_roi());
        assert_eq!(scan.num_fields(), 3);
        assert_eq!(scan.num_scanning_depths(), 3);
    }

    #[test]
    fn test_nd2_missing_axis_is_one() {
        let summary: Nd2Summary = serde_json::from_str(
            r#"{
                "sizes": {"T": 100, "Z": 4},
                "voxel_size": [0.5, 0.5, 2.0],
                "channel_count": 2,
                "height_px": 512,
                "width_px": 512,
                "frame_count": 400,
                "period_diff_avg_ms": 33.3
            }"#,
        )
        .unwrap();
        assert_eq!(summary.size_or_one("Z"), 4);
        assert_eq!(summary.size_or_one("P"), 1);
        assert!(summary.custom_data.is_null());
    }
}
