use super::{ParsedScan, ScanParser};
use crate::error::{Result, ScanError};
use crate::link::{locate_raw_files, ImagingLink};
use crate::readers::{ScanImageLayout, ScanImageReader, ScanImageScan};
use imaging_db::{AcquisitionSoftware, ScanField, ScanInfo, ScanKey};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// ScanImage `.tif` scans, planar/volumetric and multi-ROI.
pub struct ScanImageParser {
    reader: Arc<dyn ScanImageReader>,
}

impl ScanImageParser {
    pub fn new(reader: Arc<dyn ScanImageReader>) -> Self {
        Self { reader }
    }
}

impl ScanParser for ScanImageParser {
    fn acq_software(&self) -> &str {
        AcquisitionSoftware::ScanImage.as_str()
    }

    fn locate(&self, link: &dyn ImagingLink, key: &ScanKey) -> Result<Vec<PathBuf>> {
        locate_raw_files(link, AcquisitionSoftware::ScanImage, key)
    }

    fn parse(&self, key: &ScanKey, files: &[PathBuf]) -> Result<ParsedScan> {
        let first = super::first_file(files)?;
        let scan = self.reader.read_scan(files)?;
        debug!(
            scan = %key,
            multi_roi = scan.is_multi_roi(),
            files = files.len(),
            "Read ScanImage scan"
        );
        normalize(key, first, &scan)
    }
}

fn normalize(key: &ScanKey, path: &Path, scan: &ScanImageScan) -> Result<ParsedScan> {
    let [x_zero, y_zero, z_zero] = scan.motor_position_at_zero;

    let (nrois, fields) = match &scan.layout {
        ScanImageLayout::MultiRoi {
            num_rois,
            microns_per_degree,
            fields,
            ..
        } => {
            let rows = fields
                .iter()
                .enumerate()
                .map(|(idx, field)| {
                    Ok(ScanField {
                        key: key.clone(),
                        field_idx: super::field_index(path, idx)?,
                        px_height: field.height,
                        px_width: field.width,
                        um_height: Some(field.height_um),
                        um_width: Some(field.width_um),
                        field_x: Some(x_zero + field.x * microns_per_degree),
                        field_y: Some(y_zero + field.y * microns_per_degree),
                        field_z: Some(z_zero + field.depth),
                        delay_image: Some(field.offsets.clone()),
                        roi: field.rois.first().copied(),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            (*num_rois, rows)
        }
        ScanImageLayout::Planar {
            image_height,
            image_width,
            image_height_um,
            image_width_um,
            scanning_depths,
            field_offsets,
        } => {
            if field_offsets.len() != scanning_depths.len() {
                return Err(ScanError::reader(
                    path,
                    format!(
                        "{} delay images for {} scanning depths",
                        field_offsets.len(),
                        scanning_depths.len()
                    ),
                ));
            }
            let rows = scanning_depths
                .iter()
                .zip(field_offsets)
                .enumerate()
                .map(|(plane, (depth, offsets))| {
                    Ok(ScanField {
                        key: key.clone(),
                        field_idx: super::field_index(path, plane)?,
                        px_height: *image_height,
                        px_width: *image_width,
                        um_height: *image_height_um,
                        um_width: *image_width_um,
                        field_x: Some(x_zero),
                        field_y: Some(y_zero),
                        field_z: Some(z_zero + depth),
                        delay_image: Some(offsets.clone()),
                        roi: None,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            (0, rows)
        }
    };

    let info = ScanInfo {
        key: key.clone(),
        nfields: scan.num_fields(),
        nchannels: scan.num_channels,
        ndepths: scan.num_scanning_depths(),
        nframes: scan.num_frames,
        nrois: Some(nrois),
        x: Some(x_zero),
        y: Some(y_zero),
        z: Some(z_zero),
        fps: scan.fps,
        bidirectional: scan.is_bidirectional,
        usecs_per_line: Some(scan.seconds_per_line * 1e6),
        fill_fraction: Some(scan.temporal_fill_fraction),
    };

    Ok(ParsedScan { info, fields })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readers::ScanImageField;
    use chrono::NaiveDate;
    use imaging_db::{DelayImage, SessionKey};

    fn key() -> ScanKey {
        let dt = NaiveDate::from_ymd_opt(2023, 11, 2)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        ScanKey::new(SessionKey::new("m7", dt), 0)
    }

    fn scan(layout: ScanImageLayout) -> ScanImageScan {
        ScanImageScan {
            num_channels: 2,
            num_frames: 1000,
            motor_position_at_zero: [100.0, -50.0, 200.0],
            fps: 9.6,
            is_bidirectional: true,
            seconds_per_line: 6.3e-5,
            temporal_fill_fraction: 0.71,
            layout,
        }
    }

    fn field(x: f64, depth: f64, rois: Vec<i32>) -> ScanImageField {
        ScanImageField {
            height: 256,
            width: 128,
            height_um: 500.0,
            width_um: 250.0,
            x,
            y: -x,
            depth,
            offsets: DelayImage::from_fn(1, 1, |_, _| depth),
            rois,
        }
    }

    #[test]
    fn test_multi_roi_fields() {
        let scan = scan(ScanImageLayout::MultiRoi {
            num_rois: 3,
            num_scanning_depths: 2,
            microns_per_degree: 20.0,
            fields: vec![field(1.5, 0.0, vec![2, 0]), field(-1.0, 40.0, vec![1])],
        });
        let parsed = normalize(&key(), Path::new("a.tif"), &scan).unwrap();

        assert_eq!(parsed.info.nfields, 2);
        assert_eq!(parsed.info.ndepths, 2);
        assert_eq!(parsed.info.nrois, Some(3));
        assert!((parsed.info.usecs_per_line.unwrap() - 63.0).abs() < 1e-9);

        let second = &parsed.fields[1];
        assert_eq!(second.field_idx, 1);
        assert_eq!(second.field_x, Some(100.0 - 20.0));
        assert_eq!(second.field_y, Some(-50.0 + 20.0));
        assert_eq!(second.field_z, Some(240.0));
        assert_eq!(second.roi, Some(1));
        assert_eq!(parsed.fields[0].roi, Some(2));
    }

    #[test]
    fn test_planar_fields() {
        let scan = scan(ScanImageLayout::Planar {
            image_height: 512,
            image_width: 512,
            image_height_um: None,
            image_width_um: None,
            scanning_depths: vec![0.0, 30.0],
            field_offsets: vec![
                DelayImage::from_fn(1, 1, |_, _| 0.0),
                DelayImage::from_fn(1, 1, |_, _| 1.0),
            ],
        });
        let parsed = normalize(&key(), Path::new("a.tif"), &scan).unwrap();

        assert_eq!(parsed.info.nrois, Some(0));
        assert_eq!(parsed.info.nfields, 2);
        assert_eq!(parsed.fields.len(), 2);
        assert_eq!(parsed.fields[1].field_z, Some(230.0));
        assert_eq!(parsed.fields[1].field_x, Some(100.0));
        assert_eq!(parsed.fields[1].um_height, None);
        assert_eq!(parsed.fields[1].roi, None);
        assert_eq!(
            parsed.fields[1].delay_image.as_ref().and_then(|d| d.get(0, 0)),
            Some(1.0)
        );
    }

    #[test]
    fn test_planar_offsets_must_match_depths() {
        let scan = scan(ScanImageLayout::Planar {
            image_height: 4,
            image_width: 4,
            image_height_um: None,
            image_width_um: None,
            scanning_depths: vec![0.0, 30.0],
            field_offsets: vec![],
        });
        assert!(matches!(
            normalize(&key(), Path::new("a.tif"), &scan),
            Err(ScanError::Reader { .. })
        ));
    }
}
