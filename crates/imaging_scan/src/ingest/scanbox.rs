use super::{ParsedScan, ScanParser};
use crate::error::{Result, ScanError};
use crate::link::{locate_raw_files, ImagingLink};
use crate::readers::{SbxMetadata, ScanboxReader};
use imaging_db::{AcquisitionSoftware, ScanField, ScanInfo, ScanKey};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Scanbox `.sbx` scans. Metadata comes from the first file; later files of
/// the same scan share it.
pub struct ScanboxParser {
    reader: Arc<dyn ScanboxReader>,
}

impl ScanboxParser {
    pub fn new(reader: Arc<dyn ScanboxReader>) -> Self {
        Self { reader }
    }
}

impl ScanParser for ScanboxParser {
    fn acq_software(&self) -> &str {
        AcquisitionSoftware::Scanbox.as_str()
    }

    fn locate(&self, link: &dyn ImagingLink, key: &ScanKey) -> Result<Vec<PathBuf>> {
        locate_raw_files(link, AcquisitionSoftware::Scanbox, key)
    }

    fn parse(&self, key: &ScanKey, files: &[PathBuf]) -> Result<ParsedScan> {
        let first = super::first_file(files)?;
        let meta = self.reader.metadata(first)?;
        let info = self.reader.info(first)?;

        // Only single-plane/volumetric acquisitions are ingested.
        if info.mesoscope_enabled {
            return Err(ScanError::not_implemented(
                "Loading routine not implemented for Scanbox multiROI scan mode",
            ));
        }

        normalize(key, first, &meta)
    }
}

fn normalize(key: &ScanKey, path: &Path, meta: &SbxMetadata) -> Result<ParsedScan> {
    let [x_zero, y_zero, z_zero] = meta.stage_pos;
    let (px_width, px_height) = meta.frame_size;
    let planes = usize::try_from(meta.num_planes)
        .map_err(|_| ScanError::reader(path, format!("negative plane count {}", meta.num_planes)))?;

    if meta.etl_pos.len() < planes {
        return Err(ScanError::reader(
            path,
            format!(
                "{} planes but only {} ETL positions",
                planes,
                meta.etl_pos.len()
            ),
        ));
    }

    let scaled = |px: i32, scale: Option<f64>| {
        scale.filter(|s| *s > 0.0).map(|s| f64::from(px) * s)
    };

    let fields = meta.etl_pos[..planes]
        .iter()
        .enumerate()
        .map(|(plane, etl)| {
            Ok(ScanField {
                key: key.clone(),
                field_idx: super::field_index(path, plane)?,
                px_height,
                px_width,
                um_height: scaled(px_height, meta.um_per_pixel_y),
                um_width: scaled(px_width, meta.um_per_pixel_x),
                field_x: Some(x_zero),
                field_y: Some(y_zero),
                field_z: Some(z_zero + etl),
                delay_image: None,
                roi: None,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let info = ScanInfo {
        key: key.clone(),
        nfields: meta.num_planes,
        nchannels: meta.num_channels,
        ndepths: meta.num_planes,
        nframes: meta.num_frames,
        nrois: Some(0),
        x: Some(x_zero),
        y: Some(y_zero),
        z: Some(z_zero),
        fps: meta.frame_rate,
        bidirectional: meta.scanning_mode.eq_ignore_ascii_case("bidirectional"),
        usecs_per_line: None,
        fill_fraction: None,
    };

    Ok(ParsedScan { info, fields })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use imaging_db::SessionKey;

    fn key() -> ScanKey {
        let dt = NaiveDate::from_ymd_opt(2022, 6, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        ScanKey::new(SessionKey::new("rat2", dt), 3)
    }

    fn meta() -> SbxMetadata {
        SbxMetadata {
            num_planes: 2,
            num_channels: 1,
            num_frames: 3000,
            stage_pos: [1.0, 2.0, 3.0],
            frame_rate: 15.5,
            scanning_mode: "bidirectional".to_string(),
            frame_size: (796, 512),
            um_per_pixel_x: Some(1.5),
            um_per_pixel_y: Some(0.0),
            etl_pos: vec![0.0, 60.0],
        }
    }

    #[test]
    fn test_planes_become_fields() {
        let parsed = normalize(&key(), Path::new("a.sbx"), &meta()).unwrap();

        assert_eq!(parsed.info.nfields, 2);
        assert_eq!(parsed.info.ndepths, 2);
        assert_eq!(parsed.info.nrois, Some(0));
        assert!(parsed.info.bidirectional);
        assert_eq!(parsed.fields.len(), 2);

        let field = &parsed.fields[1];
        assert_eq!((field.px_width, field.px_height), (796, 512));
        assert_eq!(field.um_width, Some(796.0 * 1.5));
        // A zero scale means the size is unknown.
        assert_eq!(field.um_height, None);
        assert_eq!(field.field_z, Some(63.0));
    }

    #[test]
    fn test_unidirectional_mode() {
        let mut meta = meta();
        meta.scanning_mode = "unidirectional".to_string();
        let parsed = normalize(&key(), Path::new("a.sbx"), &meta).unwrap();
        assert!(!parsed.info.bidirectional);
    }

    #[test]
    fn test_missing_etl_positions() {
        let mut meta = meta();
        meta.etl_pos = vec![0.0];
        assert!(matches!(
            normalize(&key(), Path::new("a.sbx"), &meta),
            Err(ScanError::Reader { .. })
        ));
    }
}
