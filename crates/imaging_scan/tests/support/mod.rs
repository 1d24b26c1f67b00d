#![allow(dead_code)]

use chrono::NaiveDate;
use imaging_db::{DelayImage, ImagingDb, SessionKey};
use imaging_scan::readers::{
    Nd2Reader, Nd2Summary, SbxInfo, SbxMetadata, ScanImageLayout, ScanImageReader,
    ScanImageScan, ScanboxReader,
};
use imaging_scan::{DirectoryLink, ImagingConfig, ParserRegistry, Result, ScanModule};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// A raw-data root and a database in one temporary directory.
pub struct TestEnv {
    pub tmp: TempDir,
    pub root: PathBuf,
    pub db: ImagingDb,
    pub config: ImagingConfig,
}

impl TestEnv {
    pub async fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("raw");
        fs::create_dir_all(&root).unwrap();
        let db = ImagingDb::open(tmp.path().join("imaging.sqlite3"))
            .await
            .unwrap();
        let config = ImagingConfig {
            database_path: tmp.path().join("imaging.sqlite3"),
            imaging_root_data_dirs: vec![root.clone()],
            ..ImagingConfig::default()
        };
        Self {
            tmp,
            root,
            db,
            config,
        }
    }

    pub fn session() -> SessionKey {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(14, 7, 9)
            .unwrap();
        SessionKey::new("mouse1", dt)
    }

    /// Directory of [`TestEnv::session`] under the root, relative form.
    pub fn session_rel() -> &'static str {
        "mouse1/20240305_140709"
    }

    /// Create an empty file at `rel` below the root.
    pub fn touch(&self, rel: &str) -> PathBuf {
        let path = self.root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"").unwrap();
        path
    }

    pub async fn add_session(&self) -> SessionKey {
        let session = Self::session();
        self.db.insert_session(&session).await.unwrap();
        session
    }

    pub fn module(&self, registry: ParserRegistry) -> ScanModule {
        ScanModule::new(
            self.db.clone(),
            Arc::new(DirectoryLink::new(self.config.clone())),
            registry,
        )
    }
}

pub fn exists_under(root: &Path, rel: &str) -> bool {
    root.join(rel).is_file()
}

// ============================================================================
// Fake vendor readers
// ============================================================================

/// Returns a fixed scan and records the files it was asked to read.
pub struct FakeScanImageReader {
    pub scan: ScanImageScan,
    pub calls: Mutex<Vec<Vec<PathBuf>>>,
}

impl FakeScanImageReader {
    pub fn new(scan: ScanImageScan) -> Arc<Self> {
        Arc::new(Self {
            scan,
            calls: Mutex::new(Vec::new()),
        })
    }
}

impl ScanImageReader for FakeScanImageReader {
    fn read_scan(&self, files: &[PathBuf]) -> Result<ScanImageScan> {
        self.calls.lock().unwrap().push(files.to_vec());
        Ok(self.scan.clone())
    }
}

pub struct FakeScanboxReader {
    pub meta: SbxMetadata,
    pub info: SbxInfo,
}

impl ScanboxReader for FakeScanboxReader {
    fn metadata(&self, _file: &Path) -> Result<SbxMetadata> {
        Ok(self.meta.clone())
    }

    fn info(&self, _file: &Path) -> Result<SbxInfo> {
        Ok(self.info.clone())
    }
}

pub struct FakeNd2Reader(pub Nd2Summary);

impl Nd2Reader for FakeNd2Reader {
    fn read_summary(&self, _file: &Path) -> Result<Nd2Summary> {
        Ok(self.0.clone())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn planar_scan(depths: Vec<f64>) -> ScanImageScan {
    let field_offsets = (0..depths.len())
        .map(|plane| DelayImage::from_fn(2, 3, |row, col| (plane * 10 + row * 3 + col) as f64))
        .collect();
    ScanImageScan {
        num_channels: 2,
        num_frames: 500,
        motor_position_at_zero: [10.0, 20.0, 30.0],
        fps: 7.5,
        is_bidirectional: true,
        seconds_per_line: 4e-5,
        temporal_fill_fraction: 0.712,
        layout: ScanImageLayout::Planar {
            image_height: 2,
            image_width: 3,
            image_height_um: Some(400.0),
            image_width_um: Some(600.0),
            scanning_depths: depths,
            field_offsets,
        },
    }
}

pub fn sbx_metadata() -> SbxMetadata {
    SbxMetadata {
        num_planes: 3,
        num_channels: 2,
        num_frames: 9000,
        stage_pos: [-5.0, 5.0, 100.0],
        frame_rate: 30.9,
        scanning_mode: "bidirectional".to_string(),
        frame_size: (796, 512),
        um_per_pixel_x: Some(1.2),
        um_per_pixel_y: Some(1.1),
        etl_pos: vec![0.0, 30.0, 60.0],
    }
}

pub fn nd2_summary(z: i64) -> Nd2Summary {
    Nd2Summary {
        sizes: [("T".to_string(), 250), ("Z".to_string(), z)]
            .into_iter()
            .collect(),
        voxel_size: [0.5, 0.5, 3.0],
        channel_count: 1,
        height_px: 256,
        width_px: 512,
        frame_count: 500,
        period_diff_avg_ms: 50.0,
        custom_data: serde_json::json!({
            "GrabberCameraSettingsV1_0": {
                "GrabberCameraSettings": {
                    "PropertiesQuality": { "ScanDirection": 2 }
                }
            }
        }),
    }
}
