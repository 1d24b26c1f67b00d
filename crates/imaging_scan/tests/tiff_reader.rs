mod support;

use byteorder::{LittleEndian, WriteBytesExt};
use imaging_db::{AcquisitionSoftware, Scan, ScanKey};
use imaging_scan::readers::{ScanImageLayout, ScanImageReader, TiffScanImageReader};
use imaging_scan::{ParserRegistry, ScanError};
use std::fs;
use std::path::{Path, PathBuf};
use support::TestEnv;

const SI_HEADER: &str = "\
SI.VERSION_MAJOR = '2020'
SI.hChannels.channelSave = [1;2]
SI.hMotors.motorPosition = [1500.5 -220 80]
SI.hRoiManager.linePeriod = 4.1e-05
SI.hRoiManager.mroiEnable = false
SI.hRoiManager.scanFrameRate = 30.02
SI.hRoiManager.scanVolumeRate = 15.01
SI.hScan2D.bidirectional = true
SI.hScan2D.fillFractionTemporal = 0.712867
SI.hStackManager.zs = [0 20]
";

/// Little-endian TIFF whose pages are `width` x `height` with no pixel data.
/// The first page carries `software` in the Software tag.
fn write_tiff(path: &Path, big: bool, pages: u32, width: u16, height: u16, software: &str) {
    let mut text = software.as_bytes().to_vec();
    text.push(0);
    if text.len() % 2 == 1 {
        text.push(0);
    }

    let header_len: u64 = if big { 16 } else { 8 };
    let text_offset = header_len;
    let first_ifd = header_len + text.len() as u64;

    let mut buf = Vec::new();
    buf.extend_from_slice(b"II");
    if big {
        buf.write_u16::<LittleEndian>(43).unwrap();
        buf.write_u16::<LittleEndian>(8).unwrap();
        buf.write_u16::<LittleEndian>(0).unwrap();
        buf.write_u64::<LittleEndian>(first_ifd).unwrap();
    } else {
        buf.write_u16::<LittleEndian>(42).unwrap();
        buf.write_u32::<LittleEndian>(first_ifd as u32).unwrap();
    }
    buf.extend_from_slice(&text);

    for page in 0..pages {
        // (tag, type, count, value-or-offset)
        let mut entries: Vec<(u16, u16, u64, u64)> =
            vec![(256, 3, 1, u64::from(width)), (257, 3, 1, u64::from(height))];
        if page == 0 {
            entries.push((305, 2, software.len() as u64 + 1, text_offset));
        }

        let ifd_start = buf.len() as u64;
        let ifd_len = if big {
            8 + 20 * entries.len() as u64 + 8
        } else {
            2 + 12 * entries.len() as u64 + 4
        };
        let next = if page + 1 == pages { 0 } else { ifd_start + ifd_len };

        if big {
            buf.write_u64::<LittleEndian>(entries.len() as u64).unwrap();
        } else {
            buf.write_u16::<LittleEndian>(entries.len() as u16).unwrap();
        }
        for (tag, field_type, count, value) in entries {
            buf.write_u16::<LittleEndian>(tag).unwrap();
            buf.write_u16::<LittleEndian>(field_type).unwrap();
            match (big, field_type) {
                (true, 3) => {
                    buf.write_u64::<LittleEndian>(count).unwrap();
                    buf.write_u16::<LittleEndian>(value as u16).unwrap();
                    buf.extend_from_slice(&[0; 6]);
                }
                (true, _) => {
                    buf.write_u64::<LittleEndian>(count).unwrap();
                    buf.write_u64::<LittleEndian>(value).unwrap();
                }
                (false, 3) => {
                    buf.write_u32::<LittleEndian>(count as u32).unwrap();
                    buf.write_u16::<LittleEndian>(value as u16).unwrap();
                    buf.extend_from_slice(&[0; 2]);
                }
                (false, _) => {
                    buf.write_u32::<LittleEndian>(count as u32).unwrap();
                    buf.write_u32::<LittleEndian>(value as u32).unwrap();
                }
            }
        }
        if big {
            buf.write_u64::<LittleEndian>(next).unwrap();
        } else {
            buf.write_u32::<LittleEndian>(next as u32).unwrap();
        }
    }

    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, buf).unwrap();
}

#[test]
fn test_classic_tiff_across_files() {
    let tmp = tempfile::TempDir::new().unwrap();
    let first = tmp.path().join("scan_00001.tif");
    let second = tmp.path().join("scan_00002.tif");
    // 2 channels x 2 depths x 3 volumes, split over two files.
    write_tiff(&first, false, 8, 6, 4, SI_HEADER);
    write_tiff(&second, false, 4, 6, 4, SI_HEADER);

    let scan = TiffScanImageReader::new()
        .read_scan(&[first, second])
        .unwrap();

    assert_eq!(scan.num_channels, 2);
    assert_eq!(scan.num_frames, 3);
    assert_eq!(scan.num_scanning_depths(), 2);
    assert_eq!(scan.num_fields(), 2);
    assert_eq!(scan.fps, 15.01);
    assert!(scan.is_bidirectional);
    assert_eq!(scan.seconds_per_line, 4.1e-05);
    assert_eq!(scan.temporal_fill_fraction, 0.712867);
    assert_eq!(scan.motor_position_at_zero, [1500.5, -220.0, 80.0]);

    match &scan.layout {
        ScanImageLayout::Planar {
            image_height,
            image_width,
            scanning_depths,
            field_offsets,
            ..
        } => {
            assert_eq!((*image_height, *image_width), (4, 6));
            assert_eq!(scanning_depths, &vec![0.0, 20.0]);
            assert_eq!(field_offsets[1].rows(), 4);
            assert_eq!(field_offsets[1].cols(), 6);
            // The second plane starts after all lines of the first.
            let start = field_offsets[1].get(0, 0).unwrap();
            assert!(start > 4.0 * 4.1e-05 * 1000.0);
        }
        other => panic!("unexpected layout {:?}", other),
    }
}

#[test]
fn test_big_tiff() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("big.tif");
    write_tiff(&path, true, 12, 16, 8, SI_HEADER);

    let scan = TiffScanImageReader::new().read_scan(&[path]).unwrap();
    assert_eq!(scan.num_frames, 3);
    match &scan.layout {
        ScanImageLayout::Planar {
            image_height,
            image_width,
            ..
        } => assert_eq!((*image_height, *image_width), (8, 16)),
        other => panic!("unexpected layout {:?}", other),
    }
}

#[test]
fn test_tiff_without_scanimage_header() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("plain.tif");
    write_tiff(&path, false, 1, 4, 4, "ImageJ=1.53t");

    assert!(matches!(
        TiffScanImageReader::new().read_scan(&[path]),
        Err(ScanError::Reader { .. })
    ));
}

#[test]
fn test_multi_roi_header_is_not_implemented() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("mroi.tif");
    let header = SI_HEADER.replace("mroiEnable = false", "mroiEnable = true");
    write_tiff(&path, false, 4, 4, 4, &header);

    assert!(matches!(
        TiffScanImageReader::new().read_scan(&[path]),
        Err(ScanError::NotImplemented(_))
    ));
}

#[test]
fn test_truncated_file_is_a_reader_error() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("cut.tif");
    write_tiff(&path, false, 2, 4, 4, SI_HEADER);
    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..bytes.len() - 10]).unwrap();

    assert!(matches!(
        TiffScanImageReader::new().read_scan(&[path]),
        Err(ScanError::Reader { .. })
    ));
}

#[tokio::test]
async fn test_builtin_registry_ingests_synthetic_tiffs() {
    let env = TestEnv::new().await;
    let session = env.add_session().await;
    let dir: PathBuf = env.root.join(TestEnv::session_rel()).join("scan0");
    write_tiff(&dir.join("file_00001.tif"), false, 8, 6, 4, SI_HEADER);
    write_tiff(&dir.join("file_00002.tif"), true, 4, 6, 4, SI_HEADER);

    let key = ScanKey::new(session, 0);
    env.db
        .insert_scan(&Scan::new(key.clone(), AcquisitionSoftware::ScanImage))
        .await
        .unwrap();

    let module = env.module(ParserRegistry::with_builtin_readers());
    let report = module.populate().await.unwrap();
    assert_eq!(report.ingested, vec![key.clone()]);

    let info = env.db.get_scan_info(&key).await.unwrap().unwrap();
    assert_eq!(info.nfields, 2);
    assert_eq!(info.nframes, 3);
    assert_eq!(info.nrois, Some(0));
    assert_eq!(info.z, Some(80.0));

    let fields = env.db.list_scan_fields(&key).await.unwrap();
    assert_eq!(fields[1].field_z, Some(100.0));
    let delay = fields[1].delay_image.as_ref().unwrap();
    assert_eq!((delay.rows(), delay.cols()), (4, 6));

    let files = env.db.list_scan_files(&key).await.unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(
        files[1].file_path,
        "mouse1/20240305_140709/scan0/file_00002.tif"
    );
}

#[tokio::test]
async fn test_populate_continues_past_malformed_tiff() {
    let env = TestEnv::new().await;
    let session = env.add_session().await;
    let base = env.root.join(TestEnv::session_rel());
    write_tiff(&base.join("scan0/file.tif"), false, 4, 6, 4, SI_HEADER);

    let broken = base.join("scan1/file.tif");
    write_tiff(&broken, false, 4, 6, 4, SI_HEADER);
    let mut bytes = fs::read(&broken).unwrap();
    let ifd = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    // The ImageWidth entry declares no values.
    bytes[ifd + 6..ifd + 10].copy_from_slice(&0u32.to_le_bytes());
    fs::write(&broken, bytes).unwrap();

    for scan_id in 0..2 {
        env.db
            .insert_scan(&Scan::new(
                ScanKey::new(session.clone(), scan_id),
                AcquisitionSoftware::ScanImage,
            ))
            .await
            .unwrap();
    }

    let module = env.module(ParserRegistry::with_builtin_readers());
    let report = module.populate().await.unwrap();

    assert_eq!(report.ingested, vec![ScanKey::new(session.clone(), 0)]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].key.scan_id, 1);
    assert!(report.failed[0].error.starts_with("Failed to read"));
}
