//! ScanImage reader for planar and volumetric TIFF stacks.
//!
//! Walks the IFD chain of classic TIFF and BigTIFF files without decoding
//! pixel data: the first page supplies image size and the ScanImage header,
//! and the page count across files gives the number of frames.

use super::si_header::SiHeader;
use super::{ScanImageLayout, ScanImageReader, ScanImageScan};
use crate::error::{Result, ScanError};
use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use imaging_db::DelayImage;
use std::collections::HashSet;
use std::f64::consts::FRAC_PI_2;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const TAG_IMAGE_WIDTH: u16 = 256;
const TAG_IMAGE_LENGTH: u16 = 257;
const TAG_IMAGE_DESCRIPTION: u16 = 270;
const TAG_SOFTWARE: u16 = 305;

/// Largest accepted page side, in pixels.
const MAX_IMAGE_SIDE: u32 = 16_384;
/// Largest accepted number of delay-image values across all planes.
const MAX_DELAY_VALUES: u64 = 1 << 26;

/// Reads ScanImage 2016+ TIFF files (classic or BigTIFF).
#[derive(Debug, Clone, Copy, Default)]
pub struct TiffScanImageReader;

impl TiffScanImageReader {
    pub fn new() -> Self {
        Self
    }
}

impl ScanImageReader for TiffScanImageReader {
    fn read_scan(&self, files: &[PathBuf]) -> Result<ScanImageScan> {
        let first = files
            .first()
            .ok_or_else(|| ScanError::not_found("no ScanImage files to read"))?;

        let mut tiff = TiffFile::open(first)?;
        let page = tiff.first_page()?;
        let header = page
            .texts
            .iter()
            .map(|text| SiHeader::parse(text))
            .find(|header| !header.is_empty())
            .ok_or_else(|| ScanError::reader(first, "no ScanImage header in the first page"))?;
        debug!(
            path = %first.display(),
            version = header.str("SI.VERSION_MAJOR"),
            keys = header.len(),
            "Parsed ScanImage header"
        );

        let mut pages = 0u64;
        for file in files {
            pages += TiffFile::open(file)?.count_pages()?;
        }
        debug!(files = files.len(), pages, "Counted ScanImage pages");

        scan_from_header(first, &header, page.width, page.height, pages)
    }
}

fn scan_from_header(
    path: &Path,
    header: &SiHeader,
    width: u32,
    height: u32,
    pages: u64,
) -> Result<ScanImageScan> {
    if header.bool("SI.hRoiManager.mroiEnable").unwrap_or(false) {
        return Err(ScanError::not_implemented(
            "multi-ROI ScanImage files are not supported by the TIFF reader",
        ));
    }

    let required = |key: &str| {
        header
            .f64(key)
            .ok_or_else(|| ScanError::reader(path, format!("header lacks {}", key)))
    };

    let num_channels = header
        .vec("SI.hChannels.channelSave")
        .map(|channels| channels.len().max(1))
        .unwrap_or(1);
    let depths = scanning_depths(path, header, pages)?;

    let fps = header
        .f64("SI.hRoiManager.scanVolumeRate")
        .or_else(|| header.f64("SI.hRoiManager.scanFrameRate"))
        .ok_or_else(|| ScanError::reader(path, "header lacks a scan rate"))?;
    let seconds_per_line = required("SI.hRoiManager.linePeriod")?;
    let fill_fraction = required("SI.hScan2D.fillFractionTemporal")?;
    let is_bidirectional = header.bool("SI.hScan2D.bidirectional").unwrap_or(false);

    let motor = header
        .vec("SI.hMotors.motorPosition")
        .filter(|position| position.len() >= 3)
        .ok_or_else(|| ScanError::reader(path, "header lacks SI.hMotors.motorPosition"))?;

    if width == 0 || height == 0 || width > MAX_IMAGE_SIDE || height > MAX_IMAGE_SIDE {
        return Err(ScanError::reader(
            path,
            format!("page size {}x{} out of range", width, height),
        ));
    }
    let delay_values = (depths.len() as u64).checked_mul(u64::from(width) * u64::from(height));
    if delay_values.map_or(true, |n| n > MAX_DELAY_VALUES) {
        return Err(ScanError::reader(
            path,
            format!(
                "{} planes of {}x{} pixels exceed the delay-image limit",
                depths.len(),
                width,
                height
            ),
        ));
    }

    let pages_per_frame = (num_channels as u64)
        .checked_mul(depths.len() as u64)
        .filter(|n| *n <= pages)
        .ok_or_else(|| {
            ScanError::reader(
                path,
                format!(
                    "{} channels x {} planes need more than the {} pages present",
                    num_channels,
                    depths.len(),
                    pages
                ),
            )
        })?;
    if pages % pages_per_frame != 0 {
        warn!(
            path = %path.display(),
            pages,
            pages_per_frame,
            "Page count is not a whole number of volumes; dropping the remainder"
        );
    }
    let num_frames = (pages / pages_per_frame) as i64;

    let height_px = height as usize;
    let width_px = width as usize;
    let field_offsets = (0..depths.len())
        .map(|plane| {
            plane_delay_image(
                plane,
                height_px,
                width_px,
                seconds_per_line,
                fill_fraction,
                is_bidirectional,
            )
        })
        .collect();

    Ok(ScanImageScan {
        num_channels: num_channels as i32,
        num_frames,
        motor_position_at_zero: [motor[0], motor[1], motor[2]],
        fps,
        is_bidirectional,
        seconds_per_line,
        temporal_fill_fraction: fill_fraction,
        layout: ScanImageLayout::Planar {
            image_height: height as i32,
            image_width: width as i32,
            image_height_um: None,
            image_width_um: None,
            scanning_depths: depths,
            field_offsets,
        },
    })
}

/// Plane depths from `zs`, else `numSlices` planes `stackZStepSize` apart.
///
/// Every plane occupies at least one page, so more planes than `pages` is a
/// corrupt header.
fn scanning_depths(path: &Path, header: &SiHeader, pages: u64) -> Result<Vec<f64>> {
    if let Some(zs) = header.vec("SI.hStackManager.zs").filter(|zs| !zs.is_empty()) {
        return Ok(zs);
    }
    let slices = header
        .f64("SI.hStackManager.numSlices")
        .filter(|n| *n >= 1.0)
        .unwrap_or(1.0);
    if slices > pages as f64 {
        return Err(ScanError::reader(
            path,
            format!("numSlices {} exceeds the {} pages present", slices, pages),
        ));
    }
    let step = header.f64("SI.hStackManager.stackZStepSize").unwrap_or(0.0);
    Ok((0..slices as usize).map(|i| i as f64 * step).collect())
}

/// Per-pixel delay (ms) from the start of the volume for a resonant scan.
///
/// Pixels along a line follow the sinusoidal mirror trajectory over the
/// temporal fill fraction; return lines run backwards when bidirectional.
pub(crate) fn plane_delay_image(
    plane: usize,
    height: usize,
    width: usize,
    seconds_per_line: f64,
    fill_fraction: f64,
    bidirectional: bool,
) -> DelayImage {
    let max_angle = FRAC_PI_2 * fill_fraction;
    let step = 2.0 * max_angle / (width as f64 + 1.0);
    let line_offsets: Vec<f64> = (0..width)
        .map(|col| {
            let angle = -max_angle + (col as f64 + 1.0) * step;
            (angle.sin() + 1.0) / 2.0
        })
        .collect();

    let plane_start = (plane * height) as f64;
    DelayImage::from_fn(height, width, |row, col| {
        let within_line = if bidirectional && row % 2 == 1 {
            1.0 - line_offsets[col]
        } else {
            line_offsets[col]
        };
        (plane_start + row as f64 + within_line) * seconds_per_line * 1000.0
    })
}

// ============================================================================
// TIFF structure
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endian {
    Little,
    Big,
}

struct FirstPage {
    width: u32,
    height: u32,
    /// ASCII tags that may hold the ScanImage header, Software first
    texts: Vec<String>,
}

struct IfdEntry {
    tag: u16,
    field_type: u16,
    count: u64,
    /// The value-or-offset field as stored
    inline: [u8; 8],
}

struct TiffFile<R> {
    path: PathBuf,
    reader: R,
    endian: Endian,
    big_tiff: bool,
    first_ifd: u64,
    file_len: u64,
}

impl TiffFile<BufReader<File>> {
    fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| ScanError::reader(path, e.to_string()))?;
        Self::from_reader(path, BufReader::new(file))
    }
}

impl<R: Read + Seek> TiffFile<R> {
    fn from_reader(path: &Path, mut reader: R) -> Result<Self> {
        let invalid = |msg: &str| ScanError::reader(path, msg.to_string());

        let mut magic = [0u8; 4];
        reader
            .read_exact(&mut magic)
            .map_err(|_| invalid("file too short for a TIFF header"))?;
        let endian = match &magic[..2] {
            b"II" => Endian::Little,
            b"MM" => Endian::Big,
            _ => return Err(invalid("not a TIFF file")),
        };
        let version = match endian {
            Endian::Little => LittleEndian::read_u16(&magic[2..]),
            Endian::Big => BigEndian::read_u16(&magic[2..]),
        };
        let file_len = reader
            .seek(SeekFrom::End(0))
            .and_then(|len| reader.seek(SeekFrom::Start(4)).map(|_| len))
            .map_err(|e| ScanError::reader(path, e.to_string()))?;

        let mut tiff = Self {
            path: path.to_path_buf(),
            reader,
            endian,
            big_tiff: false,
            first_ifd: 0,
            file_len,
        };
        match version {
            42 => tiff.first_ifd = u64::from(tiff.read_u32()?),
            43 => {
                let offset_size = tiff.read_u16()?;
                let _reserved = tiff.read_u16()?;
                if offset_size != 8 {
                    return Err(invalid("unsupported BigTIFF offset size"));
                }
                tiff.big_tiff = true;
                tiff.first_ifd = tiff.read_u64()?;
            }
            _ => return Err(invalid("unknown TIFF version")),
        }
        Ok(tiff)
    }

    fn first_page(&mut self) -> Result<FirstPage> {
        if self.first_ifd == 0 {
            return Err(self.error("TIFF has no pages"));
        }
        let (entries, _) = self.read_ifd(self.first_ifd)?;

        let mut width = None;
        let mut height = None;
        let mut software = None;
        let mut description = None;
        for entry in &entries {
            match entry.tag {
                TAG_IMAGE_WIDTH => width = Some(self.read_dimension(entry)?),
                TAG_IMAGE_LENGTH => height = Some(self.read_dimension(entry)?),
                TAG_SOFTWARE => software = Some(self.read_ascii(entry)?),
                TAG_IMAGE_DESCRIPTION => description = Some(self.read_ascii(entry)?),
                _ => {}
            }
        }

        Ok(FirstPage {
            width: width.ok_or_else(|| self.error("first page has no ImageWidth"))?,
            height: height.ok_or_else(|| self.error("first page has no ImageLength"))?,
            texts: software.into_iter().chain(description).collect(),
        })
    }

    /// Number of IFDs in the chain.
    fn count_pages(&mut self) -> Result<u64> {
        let mut seen = HashSet::new();
        let mut offset = self.first_ifd;
        while offset != 0 {
            if !seen.insert(offset) {
                return Err(self.error("IFD chain loops"));
            }
            self.seek(offset)?;
            let count = self.read_entry_count()?;
            let next_pointer = self.next_pointer(offset, count)?;
            self.seek(next_pointer)?;
            offset = self.read_offset()?;
        }
        Ok(seen.len() as u64)
    }

    fn read_ifd(&mut self, offset: u64) -> Result<(Vec<IfdEntry>, u64)> {
        self.seek(offset)?;
        let count = self.read_entry_count()?;
        self.next_pointer(offset, count)?;
        let mut entries = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            let tag = self.read_u16()?;
            let field_type = self.read_u16()?;
            let count = if self.big_tiff {
                self.read_u64()?
            } else {
                u64::from(self.read_u32()?)
            };
            let mut inline = [0u8; 8];
            let width = if self.big_tiff { 8 } else { 4 };
            self.reader
                .read_exact(&mut inline[..width])
                .map_err(|e| self.io_error(e))?;
            entries.push(IfdEntry {
                tag,
                field_type,
                count,
                inline,
            });
        }
        let next = self.read_offset()?;
        Ok((entries, next))
    }

    fn read_dimension(&mut self, entry: &IfdEntry) -> Result<u32> {
        let width = match entry.field_type {
            3 => 2,
            4 => 4,
            16 => 8,
            other => {
                return Err(self.error(&format!("unexpected type {} for image size", other)))
            }
        };
        let bytes = self.entry_bytes(entry)?;
        if entry.count == 0 || bytes.len() < width {
            return Err(self.error("image size tag has no value"));
        }
        let value = match width {
            2 => u64::from(self.decode_u16(&bytes)),
            4 => u64::from(self.decode_u32(&bytes)),
            _ => self.decode_u64(&bytes),
        };
        u32::try_from(value).map_err(|_| self.error("image size out of range"))
    }

    fn read_ascii(&mut self, entry: &IfdEntry) -> Result<String> {
        let bytes = self.entry_bytes(entry)?;
        let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    /// Raw value bytes of an entry, inline or at its offset.
    fn entry_bytes(&mut self, entry: &IfdEntry) -> Result<Vec<u8>> {
        let unit = match entry.field_type {
            1 | 2 | 6 | 7 => 1,
            3 | 8 => 2,
            4 | 9 | 11 | 13 => 4,
            5 | 10 | 12 | 16 | 17 | 18 => 8,
            _ => 1,
        };
        let len = entry
            .count
            .checked_mul(unit)
            .ok_or_else(|| self.error("tag value too large"))?;
        let inline_len = if self.big_tiff { 8 } else { 4 };
        if len <= inline_len {
            return Ok(entry.inline[..len as usize].to_vec());
        }

        let offset = if self.big_tiff {
            self.decode_u64(&entry.inline)
        } else {
            u64::from(self.decode_u32(&entry.inline))
        };
        self.check_span(offset, len)?;
        let len = usize::try_from(len).map_err(|_| self.error("tag value too large"))?;
        self.seek(offset)?;
        let mut bytes = vec![0u8; len];
        self.reader
            .read_exact(&mut bytes)
            .map_err(|e| self.io_error(e))?;
        Ok(bytes)
    }

    /// Position of the next-IFD pointer of the IFD at `offset` with `count`
    /// entries. The whole IFD must lie inside the file.
    fn next_pointer(&self, offset: u64, count: u64) -> Result<u64> {
        let pointer = count
            .checked_mul(self.entry_size())
            .and_then(|entries| entries.checked_add(self.count_size()))
            .and_then(|len| len.checked_add(offset))
            .ok_or_else(|| self.error("IFD entry count out of range"))?;
        let pointer_size = if self.big_tiff { 8 } else { 4 };
        self.check_span(pointer, pointer_size)?;
        Ok(pointer)
    }

    fn check_span(&self, offset: u64, len: u64) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.file_len => Ok(()),
            _ => Err(self.error("value runs past the end of the file")),
        }
    }

    fn entry_size(&self) -> u64 {
        if self.big_tiff {
            20
        } else {
            12
        }
    }

    fn count_size(&self) -> u64 {
        if self.big_tiff {
            8
        } else {
            2
        }
    }

    fn read_entry_count(&mut self) -> Result<u64> {
        if self.big_tiff {
            self.read_u64()
        } else {
            Ok(u64::from(self.read_u16()?))
        }
    }

    fn read_offset(&mut self) -> Result<u64> {
        if self.big_tiff {
            self.read_u64()
        } else {
            Ok(u64::from(self.read_u32()?))
        }
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        self.reader
            .seek(SeekFrom::Start(offset))
            .map(|_| ())
            .map_err(|e| self.io_error(e))
    }

    fn read_u16(&mut self) -> Result<u16> {
        let value = match self.endian {
            Endian::Little => self.reader.read_u16::<LittleEndian>(),
            Endian::Big => self.reader.read_u16::<BigEndian>(),
        };
        value.map_err(|e| self.io_error(e))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let value = match self.endian {
            Endian::Little => self.reader.read_u32::<LittleEndian>(),
            Endian::Big => self.reader.read_u32::<BigEndian>(),
        };
        value.map_err(|e| self.io_error(e))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let value = match self.endian {
            Endian::Little => self.reader.read_u64::<LittleEndian>(),
            Endian::Big => self.reader.read_u64::<BigEndian>(),
        };
        value.map_err(|e| self.io_error(e))
    }

    fn decode_u16(&self, bytes: &[u8]) -> u16 {
        match self.endian {
            Endian::Little => LittleEndian::read_u16(bytes),
            Endian::Big => BigEndian::read_u16(bytes),
        }
    }

    fn decode_u32(&self, bytes: &[u8]) -> u32 {
        match self.endian {
            Endian::Little => LittleEndian::read_u32(bytes),
            Endian::Big => BigEndian::read_u32(bytes),
        }
    }

    fn decode_u64(&self, bytes: &[u8]) -> u64 {
        match self.endian {
            Endian::Little => LittleEndian::read_u64(bytes),
            Endian::Big => BigEndian::read_u64(bytes),
        }
    }

    fn error(&self, msg: &str) -> ScanError {
        ScanError::reader(&self.path, msg.to_string())
    }

    fn io_error(&self, err: std::io::Error) -> ScanError {
        ScanError::reader(&self.path, format!("truncated or unreadable TIFF: {}", err))
    }
}
