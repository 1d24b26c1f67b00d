//! Binary encoding of per-pixel delay images.
//!
//! Layout (little-endian): `u32` rows, `u32` cols, then `rows * cols` `f64`
//! values in row-major order.

use crate::error::{DbError, Result};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::io::Cursor;

const HEADER_LEN: usize = 8;

/// A 2-D array of per-pixel timing offsets (ms).
#[derive(Debug, Clone, PartialEq)]
pub struct DelayImage {
    rows: usize,
    cols: usize,
    values: Vec<f64>,
}

impl DelayImage {
    /// Build from row-major values. Fails if the length does not match.
    pub fn new(rows: usize, cols: usize, values: Vec<f64>) -> Result<Self> {
        header_dimension(rows)?;
        header_dimension(cols)?;
        if rows.checked_mul(cols) != Some(values.len()) {
            return Err(DbError::Blob(format!(
                "{} values do not fill a {}x{} image",
                values.len(),
                rows,
                cols
            )));
        }
        Ok(Self { rows, cols, values })
    }

    /// Build by evaluating `f(row, col)` for every pixel.
    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> f64) -> Self {
        let mut values = Vec::with_capacity(rows * cols);
        for row in 0..rows {
            for col in 0..cols {
                values.push(f(row, col));
            }
        }
        Self { rows, cols, values }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.values.get(row * self.cols + col).copied()
    }

    /// Encode for storage. Fails if a dimension does not fit in the `u32` header.
    pub fn to_blob(&self) -> Result<Vec<u8>> {
        let rows = header_dimension(self.rows)?;
        let cols = header_dimension(self.cols)?;
        let mut out = vec![0u8; HEADER_LEN + self.values.len() * 8];
        LittleEndian::write_u32(&mut out[0..4], rows);
        LittleEndian::write_u32(&mut out[4..HEADER_LEN], cols);
        LittleEndian::write_f64_into(&self.values, &mut out[HEADER_LEN..]);
        Ok(out)
    }

    pub fn from_blob(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(DbError::Blob(format!(
                "blob of {} bytes has no header",
                bytes.len()
            )));
        }
        let mut cursor = Cursor::new(bytes);
        let rows = cursor.read_u32::<LittleEndian>()? as usize;
        let cols = cursor.read_u32::<LittleEndian>()? as usize;
        let expected = rows
            .checked_mul(cols)
            .and_then(|n| n.checked_mul(8))
            .and_then(|n| n.checked_add(HEADER_LEN))
            .ok_or_else(|| DbError::Blob(format!("{}x{} image overflows", rows, cols)))?;
        if bytes.len() != expected {
            return Err(DbError::Blob(format!(
                "{}x{} image needs {} bytes, blob has {}",
                rows,
                cols,
                expected,
                bytes.len()
            )));
        }
        let mut values = vec![0.0; rows * cols];
        cursor.read_f64_into::<LittleEndian>(&mut values)?;
        Self::new(rows, cols, values)
    }
}

fn header_dimension(n: usize) -> Result<u32> {
    u32::try_from(n)
        .map_err(|_| DbError::Blob(format!("dimension {} does not fit the blob header", n)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_roundtrip() {
        let image = DelayImage::from_fn(3, 4, |r, c| r as f64 * 10.0 + c as f64 * 0.5);
        let decoded = DelayImage::from_blob(&image.to_blob().unwrap()).unwrap();
        assert_eq!(decoded, image);
        assert_eq!(decoded.get(2, 3), Some(21.5));
        assert_eq!(decoded.get(3, 0), None);
    }

    #[test]
    fn test_truncated_blob_rejected() {
        let image = DelayImage::from_fn(2, 2, |_, _| 1.0);
        let mut bytes = image.to_blob().unwrap();
        bytes.pop();
        assert!(matches!(DelayImage::from_blob(&bytes), Err(DbError::Blob(_))));
        assert!(matches!(DelayImage::from_blob(&[1, 2, 3]), Err(DbError::Blob(_))));
    }

    #[test]
    fn test_new_checks_shape() {
        assert!(DelayImage::new(2, 3, vec![0.0; 6]).is_ok());
        assert!(DelayImage::new(2, 3, vec![0.0; 5]).is_err());
    }

    #[test]
    fn test_oversize_dimensions_rejected() {
        let wide = u32::MAX as usize + 1;
        assert!(matches!(
            DelayImage::new(0, wide, Vec::new()),
            Err(DbError::Blob(_))
        ));

        let image = DelayImage::from_fn(0, wide, |_, _| 0.0);
        assert!(matches!(image.to_blob(), Err(DbError::Blob(_))));
    }
}
