//! ScanInfo operations (ingested header metadata and its parts)

use crate::blob::DelayImage;
use crate::error::{DbError, Result};
use crate::types::*;
use crate::ImagingDb;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

impl ImagingDb {
    /// Persist a ScanInfo with its fields and files in one transaction.
    ///
    /// Fails with [`DbError::DuplicateKey`] if the scan was already ingested.
    pub async fn insert_scan_info(&self, record: &ScanInfoRecord) -> Result<()> {
        let key = &record.info.key;
        check_parts(record)?;

        let mut tx = self.pool.begin().await?;

        let info = &record.info;
        sqlx::query(
            r#"
            INSERT INTO scan_info (
                subject, session_datetime, scan_id,
                nfields, nchannels, ndepths, nframes, nrois,
                x, y, z, fps, bidirectional, usecs_per_line, fill_fraction
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&key.session.subject)
        .bind(key.session.datetime_str())
        .bind(key.scan_id)
        .bind(info.nfields)
        .bind(info.nchannels)
        .bind(info.ndepths)
        .bind(info.nframes)
        .bind(info.nrois)
        .bind(info.x)
        .bind(info.y)
        .bind(info.z)
        .bind(info.fps)
        .bind(info.bidirectional)
        .bind(info.usecs_per_line)
        .bind(info.fill_fraction)
        .execute(&mut *tx)
        .await?;

        for field in &record.fields {
            sqlx::query(
                r#"
                INSERT INTO scan_info_field (
                    subject, session_datetime, scan_id, field_idx,
                    px_height, px_width, um_height, um_width,
                    field_x, field_y, field_z, delay_image, roi
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&key.session.subject)
            .bind(key.session.datetime_str())
            .bind(key.scan_id)
            .bind(field.field_idx)
            .bind(field.px_height)
            .bind(field.px_width)
            .bind(field.um_height)
            .bind(field.um_width)
            .bind(field.field_x)
            .bind(field.field_y)
            .bind(field.field_z)
            .bind(field.delay_image.as_ref().map(DelayImage::to_blob).transpose()?)
            .bind(field.roi)
            .execute(&mut *tx)
            .await?;
        }

        for file in &record.files {
            sqlx::query(
                r#"
                INSERT INTO scan_info_file (subject, session_datetime, scan_id, file_path)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&key.session.subject)
            .bind(key.session.datetime_str())
            .bind(key.scan_id)
            .bind(&file.file_path)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(
            scan = %key,
            fields = record.fields.len(),
            files = record.files.len(),
            "Inserted scan info"
        );
        Ok(())
    }

    pub async fn get_scan_info(&self, key: &ScanKey) -> Result<Option<ScanInfo>> {
        let row = sqlx::query(
            r#"
            SELECT subject, session_datetime, scan_id,
                   nfields, nchannels, ndepths, nframes, nrois,
                   x, y, z, fps, bidirectional, usecs_per_line, fill_fraction
            FROM scan_info
            WHERE subject = ? AND session_datetime = ? AND scan_id = ?
            "#,
        )
        .bind(&key.session.subject)
        .bind(key.session.datetime_str())
        .bind(key.scan_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_scan_info).transpose()
    }

    /// Fields of a scan, ordered by `field_idx`.
    pub async fn list_scan_fields(&self, key: &ScanKey) -> Result<Vec<ScanField>> {
        let rows = sqlx::query(
            r#"
            SELECT subject, session_datetime, scan_id, field_idx,
                   px_height, px_width, um_height, um_width,
                   field_x, field_y, field_z, delay_image, roi
            FROM scan_info_field
            WHERE subject = ? AND session_datetime = ? AND scan_id = ?
            ORDER BY field_idx
            "#,
        )
        .bind(&key.session.subject)
        .bind(key.session.datetime_str())
        .bind(key.scan_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_scan_field).collect()
    }

    /// Files of a scan, ordered by path.
    pub async fn list_scan_files(&self, key: &ScanKey) -> Result<Vec<ScanFile>> {
        let rows = sqlx::query(
            r#"
            SELECT subject, session_datetime, scan_id, file_path
            FROM scan_info_file
            WHERE subject = ? AND session_datetime = ? AND scan_id = ?
            ORDER BY file_path
            "#,
        )
        .bind(&key.session.subject)
        .bind(key.session.datetime_str())
        .bind(key.scan_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ScanFile {
                    key: Self::row_to_scan_key(row)?,
                    file_path: row.try_get("file_path")?,
                })
            })
            .collect()
    }

    /// Delete a ScanInfo and its parts so the scan can be ingested again.
    pub async fn delete_scan_info(&self, key: &ScanKey) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM scan_info WHERE subject = ? AND session_datetime = ? AND scan_id = ?",
        )
        .bind(&key.session.subject)
        .bind(key.session.datetime_str())
        .bind(key.scan_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    fn row_to_scan_info(row: &SqliteRow) -> Result<ScanInfo> {
        Ok(ScanInfo {
            key: Self::row_to_scan_key(row)?,
            nfields: row.try_get("nfields")?,
            nchannels: row.try_get("nchannels")?,
            ndepths: row.try_get("ndepths")?,
            nframes: row.try_get("nframes")?,
            nrois: row.try_get("nrois")?,
            x: row.try_get("x")?,
            y: row.try_get("y")?,
            z: row.try_get("z")?,
            fps: row.try_get("fps")?,
            bidirectional: row.try_get("bidirectional")?,
            usecs_per_line: row.try_get("usecs_per_line")?,
            fill_fraction: row.try_get("fill_fraction")?,
        })
    }

    fn row_to_scan_field(row: &SqliteRow) -> Result<ScanField> {
        let blob: Option<Vec<u8>> = row.try_get("delay_image")?;
        Ok(ScanField {
            key: Self::row_to_scan_key(row)?,
            field_idx: row.try_get("field_idx")?,
            px_height: row.try_get("px_height")?,
            px_width: row.try_get("px_width")?,
            um_height: row.try_get("um_height")?,
            um_width: row.try_get("um_width")?,
            field_x: row.try_get("field_x")?,
            field_y: row.try_get("field_y")?,
            field_z: row.try_get("field_z")?,
            delay_image: blob.as_deref().map(DelayImage::from_blob).transpose()?,
            roi: row.try_get("roi")?,
        })
    }
}

/// Parts must belong to the master row, and paths must be relative and fit the column.
fn check_parts(record: &ScanInfoRecord) -> Result<()> {
    let key = &record.info.key;
    if record.fields.iter().any(|f| &f.key != key) || record.files.iter().any(|f| &f.key != key) {
        return Err(DbError::constraint(format!(
            "part rows of scan info {} carry a different key",
            key
        )));
    }
    if usize::try_from(record.info.nfields).ok() != Some(record.fields.len()) {
        return Err(DbError::constraint(format!(
            "scan info {} declares {} fields but carries {}",
            key,
            record.info.nfields,
            record.fields.len()
        )));
    }
    for file in &record.files {
        if file.file_path.starts_with('/') || file.file_path.contains('\\') {
            return Err(DbError::constraint(format!(
                "file path '{}' is not a relative posix path",
                file.file_path
            )));
        }
        if file.file_path.chars().count() > FILE_PATH_MAX_LEN {
            return Err(DbError::constraint(format!(
                "file path '{}' exceeds {} characters",
                file.file_path, FILE_PATH_MAX_LEN
            )));
        }
    }
    Ok(())
}
