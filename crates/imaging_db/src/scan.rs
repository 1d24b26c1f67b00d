//! Scan and ScanLocation operations

use crate::error::{DbError, Result};
use crate::types::*;
use crate::ImagingDb;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

const SCAN_COLUMNS: &str = "subject, session_datetime, scan_id, scanner, acq_software, scan_notes";

impl ImagingDb {
    // ========================================================================
    // Scan Operations
    // ========================================================================

    /// Insert a single scan.
    pub async fn insert_scan(&self, scan: &Scan) -> Result<()> {
        self.insert_scans(std::slice::from_ref(scan)).await
    }

    /// Insert scans in one transaction; either all rows land or none.
    pub async fn insert_scans(&self, scans: &[Scan]) -> Result<()> {
        for scan in scans {
            check_notes(scan)?;
        }

        let mut tx = self.pool.begin().await?;
        for scan in scans {
            sqlx::query(
                r#"
                INSERT INTO scan (subject, session_datetime, scan_id, scanner, acq_software, scan_notes)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&scan.key.session.subject)
            .bind(scan.key.session.datetime_str())
            .bind(scan.key.scan_id)
            .bind(&scan.scanner)
            .bind(&scan.acq_software)
            .bind(&scan.scan_notes)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(count = scans.len(), "Inserted scans");
        Ok(())
    }

    pub async fn get_scan(&self, key: &ScanKey) -> Result<Option<Scan>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM scan WHERE subject = ? AND session_datetime = ? AND scan_id = ?",
            SCAN_COLUMNS
        ))
        .bind(&key.session.subject)
        .bind(key.session.datetime_str())
        .bind(key.scan_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_scan).transpose()
    }

    /// The acquisition-software tag of a scan (fails if the scan is unknown).
    pub async fn fetch_acq_software(&self, key: &ScanKey) -> Result<String> {
        self.get_scan(key)
            .await?
            .map(|scan| scan.acq_software)
            .ok_or_else(|| DbError::not_found(format!("scan {}", key)))
    }

    /// Scans of one session, or of every session when `session` is `None`.
    pub async fn list_scans(&self, session: Option<&SessionKey>) -> Result<Vec<Scan>> {
        let rows = match session {
            Some(session) => {
                sqlx::query(&format!(
                    "SELECT {} FROM scan WHERE subject = ? AND session_datetime = ? ORDER BY scan_id",
                    SCAN_COLUMNS
                ))
                .bind(&session.subject)
                .bind(session.datetime_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM scan ORDER BY subject, session_datetime, scan_id",
                    SCAN_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(Self::row_to_scan).collect()
    }

    /// Scans that do not have a `scan_info` row yet, in key order.
    pub async fn scans_without_info(&self) -> Result<Vec<ScanKey>> {
        let rows = sqlx::query(
            r#"
            SELECT s.subject, s.session_datetime, s.scan_id
            FROM scan s
            LEFT JOIN scan_info i
                ON i.subject = s.subject
                AND i.session_datetime = s.session_datetime
                AND i.scan_id = s.scan_id
            WHERE i.scan_id IS NULL
            ORDER BY s.subject, s.session_datetime, s.scan_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_scan_key).collect()
    }

    /// Delete a scan together with its location and scan info.
    pub async fn delete_scan(&self, key: &ScanKey) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM scan WHERE subject = ? AND session_datetime = ? AND scan_id = ?",
        )
        .bind(&key.session.subject)
        .bind(key.session.datetime_str())
        .bind(key.scan_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    fn row_to_scan(row: &SqliteRow) -> Result<Scan> {
        Ok(Scan {
            key: Self::row_to_scan_key(row)?,
            scanner: row.try_get("scanner")?,
            acq_software: row.try_get("acq_software")?,
            scan_notes: row.try_get("scan_notes")?,
        })
    }

    // ========================================================================
    // ScanLocation Operations
    // ========================================================================

    pub async fn insert_scan_location(&self, location: &ScanLocation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scan_location (subject, session_datetime, scan_id, anatomical_location)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&location.key.session.subject)
        .bind(location.key.session.datetime_str())
        .bind(location.key.scan_id)
        .bind(&location.anatomical_location)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_scan_location(&self, key: &ScanKey) -> Result<Option<ScanLocation>> {
        let row = sqlx::query(
            r#"
            SELECT subject, session_datetime, scan_id, anatomical_location
            FROM scan_location
            WHERE subject = ? AND session_datetime = ? AND scan_id = ?
            "#,
        )
        .bind(&key.session.subject)
        .bind(key.session.datetime_str())
        .bind(key.scan_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(ScanLocation {
                key: Self::row_to_scan_key(&row)?,
                anatomical_location: row.try_get("anatomical_location")?,
            })),
            None => Ok(None),
        }
    }
}

fn check_notes(scan: &Scan) -> Result<()> {
    if scan.scan_notes.chars().count() > SCAN_NOTES_MAX_LEN {
        return Err(DbError::constraint(format!(
            "scan_notes of {} exceed {} characters",
            scan.key, SCAN_NOTES_MAX_LEN
        )));
    }
    Ok(())
}
