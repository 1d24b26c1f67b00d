//! Database schema creation for the scan tables.
//!
//! All CREATE TABLE statements live here - single source of truth.

use crate::error::{DbError, Result};
use crate::types::{AcquisitionSoftware, CHANNELS};
use crate::ImagingDb;
use tracing::{debug, info};

/// Every table of the schema, leaf-first.
pub const TABLES: [&str; 10] = [
    "acquisition_software",
    "channel",
    "session",
    "equipment",
    "location",
    "scan",
    "scan_location",
    "scan_info",
    "scan_info_field",
    "scan_info_file",
];

impl ImagingDb {
    /// Ensure all tables exist and the lookups are seeded.
    pub(crate) async fn ensure_schema(&self) -> Result<()> {
        self.create_lookup_tables().await?;
        self.create_upstream_tables().await?;
        self.create_scan_tables().await?;
        self.create_scan_info_tables().await?;
        self.seed_lookups().await?;

        info!("Scan schema verified");
        Ok(())
    }

    /// Fail with the first missing table.
    pub(crate) async fn verify_schema(&self) -> Result<()> {
        for table in TABLES {
            let found: Option<(String,)> =
                sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
                    .bind(table)
                    .fetch_optional(&self.pool)
                    .await?;
            if found.is_none() {
                return Err(DbError::not_found(format!("table '{}' does not exist", table)));
            }
        }
        Ok(())
    }

    async fn create_lookup_tables(&self) -> Result<()> {
        // Name of acquisition software - e.g. ScanImage, Scanbox, NIS
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS acquisition_software (
                acq_software TEXT PRIMARY KEY CHECK (length(acq_software) <= 24)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // Recording channel, 0-based
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS channel (
                channel INTEGER PRIMARY KEY CHECK (channel BETWEEN 0 AND 127)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Minimal upstream entities. A host may keep richer tables under the
    /// same names as long as the key columns match.
    async fn create_upstream_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS session (
                subject TEXT NOT NULL,
                session_datetime TEXT NOT NULL,
                PRIMARY KEY (subject, session_datetime)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS equipment (
                scanner TEXT PRIMARY KEY
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS location (
                anatomical_location TEXT PRIMARY KEY
            )"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create_scan_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS scan (
                subject TEXT NOT NULL,
                session_datetime TEXT NOT NULL,
                scan_id INTEGER NOT NULL,
                scanner TEXT REFERENCES equipment(scanner),
                acq_software TEXT NOT NULL REFERENCES acquisition_software(acq_software),
                scan_notes TEXT NOT NULL DEFAULT '' CHECK (length(scan_notes) <= 4095),
                PRIMARY KEY (subject, session_datetime, scan_id),
                FOREIGN KEY (subject, session_datetime)
                    REFERENCES session(subject, session_datetime)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS scan_location (
                subject TEXT NOT NULL,
                session_datetime TEXT NOT NULL,
                scan_id INTEGER NOT NULL,
                anatomical_location TEXT NOT NULL REFERENCES location(anatomical_location),
                PRIMARY KEY (subject, session_datetime, scan_id),
                FOREIGN KEY (subject, session_datetime, scan_id)
                    REFERENCES scan(subject, session_datetime, scan_id) ON DELETE CASCADE
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_scan_acq_software ON scan(acq_software)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn create_scan_info_tables(&self) -> Result<()> {
        // General data about the scan, read from the file header
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS scan_info (
                subject TEXT NOT NULL,
                session_datetime TEXT NOT NULL,
                scan_id INTEGER NOT NULL,
                nfields INTEGER NOT NULL,
                nchannels INTEGER NOT NULL,
                ndepths INTEGER NOT NULL,
                nframes INTEGER NOT NULL,
                nrois INTEGER,
                x REAL,
                y REAL,
                z REAL,
                fps REAL NOT NULL,
                bidirectional INTEGER NOT NULL,
                usecs_per_line REAL,
                fill_fraction REAL,
                PRIMARY KEY (subject, session_datetime, scan_id),
                FOREIGN KEY (subject, session_datetime, scan_id)
                    REFERENCES scan(subject, session_datetime, scan_id) ON DELETE CASCADE
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // Field-specific scan information
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS scan_info_field (
                subject TEXT NOT NULL,
                session_datetime TEXT NOT NULL,
                scan_id INTEGER NOT NULL,
                field_idx INTEGER NOT NULL,
                px_height INTEGER NOT NULL,
                px_width INTEGER NOT NULL,
                um_height REAL,
                um_width REAL,
                field_x REAL,
                field_y REAL,
                field_z REAL,
                delay_image BLOB,
                roi INTEGER,
                PRIMARY KEY (subject, session_datetime, scan_id, field_idx),
                FOREIGN KEY (subject, session_datetime, scan_id)
                    REFERENCES scan_info(subject, session_datetime, scan_id) ON DELETE CASCADE
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS scan_info_file (
                subject TEXT NOT NULL,
                session_datetime TEXT NOT NULL,
                scan_id INTEGER NOT NULL,
                file_path TEXT NOT NULL CHECK (length(file_path) <= 255),
                PRIMARY KEY (subject, session_datetime, scan_id, file_path),
                FOREIGN KEY (subject, session_datetime, scan_id)
                    REFERENCES scan_info(subject, session_datetime, scan_id) ON DELETE CASCADE
            )"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn seed_lookups(&self) -> Result<()> {
        for software in AcquisitionSoftware::ALL {
            sqlx::query("INSERT OR IGNORE INTO acquisition_software (acq_software) VALUES (?)")
                .bind(software.as_str())
                .execute(&self.pool)
                .await?;
        }
        for channel in CHANNELS {
            sqlx::query("INSERT OR IGNORE INTO channel (channel) VALUES (?)")
                .bind(channel)
                .execute(&self.pool)
                .await?;
        }
        debug!("Lookup tables seeded");
        Ok(())
    }
}
