//! Relational schema for calcium-imaging scan metadata.
//!
//! Tables, leaf-first:
//!
//! - `acquisition_software`, `channel`: seeded lookups
//! - `session`, `equipment`, `location`: upstream entities referenced by scans
//! - `scan`, `scan_location`: manual tables
//! - `scan_info` with parts `scan_info_field` and `scan_info_file`: filled by ingestion
//!
//! # Usage
//!
//! ```rust,ignore
//! use imaging_db::{ActivateOptions, ImagingDb};
//!
//! let db = ImagingDb::activate("lab/imaging_scan.sqlite3", ActivateOptions::default()).await?;
//! let pending = db.scans_without_info().await?;
//! ```

mod blob;
mod error;
mod lookup;
mod scan;
mod scan_info;
mod schema;
mod types;

pub use blob::DelayImage;
pub use error::{DbError, Result};
pub use schema::TABLES;
pub use types::*;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// How [`ImagingDb::activate`] treats a missing database or missing tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivateOptions {
    /// Create the database file if it does not exist yet.
    pub create_schema: bool,
    /// Create missing tables and seed the lookups.
    pub create_tables: bool,
}

impl Default for ActivateOptions {
    fn default() -> Self {
        Self {
            create_schema: true,
            create_tables: true,
        }
    }
}

/// Handle on the scan schema.
#[derive(Clone)]
pub struct ImagingDb {
    pool: SqlitePool,
}

impl ImagingDb {
    /// Open (or create) the database and make sure every table exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::activate(path, ActivateOptions::default()).await
    }

    /// Open an existing database (fails if not exists).
    pub async fn open_existing(path: impl AsRef<Path>) -> Result<Self> {
        Self::activate(
            path,
            ActivateOptions {
                create_schema: false,
                create_tables: false,
            },
        )
        .await
    }

    /// Activate the schema stored at `path`.
    ///
    /// With `create_schema` unset the file must already exist; with
    /// `create_tables` unset every table must already be present.
    pub async fn activate(path: impl AsRef<Path>, options: ActivateOptions) -> Result<Self> {
        let path = path.as_ref();

        if !options.create_schema && !path.exists() {
            return Err(DbError::not_found(format!(
                "Database not found: {}",
                path.display()
            )));
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let connect = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(options.create_schema)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect)
            .await?;

        let db = Self { pool };
        db.prepare(options.create_tables).await?;

        info!(path = %path.display(), "Scan schema activated");
        Ok(db)
    }

    /// In-memory database with all tables (for tests and dry runs).
    pub async fn open_memory() -> Result<Self> {
        let connect = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        // One long-lived connection: every new in-memory connection is a new database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect)
            .await?;

        let db = Self { pool };
        db.prepare(true).await?;
        Ok(db)
    }

    async fn prepare(&self, create_tables: bool) -> Result<()> {
        if create_tables {
            self.ensure_schema().await
        } else {
            self.verify_schema().await
        }
    }

    /// Get the underlying connection pool (escape hatch for complex queries).
    ///
    /// Prefer using the typed methods instead.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

// Row decoding shared by the table modules.
impl ImagingDb {
    pub(crate) fn row_to_session_key(row: &sqlx::sqlite::SqliteRow) -> Result<SessionKey> {
        let subject: String = row.try_get("subject")?;
        let datetime: String = row.try_get("session_datetime")?;
        let session_datetime = SessionKey::parse_datetime(&datetime).ok_or_else(|| {
            DbError::invalid_state(format!(
                "session_datetime '{}' of subject '{}' is not '{}'",
                datetime, subject, SESSION_DATETIME_FORMAT
            ))
        })?;
        Ok(SessionKey {
            subject,
            session_datetime,
        })
    }

    pub(crate) fn row_to_scan_key(row: &sqlx::sqlite::SqliteRow) -> Result<ScanKey> {
        Ok(ScanKey {
            session: Self::row_to_session_key(row)?,
            scan_id: row.try_get("scan_id")?,
        })
    }
}
