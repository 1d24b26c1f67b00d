//! Lookup and upstream table operations

use crate::error::{DbError, Result};
use crate::types::*;
use crate::ImagingDb;
use sqlx::Row;

impl ImagingDb {
    // ========================================================================
    // Lookups
    // ========================================================================

    /// All acquisition-software names, sorted.
    pub async fn list_acquisition_software(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT acq_software FROM acquisition_software ORDER BY acq_software")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get("acq_software").map_err(DbError::from))
            .collect()
    }

    /// Register an additional acquisition software name.
    pub async fn insert_acquisition_software(&self, name: &str) -> Result<()> {
        if name.is_empty() || name.len() > ACQ_SOFTWARE_MAX_LEN {
            return Err(DbError::constraint(format!(
                "acquisition software name must be 1..={} characters, got '{}'",
                ACQ_SOFTWARE_MAX_LEN, name
            )));
        }
        sqlx::query("INSERT INTO acquisition_software (acq_software) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_channels(&self) -> Result<Vec<i32>> {
        let rows = sqlx::query("SELECT channel FROM channel ORDER BY channel")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get("channel").map_err(DbError::from))
            .collect()
    }

    // ========================================================================
    // Upstream entities
    // ========================================================================

    /// Insert a session; an existing one is left untouched.
    pub async fn insert_session(&self, session: &SessionKey) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO session (subject, session_datetime) VALUES (?, ?)")
            .bind(&session.subject)
            .bind(session.datetime_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn session_exists(&self, session: &SessionKey) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM session WHERE subject = ? AND session_datetime = ?")
            .bind(&session.subject)
            .bind(session.datetime_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionKey>> {
        let rows = sqlx::query(
            "SELECT subject, session_datetime FROM session ORDER BY subject, session_datetime",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_session_key).collect()
    }

    pub async fn insert_equipment(&self, scanner: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO equipment (scanner) VALUES (?)")
            .bind(scanner)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert_location(&self, anatomical_location: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO location (anatomical_location) VALUES (?)")
            .bind(anatomical_location)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
