//! Configuration for the directory-backed link and the CLI

use crate::error::{Result, ScanError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration, read from `imaging_scan.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagingConfig {
    /// Path to the SQLite database holding the scan schema
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Candidate roots for raw imaging data, searched in order
    #[serde(default)]
    pub imaging_root_data_dirs: Vec<PathBuf>,

    /// Root for processed data; appended to the candidate roots when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_data_dir: Option<PathBuf>,

    /// chrono format of the session-datetime directory under `<subject>/`
    #[serde(default = "default_session_dir_format")]
    pub session_dir_format: String,
}

fn default_database_path() -> PathBuf {
    imaging_logging::imaging_home().join("imaging_scan.sqlite3")
}

fn default_session_dir_format() -> String {
    "%Y%m%d_%H%M%S".to_string()
}

impl Default for ImagingConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            imaging_root_data_dirs: Vec::new(),
            processed_data_dir: None,
            session_dir_format: default_session_dir_format(),
        }
    }
}

impl ImagingConfig {
    /// Default config file location: ~/.imaging_scan/imaging_scan.toml
    pub fn default_path() -> PathBuf {
        imaging_logging::imaging_home().join("imaging_scan.toml")
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ImagingConfig =
            toml::from_str(&content).map_err(|e| ScanError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ScanError::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ImagingConfig::default();
        assert!(config
            .database_path
            .to_string_lossy()
            .ends_with("imaging_scan.sqlite3"));
        assert!(config.imaging_root_data_dirs.is_empty());
        assert_eq!(config.session_dir_format, "%Y%m%d_%H%M%S");
    }

    #[test]
    fn test_config_file_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("conf").join("imaging_scan.toml");
        let config = ImagingConfig {
            database_path: PathBuf::from("/lab/db/scan.sqlite3"),
            imaging_root_data_dirs: vec![PathBuf::from("/mnt/rig1"), PathBuf::from("/mnt/rig2")],
            processed_data_dir: Some(PathBuf::from("/mnt/processed")),
            session_dir_format: "%Y-%m-%d".to_string(),
        };

        config.save(&path).unwrap();
        assert_eq!(ImagingConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ImagingConfig =
            toml::from_str(r#"imaging_root_data_dirs = ["/data/raw"]"#).unwrap();
        assert_eq!(config.imaging_root_data_dirs, vec![PathBuf::from("/data/raw")]);
        assert_eq!(config.processed_data_dir, None);
        assert_eq!(config.session_dir_format, "%Y%m%d_%H%M%S");
    }

    #[test]
    fn test_invalid_config_is_config_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("bad.toml");
        std::fs::write(&path, "imaging_root_data_dirs = 3").unwrap();
        assert!(matches!(ImagingConfig::load(&path), Err(ScanError::Config(_))));
    }
}
