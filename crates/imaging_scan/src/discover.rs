//! Raw-file discovery under a session directory.

use crate::error::{Result, ScanError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// Files below `dir` (recursively) whose extension is `extension`, sorted.
///
/// Extensions compare ASCII case-insensitively. Unreadable entries are
/// logged and skipped.
pub fn files_with_extension(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(ScanError::not_found(format!(
            "{} is not a directory",
            dir.display()
        )));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "Skipping unreadable entry");
                continue;
            }
        };
        if entry.file_type().is_file() && has_extension(entry.path(), extension) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// Files directly inside `dir` with the given extension, sorted.
pub fn files_in_directory(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && has_extension(&path, extension) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Group files by parent directory; directories iterate in lexicographic order.
pub fn group_by_parent(files: &[PathBuf]) -> BTreeMap<PathBuf, Vec<PathBuf>> {
    let mut groups: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
    for file in files {
        if let Some(parent) = file.parent() {
            groups
                .entry(parent.to_path_buf())
                .or_default()
                .push(file.clone());
        }
    }
    groups
}

/// Directories holding files of `extension` below `session_dir`, in `scan_id` order.
pub fn scan_directories(session_dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let files = files_with_extension(session_dir, extension)?;
    Ok(group_by_parent(&files).into_keys().collect())
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"").unwrap();
        path
    }

    #[test]
    fn test_files_with_extension_recursive_and_sorted() {
        let tmp = TempDir::new().unwrap();
        let b = touch(tmp.path(), "scan1/img1.tif");
        let a = touch(tmp.path(), "scan0/img2.TIF");
        let c = touch(tmp.path(), "scan0/deep/img3.tif");
        touch(tmp.path(), "scan0/notes.txt");
        touch(tmp.path(), "scan0/img.tiff");

        let files = files_with_extension(tmp.path(), "tif").unwrap();
        assert_eq!(files, vec![c, a, b]);
    }

    #[test]
    fn test_missing_directory_is_not_found() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            files_with_extension(&tmp.path().join("nope"), "sbx"),
            Err(ScanError::NotFound(_))
        ));
    }

    #[test]
    fn test_scan_directories_are_ordered() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "sessA/scan1/img1.tif");
        touch(tmp.path(), "sessA/scan0/img2.tif");
        touch(tmp.path(), "sessA/scan0/img1.tif");

        let dirs = scan_directories(&tmp.path().join("sessA"), "tif").unwrap();
        assert_eq!(
            dirs,
            vec![tmp.path().join("sessA/scan0"), tmp.path().join("sessA/scan1")]
        );
    }

    #[test]
    fn test_files_in_directory_is_flat() {
        let tmp = TempDir::new().unwrap();
        let top = touch(tmp.path(), "x.nd2");
        touch(tmp.path(), "sub/y.nd2");

        assert_eq!(files_in_directory(tmp.path(), "nd2").unwrap(), vec![top]);
    }
}
