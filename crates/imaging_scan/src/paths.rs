//! Resolution of raw-data paths against the configured root directories.
//!
//! Paths are persisted relative to whichever root holds them, so the same
//! database works on machines that mount the data in different places.

use crate::error::{Result, ScanError};
use std::path::{Component, Path, PathBuf};

/// The first root in `roots` that is a strict ancestor of `full_path`.
///
/// `full_path` must exist. Roots are compared lexically first and then in
/// canonical form, so symlinked mounts still match.
pub fn find_root_directory(roots: &[PathBuf], full_path: &Path) -> Result<PathBuf> {
    if !full_path.exists() {
        return Err(ScanError::not_found(format!(
            "{} does not exist",
            full_path.display()
        )));
    }

    roots
        .iter()
        .find(|root| strip_root(root, full_path).is_some())
        .cloned()
        .ok_or_else(|| {
            ScanError::not_found(format!(
                "no root data directory among {} contains {}",
                display_roots(roots),
                full_path.display()
            ))
        })
}

/// Resolve a path that may be relative to one of the roots.
///
/// An existing path is returned as given; otherwise the first
/// `root/relative_path` that exists wins.
pub fn find_full_path(roots: &[PathBuf], relative_path: &Path) -> Result<PathBuf> {
    if relative_path.exists() {
        return Ok(relative_path.to_path_buf());
    }

    roots
        .iter()
        .map(|root| root.join(relative_path))
        .find(|candidate| candidate.exists())
        .ok_or_else(|| {
            ScanError::not_found(format!(
                "{} not found under any root data directory ({})",
                relative_path.display(),
                display_roots(roots)
            ))
        })
}

/// `path` relative to `root`, joined with `/`.
pub fn relative_posix(root: &Path, path: &Path) -> Result<String> {
    let relative = strip_root(root, path).ok_or_else(|| {
        ScanError::InvalidPath(format!(
            "{} is not inside {}",
            path.display(),
            root.display()
        ))
    })?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or_else(|| {
                    ScanError::InvalidPath(format!("{} is not valid UTF-8", path.display()))
                })?;
                parts.push(part);
            }
            Component::CurDir => {}
            other => {
                return Err(ScanError::InvalidPath(format!(
                    "unexpected component {:?} in {}",
                    other,
                    path.display()
                )));
            }
        }
    }
    Ok(parts.join("/"))
}

/// The non-empty remainder of `path` below `root`.
fn strip_root(root: &Path, path: &Path) -> Option<PathBuf> {
    let strict = |root: &Path, path: &Path| {
        path.strip_prefix(root)
            .ok()
            .filter(|rest| !rest.as_os_str().is_empty())
            .map(Path::to_path_buf)
    };

    strict(root, path).or_else(|| {
        let root = root.canonicalize().ok()?;
        let path = path.canonicalize().ok()?;
        strict(&root, &path)
    })
}

fn display_roots(roots: &[PathBuf]) -> String {
    let listed: Vec<String> = roots.iter().map(|r| r.display().to_string()).collect();
    format!("[{}]", listed.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_find_root_directory_first_match_wins() {
        let tmp = TempDir::new().unwrap();
        let raw = tmp.path().join("raw");
        let other = tmp.path().join("other");
        let file = raw.join("mouse1/scan0/a.tif");
        touch(&file);
        fs::create_dir_all(&other).unwrap();

        let roots = vec![other.clone(), raw.clone(), tmp.path().to_path_buf()];
        assert_eq!(find_root_directory(&roots, &file).unwrap(), raw);
    }

    #[test]
    fn test_find_root_directory_errors() {
        let tmp = TempDir::new().unwrap();
        let raw = tmp.path().join("raw");
        let elsewhere = tmp.path().join("elsewhere/a.tif");
        touch(&elsewhere);

        let roots = vec![raw.clone()];
        assert!(matches!(
            find_root_directory(&roots, &raw.join("missing.tif")),
            Err(ScanError::NotFound(_))
        ));
        assert!(matches!(
            find_root_directory(&roots, &elsewhere),
            Err(ScanError::NotFound(_))
        ));
    }

    #[test]
    fn test_root_is_not_its_own_ancestor() {
        let tmp = TempDir::new().unwrap();
        let raw = tmp.path().join("raw");
        fs::create_dir_all(&raw).unwrap();

        assert!(find_root_directory(&[raw.clone()], &raw).is_err());
    }

    #[test]
    fn test_find_full_path() {
        let tmp = TempDir::new().unwrap();
        let first = tmp.path().join("first");
        let second = tmp.path().join("second");
        touch(&second.join("mouse1/session/x.sbx"));
        touch(&first.join("mouse2/session/y.sbx"));

        let roots = vec![first.clone(), second.clone()];
        assert_eq!(
            find_full_path(&roots, Path::new("mouse1/session")).unwrap(),
            second.join("mouse1/session")
        );
        assert_eq!(
            find_full_path(&roots, Path::new("mouse2/session")).unwrap(),
            first.join("mouse2/session")
        );

        // Absolute, existing paths come back untouched.
        let absolute = second.join("mouse1");
        assert_eq!(find_full_path(&roots, &absolute).unwrap(), absolute);

        assert!(matches!(
            find_full_path(&roots, Path::new("mouse3")),
            Err(ScanError::NotFound(_))
        ));
    }

    #[test]
    fn test_relative_posix() {
        let root = Path::new("/data/raw");
        assert_eq!(
            relative_posix(root, Path::new("/data/raw/mouse1/scan0/file_001.tif")).unwrap(),
            "mouse1/scan0/file_001.tif"
        );
        assert!(matches!(
            relative_posix(root, Path::new("/data/other/file.tif")),
            Err(ScanError::InvalidPath(_))
        ));
    }
}
