//! Filesystem helpers for run records and generator artifacts

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Encode an arbitrary identifier into a single path component.
///
/// ASCII alphanumerics, `-` and `_` pass through; every other byte becomes
/// `%XX`, so distinct identifiers never map to the same file name. The empty
/// identifier becomes a lone `%`, which no other encoding produces.
pub fn file_safe(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    if out.is_empty() {
        out.push('%');
    }
    out
}

/// Remove every regular file in `dir` whose name starts with `prefix`.
///
/// The character after the prefix, if any, must not be alphanumeric, so
/// `report.7` matches `report.7_stats.csv` but not `report.70_stats.csv`.
/// Returns the removed paths. Individual failures are logged and skipped.
pub fn remove_with_prefix(dir: &Path, prefix: &str) -> io::Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    if prefix.is_empty() {
        return Ok(removed);
    }

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(removed),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let entry = entry?;
        let matches = entry
            .file_name()
            .to_str()
            .map(|name| has_prefix(name, prefix))
            .unwrap_or(false);
        if !matches || !entry.file_type()?.is_file() {
            continue;
        }

        let path = entry.path();
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed artifact {}", path.display());
                removed.push(path);
            }
            Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
        }
    }

    Ok(removed)
}

fn has_prefix(name: &str, prefix: &str) -> bool {
    match name.strip_prefix(prefix) {
        Some(rest) => rest
            .chars()
            .next()
            .map_or(true, |c| !c.is_ascii_alphanumeric()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_safe() {
        assert_eq!(file_safe("run-A_1"), "run-A_1");
        assert_eq!(file_safe("a/b"), "a%2Fb");
        assert_eq!(file_safe("a.b"), "a%2Eb");
        assert_ne!(file_safe("a/b"), file_safe("a_b"));
        assert_eq!(file_safe(""), "%");
        assert_eq!(file_safe("\0"), "%00");
        assert_ne!(file_safe(""), file_safe("\0"));
    }

    #[test]
    fn test_remove_with_prefix() {
        let dir = tempdir().unwrap();
        for name in ["res.7_stats.csv", "res.7_failures.csv", "res.70_stats.csv", "other.csv"] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }
        std::fs::create_dir(dir.path().join("res.7_dir")).unwrap();

        let removed = remove_with_prefix(dir.path(), "res.7").unwrap();
        assert_eq!(removed.len(), 2);
        assert!(dir.path().join("res.70_stats.csv").exists());
        assert!(dir.path().join("other.csv").exists());
        assert!(dir.path().join("res.7_dir").exists());
    }

    #[test]
    fn test_remove_with_prefix_missing_dir() {
        let dir = tempdir().unwrap();
        let removed = remove_with_prefix(&dir.path().join("gone"), "x").unwrap();
        assert!(removed.is_empty());
    }
}
