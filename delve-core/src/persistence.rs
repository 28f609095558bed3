//! Atomic file output for reports and research outcomes.
//!
//! Every artifact is written to a hidden temporary sibling first and then
//! renamed over the target, so a crash never leaves a half-written report.

use std::io;
use std::path::{Path, PathBuf};

/// Temporary sibling used while writing `path`: `dir/.name.tmp`.
fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    path.with_file_name(format!(".{name}.tmp"))
}

/// Atomically write raw bytes to a file, creating parent directories.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = temp_sibling(path);
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)
}

/// Atomically write a value as pretty-printed JSON.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let json = serde_json::to_string_pretty(data).map_err(io::Error::other)?;
    atomic_write(path, json.as_bytes())
}

/// Load and deserialize JSON from a file. Missing files yield `Ok(None)`.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    serde_json::from_str(&data)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::model::Finding;
    use tempfile::TempDir;

    #[test]
    fn test_write_report_markdown() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("output.md");

        atomic_write(&path, b"# Report\n\nBody").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# Report\n\nBody");
        assert!(!dir.path().join(".output.md.tmp").exists());
    }

    #[test]
    fn test_write_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reports").join("2024").join("output.md");
        atomic_write(&path, b"x").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_json_findings_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("findings.json");
        let findings = vec![Finding::new("Gutenberg used movable type", 0.9)];

        atomic_write_json(&path, &findings).unwrap();
        let loaded: Option<Vec<Finding>> = load_json(&path).unwrap();
        assert_eq!(loaded, Some(findings));
    }

    #[test]
    fn test_load_json_nonexistent() {
        let result: io::Result<Option<Vec<Finding>>> =
            load_json(Path::new("/nonexistent/findings.json"));
        assert!(result.unwrap().is_none());
    }

    #[test]
    fn test_load_json_invalid_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "not json").unwrap();
        let err = load_json::<Vec<Finding>>(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
