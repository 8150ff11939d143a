//! JSON document persistence.
//!
//! Documents are written atomically (tmp + rename) so a crash mid-write can
//! never leave a truncated registry file behind.

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Load a document, returning `T::default()` when the file does not exist.
pub fn load_document<T>(path: &Path) -> anyhow::Result<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        return Ok(T::default());
    }
    let bytes =
        fs::read(path).with_context(|| format!("Failed to read document: {}", path.display()))?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse document: {}", path.display()))
}

/// Write a document atomically.
pub fn write_document<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("Document path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory: {}", parent.display()))?;

    let mut bytes = serde_json::to_vec_pretty(value).context("Failed to serialize document")?;
    bytes.push(b'\n');

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp_path = parent.join(format!(".{}.{}.tmp", file_name, std::process::id()));

    fs::write(&tmp_path, &bytes)
        .with_context(|| format!("Failed to write tmp document: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to rename tmp document: {}", tmp_path.display()))?;

    debug!(path = %path.display(), bytes = bytes.len(), "wrote document");
    Ok(())
}

/// Remove a document if present.
pub fn remove_document(path: &Path) -> anyhow::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => {
            Err(err).with_context(|| format!("Failed to remove document: {}", path.display()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn missing_document_loads_default() {
        let temp = TempDir::new().unwrap();
        let loaded: BTreeMap<String, u64> = load_document(&temp.path().join("none.json")).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn write_leaves_no_tmp_files() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("doc.json");
        let mut doc = BTreeMap::new();
        doc.insert("a".to_string(), 1u64);

        write_document(&path, &doc).unwrap();

        let loaded: BTreeMap<String, u64> = load_document(&path).unwrap();
        assert_eq!(loaded, doc);
        let entries: Vec<_> = fs::read_dir(path.parent().unwrap()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
