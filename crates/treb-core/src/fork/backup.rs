//! Registry backups paired with chain snapshots.
//!
//! A backup directory holds a copy of each registry document that existed
//! when it was taken. A document missing from the backup did not exist, and
//! restoring removes it.

use std::fs;
use std::path::Path;

use anyhow::Context;
use tracing::debug;

use crate::error::Result;
use crate::registry::REGISTRY_DOCUMENTS;

/// Digest of the registry documents present in `dir`.
///
/// Format: `blake3(name || 0x00 || content)` over documents in fixed order.
pub fn digest_documents(dir: &Path) -> anyhow::Result<String> {
    let mut hasher = blake3::Hasher::new();
    for name in REGISTRY_DOCUMENTS {
        let path = dir.join(name);
        if !path.is_file() {
            continue;
        }
        let content =
            fs::read(&path).with_context(|| format!("Failed to read file: {}", path.display()))?;
        hasher.update(name.as_bytes());
        hasher.update(&[0x00]);
        hasher.update(&content);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Copy the registry documents from `state_dir` into a fresh `backup_dir`.
/// Returns the digest of the backup.
pub fn backup_registry(state_dir: &Path, backup_dir: &Path) -> Result<String> {
    if backup_dir.exists() {
        fs::remove_dir_all(backup_dir).with_context(|| {
            format!("Failed to clear backup directory: {}", backup_dir.display())
        })?;
    }
    fs::create_dir_all(backup_dir)
        .with_context(|| format!("Failed to create backup directory: {}", backup_dir.display()))?;

    for name in REGISTRY_DOCUMENTS {
        let source = state_dir.join(name);
        if source.is_file() {
            fs::copy(&source, backup_dir.join(name))
                .with_context(|| format!("Failed to back up {}", source.display()))?;
        }
    }

    let digest = digest_documents(backup_dir)?;
    debug!(backup = %backup_dir.display(), %digest, "backed up registry");
    Ok(digest)
}

/// Put the registry back to the state held in `backup_dir`.
///
/// The backup is verified against `expected_digest` before anything is
/// touched.
pub fn restore_registry(state_dir: &Path, backup_dir: &Path, expected_digest: &str) -> Result<()> {
    if !backup_dir.is_dir() {
        return Err(anyhow::anyhow!(
            "Snapshot backup is missing: {}",
            backup_dir.display()
        )
        .into());
    }
    let actual = digest_documents(backup_dir)?;
    if actual != expected_digest {
        return Err(anyhow::anyhow!(
            "Snapshot backup {} is corrupt (digest {}, expected {})",
            backup_dir.display(),
            actual,
            expected_digest
        )
        .into());
    }

    fs::create_dir_all(state_dir)
        .with_context(|| format!("Failed to create directory: {}", state_dir.display()))?;
    for name in REGISTRY_DOCUMENTS {
        let saved = backup_dir.join(name);
        let target = state_dir.join(name);
        if saved.is_file() {
            let tmp = state_dir.join(format!(".{}.{}.restore", name, std::process::id()));
            fs::copy(&saved, &tmp)
                .with_context(|| format!("Failed to stage {}", saved.display()))?;
            fs::rename(&tmp, &target)
                .with_context(|| format!("Failed to restore {}", target.display()))?;
        } else if target.exists() {
            fs::remove_file(&target)
                .with_context(|| format!("Failed to remove {}", target.display()))?;
        }
    }

    debug!(backup = %backup_dir.display(), "restored registry");
    Ok(())
}
