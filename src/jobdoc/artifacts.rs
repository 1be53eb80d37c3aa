//! Artifact manifest building and path-safe artifact resolution.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use super::ArtifactManifestEntry;

/// Walk `artifacts_dir` and compute a manifest entry per regular file.
/// Directories never appear as entries; `name`/`path` are the POSIX-style
/// path relative to `artifacts_dir`.
pub async fn build_manifest(artifacts_dir: &Path) -> Result<Vec<ArtifactManifestEntry>> {
    if !artifacts_dir.exists() {
        return Ok(Vec::new());
    }

    let root = artifacts_dir.to_path_buf();
    let created_at = Utc::now();

    // walkdir and sha2 hashing are blocking; run them on a blocking thread so
    // the async worker loop doesn't stall on large artifact trees.
    tokio::task::spawn_blocking(move || walk_and_hash(&root, created_at)).await?
}

fn walk_and_hash(root: &Path, created_at: DateTime<Utc>) -> Result<Vec<ArtifactManifestEntry>> {
    let mut entries = Vec::new();
    for dir_entry in walkdir::WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !dir_entry.file_type().is_file() {
            continue;
        }
        let path = dir_entry.path();
        let relative = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");

        let bytes = std::fs::read(path)?;
        let sha256 = hex::encode(Sha256::digest(&bytes));
        let content_type = mime_guess::from_path(path)
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_string();

        entries.push(ArtifactManifestEntry {
            name: relative.clone(),
            path: relative,
            sha256,
            size_bytes: bytes.len() as u64,
            content_type,
            created_at,
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Resolve `name` against `artifacts_dir`, rejecting any path that escapes
/// the artifacts root (`..` traversal, symlink escape, absolute override).
/// Returns `None` if the resolved path does not exist, is not a regular
/// file, or lies outside the root — all three map to a `404` at the caller.
pub fn resolve_artifact_path(artifacts_dir: &Path, name: &str) -> Option<PathBuf> {
    let candidate = artifacts_dir.join(name);
    let root_abs = std::fs::canonicalize(artifacts_dir).ok()?;
    let candidate_abs = std::fs::canonicalize(&candidate).ok()?;
    if candidate_abs != root_abs && !candidate_abs.starts_with(&root_abs) {
        return None;
    }
    if !candidate_abs.is_file() {
        return None;
    }
    Some(candidate_abs)
}
