//! Persisted index manifest.
//!
//! `.viberag/manifest-v2.json` records the schema version, the serialized
//! Merkle tree, and aggregate counts from the last indexing run. A schema
//! version other than the compile-time [`SCHEMA_VERSION`] makes the index
//! incompatible; malformed JSON is reported as corrupt. Both block reads
//! until a forced rebuild.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::manifest_path;
use crate::error::Result;
use crate::merkle::MerkleTree;
use crate::model::{IndexStats, SCHEMA_VERSION};

/// Aggregate row counts persisted with the manifest.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestCounts {
    pub files: u64,
    pub symbols: u64,
    pub chunks: u64,
    pub refs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: u32,
    /// Monotonic run counter.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub repo_id: String,
    pub revision: String,
    pub merkle: MerkleTree,
    pub counts: ManifestCounts,
    #[serde(default)]
    pub last_stats: Option<IndexStats>,
}

/// Compatibility verdict for a persisted manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestStatus {
    /// No manifest on disk; the repository has never been indexed.
    NotIndexed,
    Compatible(Box<Manifest>),
    /// Present but written by a different schema version.
    NeedsReindex { current: u32 },
    /// Present but unparseable.
    CorruptManifest,
}

/// Load and classify the manifest for a repository.
pub fn load_manifest(repo_root: &Path) -> ManifestStatus {
    let path = manifest_path(repo_root);
    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return ManifestStatus::NotIndexed,
        Err(_) => return ManifestStatus::CorruptManifest,
    };

    // Peek at the schema version first so a version bump that also changed
    // the manifest shape still reports NeedsReindex, not Corrupt.
    let value: serde_json::Value = match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(_) => return ManifestStatus::CorruptManifest,
    };
    let persisted = value
        .get("schemaVersion")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u32;
    if persisted != SCHEMA_VERSION {
        return ManifestStatus::NeedsReindex { current: persisted };
    }

    match serde_json::from_value::<Manifest>(value) {
        Ok(manifest) => ManifestStatus::Compatible(Box::new(manifest)),
        Err(_) => ManifestStatus::CorruptManifest,
    }
}

/// Write a new manifest atomically (write-then-rename).
pub fn save_manifest(repo_root: &Path, manifest: &Manifest) -> Result<()> {
    let path = manifest_path(repo_root);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(manifest)?)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

impl Manifest {
    /// Fresh manifest for the first run.
    pub fn new(repo_id: String, revision: String, merkle: MerkleTree) -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION,
            version: 1,
            created_at: now,
            updated_at: now,
            repo_id,
            revision,
            merkle,
            counts: ManifestCounts::default(),
            last_stats: None,
        }
    }

    /// Next-run manifest carrying forward identity and creation time.
    pub fn advanced(&self, merkle: MerkleTree) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            version: self.version + 1,
            created_at: self.created_at,
            updated_at: Utc::now(),
            repo_id: self.repo_id.clone(),
            revision: self.revision.clone(),
            merkle,
            counts: self.counts,
            last_stats: self.last_stats.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Manifest {
        Manifest::new("repo".to_string(), "rev1".to_string(), MerkleTree::default())
    }

    #[test]
    fn missing_manifest_is_not_indexed() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(load_manifest(tmp.path()), ManifestStatus::NotIndexed);
    }

    #[test]
    fn save_and_load_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let manifest = sample();
        save_manifest(tmp.path(), &manifest).unwrap();

        match load_manifest(tmp.path()) {
            ManifestStatus::Compatible(loaded) => {
                assert_eq!(loaded.schema_version, SCHEMA_VERSION);
                assert_eq!(loaded.repo_id, "repo");
                assert_eq!(loaded.version, 1);
            }
            other => panic!("expected Compatible, got {:?}", other),
        }
    }

    #[test]
    fn old_schema_version_needs_reindex() {
        let tmp = tempfile::tempdir().unwrap();
        let manifest = sample();
        save_manifest(tmp.path(), &manifest).unwrap();

        // Simulate a manifest from the previous schema version.
        let path = manifest_path(tmp.path());
        let content = std::fs::read_to_string(&path).unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&content).unwrap();
        value["schemaVersion"] = serde_json::json!(SCHEMA_VERSION - 1);
        std::fs::write(&path, serde_json::to_vec(&value).unwrap()).unwrap();

        assert_eq!(
            load_manifest(tmp.path()),
            ManifestStatus::NeedsReindex {
                current: SCHEMA_VERSION - 1
            }
        );
    }

    #[test]
    fn malformed_manifest_is_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let path = manifest_path(tmp.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        assert_eq!(load_manifest(tmp.path()), ManifestStatus::CorruptManifest);
    }

    #[test]
    fn advanced_bumps_version_and_keeps_creation() {
        let first = sample();
        let second = first.advanced(MerkleTree::default());
        assert_eq!(second.version, 2);
        assert_eq!(second.created_at, first.created_at);
    }
}
