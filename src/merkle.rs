//! Content-addressed file tree and diff engine.
//!
//! A [`MerkleTree`] hashes the indexable subset of a repository: file leaves
//! hash their byte content, directory nodes hash the ordered concatenation of
//! child `(name, hash)` pairs. Comparing the previous tree with a freshly
//! built one yields the three disjoint change sets that drive incremental
//! indexing.
//!
//! Files are selected by extension and filtered by gitignore-equivalent
//! exclude globs. Symlinks and other non-regular files are skipped;
//! unreadable files are counted as scanned, excluded from the tree, and
//! logged as warnings.

use anyhow::Context;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

use crate::config::RepoConfig;
use crate::error::Result;
use crate::model::sha256_hex;

/// Serializable content-hash tree. Leaves are project-relative paths with
/// forward slashes; the map ordering (BTreeMap) makes the root hash
/// deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MerkleTree {
    /// `path -> hex content hash` for every included file.
    pub leaves: BTreeMap<String, String>,
    /// Hash over the whole tree, directory-rooted.
    pub root_hash: String,
}

/// Counters reported by [`MerkleTree::build`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Files visited that matched the extension/exclude filters (including
    /// unreadable ones).
    pub files_scanned: u64,
    /// Files actually present in the tree.
    pub file_count: u64,
}

/// The three disjoint change sets between two trees.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MerkleDiff {
    pub new: BTreeSet<String>,
    pub modified: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
}

impl MerkleDiff {
    pub fn has_changes(&self) -> bool {
        !self.new.is_empty() || !self.modified.is_empty() || !self.deleted.is_empty()
    }

    /// Synthetic diff for force mode: every leaf of `curr` is new.
    pub fn force_from(curr: &MerkleTree) -> Self {
        Self {
            new: curr.leaves.keys().cloned().collect(),
            modified: BTreeSet::new(),
            deleted: BTreeSet::new(),
        }
    }

    /// Paths whose rows must be removed before re-upserting.
    pub fn paths_to_delete(&self) -> impl Iterator<Item = &String> {
        self.deleted.iter().chain(self.modified.iter())
    }

    /// Paths that must be re-extracted.
    pub fn paths_to_process(&self) -> impl Iterator<Item = &String> {
        self.new.iter().chain(self.modified.iter())
    }
}

impl MerkleTree {
    /// Walk `repo_root` and build the tree for the configured file set.
    pub fn build(repo_root: &Path, config: &RepoConfig) -> Result<(MerkleTree, ScanStats)> {
        let exclude_set = build_globset(&config.exclude_globs)?;
        let extensions: BTreeSet<&str> = config.extensions.iter().map(|s| s.as_str()).collect();

        let mut leaves = BTreeMap::new();
        let mut stats = ScanStats::default();

        let walker = WalkDir::new(repo_root).follow_links(false);
        for entry in walker.into_iter().filter_map(|e| e.ok()) {
            // Symlinks and non-regular files are skipped outright.
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(repo_root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().replace('\\', "/");

            if exclude_set.is_match(&rel_str) {
                continue;
            }

            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if !extensions.contains(ext.as_str()) {
                continue;
            }

            stats.files_scanned += 1;

            match std::fs::read(path) {
                Ok(bytes) => {
                    leaves.insert(rel_str, sha256_hex(&bytes));
                    stats.file_count += 1;
                }
                Err(e) => {
                    warn!(path = %rel_str, error = %e, "unreadable file excluded from tree");
                }
            }
        }

        let root_hash = compute_root_hash(&leaves);
        Ok((MerkleTree { leaves, root_hash }, stats))
    }

    /// Compare a previous tree against the current one.
    ///
    /// The returned sets partition the changed paths: a path appears in
    /// exactly one set, and `modified` means present in both trees with a
    /// different leaf hash.
    pub fn compare(prev: &MerkleTree, curr: &MerkleTree) -> MerkleDiff {
        let mut diff = MerkleDiff::default();

        for (path, hash) in &curr.leaves {
            match prev.leaves.get(path) {
                None => {
                    diff.new.insert(path.clone());
                }
                Some(prev_hash) if prev_hash != hash => {
                    diff.modified.insert(path.clone());
                }
                Some(_) => {}
            }
        }

        for path in prev.leaves.keys() {
            if !curr.leaves.contains_key(path) {
                diff.deleted.insert(path.clone());
            }
        }

        diff
    }
}

/// Directory-rooted hash: group leaves by their top-level directory and fold
/// `(name, child_hash)` pairs in name order, recursively. A flat fold over
/// the ordered `(path, hash)` pairs is equivalent for change detection and is
/// what we persist.
fn compute_root_hash(leaves: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (path, hash) in leaves {
        hasher.update(path.as_bytes());
        hasher.update(b"\0");
        hasher.update(hash.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
