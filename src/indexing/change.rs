//! Content fingerprints and manifest diffing

use super::walker::{CandidateFile, Discovery};
use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::warn;

/// BLAKE3 digest of file contents
pub struct ContentHasher;

impl ContentHasher {
    /// Hex digest of the file at `path`, or `None` if it cannot be read.
    ///
    /// `None` means "skip this file for this pass and leave its manifest row
    /// alone"; it is never an error for the caller.
    pub fn hash(path: &Path) -> Option<String> {
        let mut file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                warn!("Cannot open {} for hashing: {}", path.display(), e);
                return None;
            }
        };

        let mut hasher = blake3::Hasher::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            match file.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    hasher.update(&buf[..n]);
                }
                Err(e) => {
                    warn!("Failed to read {} while hashing: {}", path.display(), e);
                    return None;
                }
            }
        }
        Some(hasher.finalize().to_hex().to_string())
    }

    pub fn hash_bytes(data: &[u8]) -> String {
        blake3::hash(data).to_hex().to_string()
    }
}

/// Files sorted into incremental-update buckets.
/// Each bucket pairs a candidate with its freshly computed hash.
#[derive(Debug, Default)]
pub struct ChangeSet {
    pub new: Vec<(CandidateFile, String)>,
    pub modified: Vec<(CandidateFile, String)>,
    pub unchanged: Vec<(CandidateFile, String)>,
    /// Manifest paths no longer present among the candidates
    pub deleted: Vec<String>,
    /// Candidates whose hash could not be computed
    pub failed: Vec<CandidateFile>,
    /// Files over the size ceiling; never counted as deleted
    pub oversized: Vec<String>,
}

impl ChangeSet {
    /// New and modified files, in discovery order
    pub fn to_process(&self) -> impl Iterator<Item = &(CandidateFile, String)> {
        self.new.iter().chain(self.modified.iter())
    }

    pub fn has_changes(&self) -> bool {
        !self.new.is_empty() || !self.modified.is_empty() || !self.deleted.is_empty()
    }
}

/// Compares candidate files against the persisted manifest
pub struct ChangeDetector;

impl ChangeDetector {
    /// True iff `path` is missing from the manifest or its hash differs.
    /// An unreadable file counts as changed so it is retried.
    pub fn has_changed(path: &Path, key: &str, manifest: &HashMap<String, String>) -> bool {
        match (manifest.get(key), ContentHasher::hash(path)) {
            (Some(recorded), Some(current)) => *recorded != current,
            _ => true,
        }
    }

    /// Split a discovery pass into new / modified / unchanged / deleted
    /// buckets. Failed and oversized files still count as present, so their
    /// manifest rows survive.
    pub fn diff(discovery: Discovery, manifest: &HashMap<String, String>) -> ChangeSet {
        let mut changes = ChangeSet::default();
        let mut seen: BTreeSet<String> = discovery.oversized.iter().cloned().collect();
        changes.oversized = discovery.oversized;

        for candidate in discovery.candidates {
            seen.insert(candidate.relative.clone());

            let Some(hash) = ContentHasher::hash(&candidate.absolute) else {
                changes.failed.push(candidate);
                continue;
            };

            match manifest.get(&candidate.relative) {
                None => changes.new.push((candidate, hash)),
                Some(recorded) if *recorded != hash => changes.modified.push((candidate, hash)),
                Some(_) => changes.unchanged.push((candidate, hash)),
            }
        }

        let mut deleted: Vec<String> = manifest
            .keys()
            .filter(|path| !seen.contains(*path))
            .cloned()
            .collect();
        deleted.sort();
        changes.deleted = deleted;

        changes
    }
}
