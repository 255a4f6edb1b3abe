//! Per-file cache entries keyed by a BLAKE3 hash of the file path
//!
//! Each indexed file owns two entries: its chunk list (zstd-compressed JSON)
//! and its vector matrix (raw little-endian f32 with a small header). Both
//! are written to a temporary file and renamed into place.

use crate::chunking::Chunk;
use crate::error::{Result, SiftError};
use ndarray::Array2;
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Header of a vector entry
const VECTOR_MAGIC: &[u8; 4] = b"DSV1";

const ZSTD_LEVEL: i32 = 3;

/// The two entry families stored per file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Docs,
    Vectors,
}

impl EntryKind {
    fn dir_name(self) -> &'static str {
        match self {
            EntryKind::Docs => "docs",
            EntryKind::Vectors => "vectors",
        }
    }
}

/// Sharded on-disk store of per-file chunk and vector entries
pub struct EntryStore {
    base_path: PathBuf,
}

impl EntryStore {
    /// Create a store rooted at `<base_path>/entries`
    pub fn new(base_path: PathBuf) -> Result<Self> {
        for kind in [EntryKind::Docs, EntryKind::Vectors] {
            let dir = base_path.join("entries").join(kind.dir_name());
            fs::create_dir_all(&dir).map_err(|e| {
                SiftError::io(e, format!("Failed to create entry directory: {}", dir.display()))
            })?;
        }
        Ok(Self { base_path })
    }

    /// Entry key for a manifest path
    pub fn key_for(path: &str) -> String {
        let hash = blake3::hash(path.as_bytes());
        // 32 hex characters (16 bytes) is plenty for per-corpus uniqueness
        format!("{:.32}", hash.to_hex())
    }

    pub fn write_chunks(&self, key: &str, chunks: &[Chunk]) -> Result<()> {
        let json = serde_json::to_vec(chunks)
            .map_err(|e| SiftError::json(e, format!("Failed to serialize chunks for {}", key)))?;
        let compressed = zstd::encode_all(&json[..], ZSTD_LEVEL)
            .map_err(|e| SiftError::io(e, "Failed to compress chunk entry"))?;
        self.write_atomic(&self.entry_path(EntryKind::Docs, key), &compressed)
    }

    /// Chunks stored under `key`, `None` if absent
    pub fn read_chunks(&self, key: &str) -> Result<Option<Vec<Chunk>>> {
        let Some(bytes) = self.read(EntryKind::Docs, key)? else {
            return Ok(None);
        };
        let json = zstd::decode_all(&bytes[..])
            .map_err(|e| SiftError::io(e, format!("Corrupt chunk entry {}", key)))?;
        let chunks = serde_json::from_slice(&json)
            .map_err(|e| SiftError::json(e, format!("Corrupt chunk entry {}", key)))?;
        Ok(Some(chunks))
    }

    pub fn write_vectors(&self, key: &str, vectors: &Array2<f32>) -> Result<()> {
        let (rows, dims) = vectors.dim();
        let mut bytes = Vec::with_capacity(12 + rows * dims * 4);
        bytes.extend_from_slice(VECTOR_MAGIC);
        bytes.extend_from_slice(&(rows as u32).to_le_bytes());
        bytes.extend_from_slice(&(dims as u32).to_le_bytes());
        for value in vectors.iter() {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        self.write_atomic(&self.entry_path(EntryKind::Vectors, key), &bytes)
    }

    /// Vector matrix stored under `key`, `None` if absent
    pub fn read_vectors(&self, key: &str) -> Result<Option<Array2<f32>>> {
        let Some(bytes) = self.read(EntryKind::Vectors, key)? else {
            return Ok(None);
        };
        decode_matrix(&bytes).map(Some).ok_or_else(|| {
            SiftError::Cache(format!("Corrupt vector entry {}", key))
        })
    }

    pub fn exists(&self, kind: EntryKind, key: &str) -> bool {
        self.entry_path(kind, key).exists()
    }

    /// Remove both entries for `key`
    pub fn remove(&self, key: &str) -> Result<()> {
        for kind in [EntryKind::Docs, EntryKind::Vectors] {
            let path = self.entry_path(kind, key);
            if path.exists() {
                fs::remove_file(&path).map_err(|e| {
                    SiftError::io(e, format!("Failed to delete entry: {}", path.display()))
                })?;
            }
        }
        Ok(())
    }

    /// Delete entries whose key is not in `referenced`
    pub fn gc(&self, referenced: &HashSet<String>) -> Result<GcStats> {
        let mut stats = GcStats::default();

        for kind in [EntryKind::Docs, EntryKind::Vectors] {
            self.walk_entries(kind, |name, path| {
                // Leftovers of an interrupted write
                if name.ends_with(".tmp") {
                    if let Ok(metadata) = fs::metadata(path) {
                        stats.freed_bytes += metadata.len();
                    }
                    if fs::remove_file(path).is_ok() {
                        stats.partial_writes_removed += 1;
                    }
                    return Ok(());
                }

                stats.total_entries += 1;
                if !referenced.contains(name) {
                    if let Ok(metadata) = fs::metadata(path) {
                        stats.freed_bytes += metadata.len();
                    }
                    if fs::remove_file(path).is_ok() {
                        stats.deleted_entries += 1;
                    }
                }
                Ok(())
            })?;
        }

        Ok(stats)
    }

    /// Total bytes held by entries
    pub fn disk_usage(&self) -> Result<u64> {
        let mut total = 0u64;
        for kind in [EntryKind::Docs, EntryKind::Vectors] {
            self.walk_entries(kind, |_, path| {
                if let Ok(metadata) = fs::metadata(path) {
                    total += metadata.len();
                }
                Ok(())
            })?;
        }
        Ok(total)
    }

    /// Two-level sharding: entries/<kind>/ab/cd/abcdef...
    fn entry_path(&self, kind: EntryKind, key: &str) -> PathBuf {
        let (shard1, shard2) = shards(key);
        self.base_path
            .join("entries")
            .join(kind.dir_name())
            .join(shard1)
            .join(shard2)
            .join(key)
    }

    fn read(&self, kind: EntryKind, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.entry_path(kind, key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SiftError::io(
                e,
                format!("Failed to read entry: {}", path.display()),
            )),
        }
    }

    fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| SiftError::Cache(format!("Invalid entry path: {}", path.display())))?;
        fs::create_dir_all(parent).map_err(|e| {
            SiftError::io(e, format!("Failed to create parent directory: {}", parent.display()))
        })?;

        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).map_err(|e| {
            SiftError::io(e, format!("Failed to create temp entry: {}", temp_path.display()))
        })?;
        file.write_all(data).map_err(|e| {
            SiftError::io(e, format!("Failed to write entry: {}", temp_path.display()))
        })?;
        file.sync_all().map_err(|e| {
            SiftError::io(e, format!("Failed to sync entry: {}", temp_path.display()))
        })?;
        drop(file);

        fs::rename(&temp_path, path).map_err(|e| {
            SiftError::io(
                e,
                format!(
                    "Failed to move entry into place: {} -> {}",
                    temp_path.display(),
                    path.display()
                ),
            )
        })
    }

    fn walk_entries<F>(&self, kind: EntryKind, mut callback: F) -> Result<()>
    where
        F: FnMut(&str, &Path) -> Result<()>,
    {
        let root = self.base_path.join("entries").join(kind.dir_name());
        if !root.exists() {
            return Ok(());
        }

        for shard1 in read_dir(&root)? {
            if !shard1.is_dir() {
                continue;
            }
            for shard2 in read_dir(&shard1)? {
                if !shard2.is_dir() {
                    continue;
                }
                for path in read_dir(&shard2)? {
                    if !path.is_file() {
                        continue;
                    }
                    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                        callback(name, &path)?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn shards(key: &str) -> (&str, &str) {
    match (key.get(0..2), key.get(2..4)) {
        (Some(a), Some(b)) => (a, b),
        _ => ("__", "__"),
    }
}

fn read_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir)
        .map_err(|e| SiftError::io(e, format!("Failed to read directory: {}", dir.display())))?;
    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| SiftError::io(e, "Failed to read directory entry"))?;
        paths.push(entry.path());
    }
    Ok(paths)
}

fn decode_matrix(bytes: &[u8]) -> Option<Array2<f32>> {
    if bytes.len() < 12 || &bytes[0..4] != VECTOR_MAGIC {
        return None;
    }
    let rows = u32::from_le_bytes(bytes[4..8].try_into().ok()?) as usize;
    let dims = u32::from_le_bytes(bytes[8..12].try_into().ok()?) as usize;
    let body = &bytes[12..];
    if body.len() != rows.checked_mul(dims)?.checked_mul(4)? {
        return None;
    }
    let values: Vec<f32> = body
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Array2::from_shape_vec((rows, dims), values).ok()
}

/// Statistics from garbage collection
#[derive(Debug, Default)]
pub struct GcStats {
    pub total_entries: usize,
    pub deleted_entries: usize,
    /// `*.tmp` files left by interrupted writes
    pub partial_writes_removed: usize,
    pub freed_bytes: u64,
}
