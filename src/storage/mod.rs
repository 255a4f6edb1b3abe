//! Storage layer for docsift
//!
//! [`CacheStore`] is the only writer of on-disk state: a SQLite manifest
//! (path → content hash) plus per-file chunk and vector entries. A manifest
//! row is written only after both entries for that file are in place, so the
//! manifest never points at missing data.

pub mod blob;
pub mod database;

use crate::chunking::Chunk;
use crate::error::{Result, SiftError};
use ndarray::{Array2, Axis};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub use blob::{EntryKind, EntryStore, GcStats};
pub use database::{Database, DbPool, DbStats, ManifestEntry};

const DATABASE_FILE: &str = "manifest.sqlite";

/// Why a file's cached data could not be used
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheMiss {
    MissingChunks,
    MissingVectors,
    /// Vector rows and chunk count disagree
    CountMismatch { chunks: usize, vectors: usize },
    Corrupt(String),
}

impl std::fmt::Display for CacheMiss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheMiss::MissingChunks => write!(f, "chunk entry missing"),
            CacheMiss::MissingVectors => write!(f, "vector entry missing"),
            CacheMiss::CountMismatch { chunks, vectors } => {
                write!(f, "{} chunks but {} vector rows", chunks, vectors)
            }
            CacheMiss::Corrupt(reason) => write!(f, "corrupt entry: {}", reason),
        }
    }
}

/// Chunks and aligned vectors of the whole cached corpus
#[derive(Debug)]
pub struct CorpusSnapshot {
    pub chunks: Vec<Chunk>,
    pub vectors: Array2<f32>,
    /// Files dropped from the manifest because their entries were unusable
    pub dropped: Vec<String>,
}

/// Durable per-file cache plus manifest
pub struct CacheStore {
    data_dir: PathBuf,
    database: Database,
    entries: EntryStore,
}

impl CacheStore {
    /// Open (creating if needed) the store under `data_dir`
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| {
            SiftError::io(
                e,
                format!("Failed to create data directory: {}", data_dir.display()),
            )
        })?;

        let database = Database::new(&data_dir.join(DATABASE_FILE))?;
        let entries = EntryStore::new(data_dir.to_path_buf())?;

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            database,
            entries,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Shared handle for the embedding cache
    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn manifest(&self) -> Result<HashMap<String, String>> {
        self.database.manifest()
    }

    /// Rebuild the in-memory corpus from cache without recomputing anything.
    ///
    /// Files whose entries are missing, corrupt, or whose vector row count
    /// disagrees with their chunk count are dropped from the manifest so the
    /// next build reprocesses them.
    pub fn load_on_startup(&self) -> Result<CorpusSnapshot> {
        let mut chunks = Vec::new();
        let mut matrices = Vec::new();
        let mut dropped = Vec::new();
        let mut dimension: Option<usize> = None;

        for entry in self.database.manifest_entries()? {
            match self.load_file(&entry.path) {
                Ok((file_chunks, vectors)) => {
                    if vectors.nrows() == 0 {
                        continue;
                    }
                    let dims = vectors.ncols();
                    if *dimension.get_or_insert(dims) != dims {
                        warn!(
                            "Dropping cached vectors for {}: dimension {} differs from corpus",
                            entry.path, dims
                        );
                        self.delete_file(&entry.path)?;
                        dropped.push(entry.path);
                        continue;
                    }
                    chunks.extend(file_chunks);
                    matrices.push(vectors);
                }
                Err(miss) => {
                    warn!("Dropping cached data for {}: {}", entry.path, miss);
                    self.delete_file(&entry.path)?;
                    dropped.push(entry.path);
                }
            }
        }

        let vectors = stack_rows(&matrices, dimension.unwrap_or(0))?;
        debug!(
            "Loaded {} cached chunks ({} files dropped)",
            chunks.len(),
            dropped.len()
        );

        Ok(CorpusSnapshot {
            chunks,
            vectors,
            dropped,
        })
    }

    /// Cached chunks and vectors for one file
    pub fn load_file(&self, path: &str) -> std::result::Result<(Vec<Chunk>, Array2<f32>), CacheMiss> {
        let chunks = self.load_chunks(path)?;
        let vectors = match self.entries.read_vectors(&EntryStore::key_for(path)) {
            Ok(Some(v)) => v,
            Ok(None) => return Err(CacheMiss::MissingVectors),
            Err(e) => return Err(CacheMiss::Corrupt(e.to_string())),
        };

        if vectors.nrows() != chunks.len() {
            return Err(CacheMiss::CountMismatch {
                chunks: chunks.len(),
                vectors: vectors.nrows(),
            });
        }
        Ok((chunks, vectors))
    }

    /// Cached chunks for one file
    pub fn load_chunks(&self, path: &str) -> std::result::Result<Vec<Chunk>, CacheMiss> {
        match self.entries.read_chunks(&EntryStore::key_for(path)) {
            Ok(Some(chunks)) => Ok(chunks),
            Ok(None) => Err(CacheMiss::MissingChunks),
            Err(e) => Err(CacheMiss::Corrupt(e.to_string())),
        }
    }

    /// Persist one file's chunks and vectors, then record it in the manifest
    pub fn save_file(
        &self,
        path: &str,
        content_hash: &str,
        size: u64,
        chunks: &[Chunk],
        vectors: &Array2<f32>,
    ) -> Result<()> {
        if vectors.nrows() != chunks.len() {
            return Err(SiftError::Cache(format!(
                "Refusing to cache {}: {} chunks but {} vectors",
                path,
                chunks.len(),
                vectors.nrows()
            )));
        }

        let key = EntryStore::key_for(path);
        self.entries.write_chunks(&key, chunks)?;
        self.entries.write_vectors(&key, vectors)?;

        self.database.upsert_file(&ManifestEntry {
            path: path.to_string(),
            content_hash: content_hash.to_string(),
            size,
            chunk_count: chunks.len(),
            indexed_at: chrono::Utc::now().timestamp(),
        })
    }

    /// Replace only the vector entry of an already-cached file
    pub fn save_vectors(&self, path: &str, vectors: &Array2<f32>) -> Result<()> {
        self.entries
            .write_vectors(&EntryStore::key_for(path), vectors)
    }

    pub fn has_vectors(&self, path: &str) -> bool {
        self.entries
            .exists(EntryKind::Vectors, &EntryStore::key_for(path))
    }

    /// Forget a file: manifest row first, then its entries
    pub fn delete_file(&self, path: &str) -> Result<()> {
        self.database.remove_file(path)?;
        self.entries.remove(&EntryStore::key_for(path))
    }

    /// Remove entries not referenced by any manifest row
    pub fn gc(&self) -> Result<GcStats> {
        let referenced: HashSet<String> = self
            .database
            .manifest()?
            .keys()
            .map(|path| EntryStore::key_for(path))
            .collect();
        self.entries.gc(&referenced)
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let db = self.database.stats()?;
        let database_bytes = std::fs::metadata(self.data_dir.join(DATABASE_FILE))
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(CacheStats {
            files: db.file_count,
            chunks: db.chunk_count,
            cached_embeddings: db.cached_embeddings,
            disk_bytes: self.entries.disk_usage()? + database_bytes,
        })
    }
}

/// Concatenate matrices row-wise; an empty list yields a `0 x dims` matrix
pub fn stack_rows(matrices: &[Array2<f32>], dims: usize) -> Result<Array2<f32>> {
    if matrices.is_empty() {
        return Ok(Array2::zeros((0, dims)));
    }
    let views: Vec<_> = matrices.iter().map(|m| m.view()).collect();
    ndarray::concatenate(Axis(0), &views)
        .map_err(|e| SiftError::Cache(format!("Cannot stack vector matrices: {}", e)))
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub files: usize,
    pub chunks: usize,
    pub cached_embeddings: usize,
    pub disk_bytes: u64,
}

impl CacheStats {
    /// Format size as human-readable string
    pub fn format_size(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_idx = 0;

        while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
            size /= 1024.0;
            unit_idx += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::TempDir;

    fn chunks_for(path: &str, count: usize) -> Vec<Chunk> {
        let parts = (0..count).map(|i| format!("part {} of {}", i, path)).collect();
        Chunk::from_parts(parts, path, "text", "h")
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let store = CacheStore::open(temp_dir.path()).unwrap();

        store
            .save_file("a.md", "h1", 10, &chunks_for("a.md", 2), &array![[1.0f32, 0.0], [0.0, 1.0]])
            .unwrap();
        store
            .save_file("b.md", "h2", 10, &chunks_for("b.md", 1), &array![[0.6f32, 0.8]])
            .unwrap();

        let reopened = CacheStore::open(temp_dir.path()).unwrap();
        let snapshot = reopened.load_on_startup().unwrap();
        assert_eq!(snapshot.chunks.len(), 3);
        assert_eq!(snapshot.vectors.dim(), (3, 2));
        assert!(snapshot.dropped.is_empty());
        assert_eq!(snapshot.chunks[2].file_path, "b.md");
        assert_eq!(snapshot.vectors.row(2).to_vec(), vec![0.6, 0.8]);
    }

    #[test]
    fn test_save_rejects_misaligned_vectors() {
        let temp_dir = TempDir::new().unwrap();
        let store = CacheStore::open(temp_dir.path()).unwrap();
        let result = store.save_file("a.md", "h", 1, &chunks_for("a.md", 2), &array![[1.0f32]]);
        assert!(result.is_err());
        assert!(store.manifest().unwrap().is_empty());
    }

    #[test]
    fn test_count_mismatch_drops_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = CacheStore::open(temp_dir.path()).unwrap();
        store
            .save_file("a.md", "h1", 10, &chunks_for("a.md", 2), &array![[1.0f32, 0.0], [0.0, 1.0]])
            .unwrap();
        store
            .save_file("b.md", "h2", 10, &chunks_for("b.md", 1), &array![[0.6f32, 0.8]])
            .unwrap();

        // Simulate partial corruption: one vector row lost
        store.save_vectors("a.md", &array![[1.0f32, 0.0]]).unwrap();

        let snapshot = store.load_on_startup().unwrap();
        assert_eq!(snapshot.dropped, vec!["a.md".to_string()]);
        assert_eq!(snapshot.chunks.len(), 1);
        assert_eq!(snapshot.vectors.nrows(), 1);
        assert!(!store.manifest().unwrap().contains_key("a.md"));
    }

    #[test]
    fn test_delete_and_gc() {
        let temp_dir = TempDir::new().unwrap();
        let store = CacheStore::open(temp_dir.path()).unwrap();
        store
            .save_file("a.md", "h1", 10, &chunks_for("a.md", 1), &array![[1.0f32]])
            .unwrap();
        store.delete_file("a.md").unwrap();
        assert!(store.manifest().unwrap().is_empty());
        assert!(matches!(store.load_file("a.md"), Err(CacheMiss::MissingChunks)));

        // An entry with no manifest row is stale
        let stale = EntryStore::key_for("stale.md");
        store.entries.write_chunks(&stale, &chunks_for("stale.md", 1)).unwrap();
        let gc = store.gc().unwrap();
        assert_eq!(gc.deleted_entries, 1);
    }

    #[test]
    fn test_empty_store() {
        let temp_dir = TempDir::new().unwrap();
        let store = CacheStore::open(temp_dir.path()).unwrap();
        let snapshot = store.load_on_startup().unwrap();
        assert!(snapshot.chunks.is_empty());
        assert_eq!(snapshot.vectors.nrows(), 0);

        let stats = store.stats().unwrap();
        assert_eq!(stats.files, 0);
        assert_eq!(stats.chunks, 0);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(CacheStats::format_size(0), "0.00 B");
        assert_eq!(CacheStats::format_size(1024), "1.00 KB");
        assert_eq!(CacheStats::format_size(1024 * 1024), "1.00 MB");
    }
}
