//! SQLite database management with migrations
//!
//! Holds the manifest (path → content hash, one row per indexed file) and the
//! persistent embedding cache.

use crate::error::{Result, SiftError};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// One manifest row
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    pub path: String,
    pub content_hash: String,
    pub size: u64,
    pub chunk_count: usize,
    /// Unix seconds
    pub indexed_at: i64,
}

/// Database manager with migration support
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Open (creating if needed) the database at `db_path`
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SiftError::io(e, format!("Failed to create database directory: {:?}", parent))
            })?;
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA busy_timeout = 5000;
                ",
            )
        });

        let pool = Pool::builder()
            .max_size(4)
            .build(manager)?;

        let db = Self { pool };
        db.migrate()?;
        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )?;

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::debug!("Applying migration {}", version);
                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Path → content hash for every indexed file
    pub fn manifest(&self) -> Result<HashMap<String, String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT path, content_hash FROM files")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut manifest = HashMap::new();
        for row in rows {
            let (path, hash): (String, String) = row?;
            manifest.insert(path, hash);
        }
        Ok(manifest)
    }

    /// Manifest rows ordered by path
    pub fn manifest_entries(&self) -> Result<Vec<ManifestEntry>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT path, content_hash, size, chunk_count, indexed_at FROM files ORDER BY path",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ManifestEntry {
                path: row.get(0)?,
                content_hash: row.get(1)?,
                size: row.get::<_, i64>(2)? as u64,
                chunk_count: row.get::<_, i64>(3)? as usize,
                indexed_at: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn manifest_entry(&self, path: &str) -> Result<Option<ManifestEntry>> {
        let conn = self.get_conn()?;
        let entry = conn
            .query_row(
                "SELECT path, content_hash, size, chunk_count, indexed_at FROM files WHERE path = ?1",
                params![path],
                |row| {
                    Ok(ManifestEntry {
                        path: row.get(0)?,
                        content_hash: row.get(1)?,
                        size: row.get::<_, i64>(2)? as u64,
                        chunk_count: row.get::<_, i64>(3)? as usize,
                        indexed_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    pub fn upsert_file(&self, entry: &ManifestEntry) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO files (path, content_hash, size, chunk_count, indexed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(path) DO UPDATE SET
                content_hash = excluded.content_hash,
                size = excluded.size,
                chunk_count = excluded.chunk_count,
                indexed_at = excluded.indexed_at",
            params![
                entry.path,
                entry.content_hash,
                entry.size as i64,
                entry.chunk_count as i64,
                entry.indexed_at
            ],
        )?;
        Ok(())
    }

    /// Remove a manifest row; returns whether one existed
    pub fn remove_file(&self, path: &str) -> Result<bool> {
        let conn = self.get_conn()?;
        let removed = conn.execute("DELETE FROM files WHERE path = ?1", params![path])?;
        Ok(removed > 0)
    }

    /// Cached vectors for the keys that are present
    pub fn cached_embeddings(&self, keys: &[String]) -> Result<HashMap<String, Vec<f32>>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare_cached("SELECT vector FROM embedding_cache WHERE key = ?1")?;

        let mut found = HashMap::new();
        for key in keys {
            let blob: Option<Vec<u8>> = stmt
                .query_row(params![key], |row| row.get(0))
                .optional()?;
            if let Some(vector) = blob.as_deref().and_then(decode_vector) {
                found.insert(key.clone(), vector);
            }
        }
        Ok(found)
    }

    /// Store vectors in the embedding cache in one transaction
    pub fn store_embeddings(&self, model: &str, entries: &[(String, Vec<f32>)]) -> Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO embedding_cache (key, model, dimension, vector, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            let now = chrono::Utc::now().timestamp();
            for (key, vector) in entries {
                stmt.execute(params![
                    key,
                    model,
                    vector.len() as i64,
                    encode_vector(vector),
                    now
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn stats(&self) -> Result<DbStats> {
        let conn = self.get_conn()?;

        let file_count: i64 = conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        let chunk_count: i64 = conn.query_row(
            "SELECT COALESCE(SUM(chunk_count), 0) FROM files",
            [],
            |row| row.get(0),
        )?;
        let cached_embeddings: i64 =
            conn.query_row("SELECT COUNT(*) FROM embedding_cache", [], |row| row.get(0))?;

        Ok(DbStats {
            file_count: file_count as usize,
            chunk_count: chunk_count as usize,
            cached_embeddings: cached_embeddings as usize,
        })
    }
}

/// Database statistics
#[derive(Debug, Clone)]
pub struct DbStats {
    pub file_count: usize,
    pub chunk_count: usize,
    pub cached_embeddings: usize,
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: manifest and embedding cache
    r#"
    CREATE TABLE files (
        path TEXT PRIMARY KEY,
        content_hash TEXT NOT NULL,
        size INTEGER NOT NULL,
        chunk_count INTEGER NOT NULL,
        indexed_at INTEGER NOT NULL
    );

    CREATE TABLE embedding_cache (
        key TEXT PRIMARY KEY,
        model TEXT NOT NULL,
        dimension INTEGER NOT NULL,
        vector BLOB NOT NULL,
        created_at INTEGER NOT NULL
    );

    CREATE INDEX idx_embedding_cache_model ON embedding_cache(model);
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(path: &str, hash: &str) -> ManifestEntry {
        ManifestEntry {
            path: path.to_string(),
            content_hash: hash.to_string(),
            size: 10,
            chunk_count: 2,
            indexed_at: 1_700_000_000,
        }
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manifest.sqlite");
        Database::new(&path).unwrap();
        let db = Database::new(&path).unwrap();
        assert_eq!(db.stats().unwrap().file_count, 0);
    }

    #[test]
    fn test_manifest_upsert_and_remove() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(&dir.path().join("manifest.sqlite")).unwrap();

        db.upsert_file(&entry("a.md", "h1")).unwrap();
        db.upsert_file(&entry("a.md", "h2")).unwrap();
        db.upsert_file(&entry("b.md", "h3")).unwrap();

        let manifest = db.manifest().unwrap();
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest["a.md"], "h2");
        assert_eq!(db.manifest_entry("b.md").unwrap(), Some(entry("b.md", "h3")));

        assert!(db.remove_file("a.md").unwrap());
        assert!(!db.remove_file("a.md").unwrap());

        let stats = db.stats().unwrap();
        assert_eq!(stats.file_count, 1);
        assert_eq!(stats.chunk_count, 2);
    }

    #[test]
    fn test_embedding_cache() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(&dir.path().join("manifest.sqlite")).unwrap();

        db.store_embeddings("m", &[("k1".to_string(), vec![0.5, -1.25])])
            .unwrap();
        let found = db
            .cached_embeddings(&["k1".to_string(), "k2".to_string()])
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found["k1"], vec![0.5, -1.25]);
        assert_eq!(db.stats().unwrap().cached_embeddings, 1);
    }
}
