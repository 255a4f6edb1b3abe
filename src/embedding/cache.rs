//! Persistent embedding cache
//!
//! Document vectors are stored in SQLite keyed by BLAKE3 of the model name
//! and the exact text, so an unchanged chunk is never sent to the model twice,
//! even across rebuilds that discard the per-file entries.

use super::EmbeddingError;
use crate::storage::Database;
use std::collections::HashMap;

pub struct EmbeddingCache {
    database: Database,
    model: String,
}

impl EmbeddingCache {
    pub fn new(database: Database, model: impl Into<String>) -> Self {
        Self {
            database,
            model: model.into(),
        }
    }

    /// Cache key for `text` under this cache's model
    pub fn key(&self, text: &str) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.model.as_bytes());
        hasher.update(&[0]);
        hasher.update(text.as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    /// Vectors found in the cache, by key
    pub fn lookup(&self, keys: &[String]) -> Result<HashMap<String, Vec<f32>>, EmbeddingError> {
        self.database
            .cached_embeddings(keys)
            .map_err(|e| EmbeddingError::Cache(e.to_string()))
    }

    pub fn store(&self, entries: &[(String, Vec<f32>)]) -> Result<(), EmbeddingError> {
        if entries.is_empty() {
            return Ok(());
        }
        self.database
            .store_embeddings(&self.model, entries)
            .map_err(|e| EmbeddingError::Cache(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_key_is_salted_by_model() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(&dir.path().join("db.sqlite")).unwrap();
        let a = EmbeddingCache::new(db.clone(), "model-a");
        let b = EmbeddingCache::new(db, "model-b");

        assert_eq!(a.key("same text"), a.key("same text"));
        assert_ne!(a.key("same text"), b.key("same text"));
        assert_ne!(a.key("same text"), a.key("other text"));
    }

    #[test]
    fn test_lookup_after_store() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(&dir.path().join("db.sqlite")).unwrap();
        let cache = EmbeddingCache::new(db, "model-a");

        let key = cache.key("hello");
        cache.store(&[(key.clone(), vec![1.0, 0.0])]).unwrap();
        let found = cache.lookup(&[key.clone(), cache.key("missing")]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[&key], vec![1.0, 0.0]);
    }
}
