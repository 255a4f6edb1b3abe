/// Batched, cache-aware document embedding
use super::{EmbeddingCache, EmbeddingError, EmbeddingProvider};
use ndarray::Array2;
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of one [`BatchEmbedder::embed_documents`] call
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BatchResult {
    /// Texts sent to the model
    pub embedded: usize,
    /// Texts served from the cache
    pub cache_hits: usize,
    pub duration_ms: u64,
}

/// Embeds document texts in fixed-size batches, consulting and filling the
/// persistent cache when one is attached
pub struct BatchEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Option<EmbeddingCache>,
    batch_size: usize,
}

impl BatchEmbedder {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        cache: Option<EmbeddingCache>,
        batch_size: usize,
    ) -> Self {
        Self {
            provider,
            cache,
            batch_size: batch_size.max(1),
        }
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    /// Embed `texts` into an `N x D` matrix whose rows align with the input
    pub fn embed_documents(
        &self,
        texts: &[String],
    ) -> Result<(Array2<f32>, BatchResult), EmbeddingError> {
        let start = std::time::Instant::now();
        let dimension = self.provider.dimension();
        let mut rows: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut result = BatchResult::default();

        let keys: Vec<String> = match &self.cache {
            Some(cache) => texts.iter().map(|t| cache.key(t)).collect(),
            None => Vec::new(),
        };

        if let Some(cache) = &self.cache {
            let hits = cache.lookup(&keys)?;
            for (row, key) in rows.iter_mut().zip(&keys) {
                if let Some(vector) = hits.get(key) {
                    if vector.len() == dimension {
                        *row = Some(vector.clone());
                        result.cache_hits += 1;
                    }
                }
            }
        }

        let missing: Vec<usize> = rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row.is_none())
            .map(|(i, _)| i)
            .collect();

        for batch in missing.chunks(self.batch_size) {
            let batch_texts: Vec<String> = batch.iter().map(|&i| texts[i].clone()).collect();
            let vectors = self.provider.embed_batch(&batch_texts)?;
            if vectors.len() != batch.len() {
                return Err(EmbeddingError::GenerationError(format!(
                    "Expected {} embeddings, got {}",
                    batch.len(),
                    vectors.len()
                )));
            }

            let mut fresh = Vec::with_capacity(batch.len());
            for (&i, vector) in batch.iter().zip(vectors) {
                if vector.len() != dimension {
                    return Err(EmbeddingError::DimensionMismatch {
                        expected: dimension,
                        actual: vector.len(),
                    });
                }
                if self.cache.is_some() {
                    fresh.push((keys[i].clone(), vector.clone()));
                }
                rows[i] = Some(vector);
            }

            if let Some(cache) = &self.cache {
                cache.store(&fresh)?;
            }
            result.embedded += batch.len();
            debug!("Embedded batch of {} texts", batch.len());
        }

        let mut flat = Vec::with_capacity(texts.len() * dimension);
        for row in rows {
            let row = row.ok_or_else(|| {
                EmbeddingError::GenerationError("Missing embedding row".to_string())
            })?;
            flat.extend(row);
        }
        let matrix = Array2::from_shape_vec((texts.len(), dimension), flat)
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?;

        result.duration_ms = start.elapsed().as_millis() as u64;
        if result.embedded > 0 {
            info!(
                "Embedded {} texts ({} from cache) in {}ms",
                result.embedded, result.cache_hits, result.duration_ms
            );
        }
        Ok((matrix, result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Embeds text length into a 2-d vector and counts texts it was asked for
    struct CountingProvider {
        texts_seen: AtomicUsize,
        calls: AtomicUsize,
    }

    impl CountingProvider {
        fn new() -> Self {
            Self {
                texts_seen: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl EmbeddingProvider for CountingProvider {
        fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![text.len() as f32, 1.0])
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.texts_seen.fetch_add(texts.len(), Ordering::SeqCst);
            texts.iter().map(|t| self.embed_one(t)).collect()
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "counting"
        }
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_batches_preserve_order() {
        let provider = Arc::new(CountingProvider::new());
        let embedder = BatchEmbedder::new(provider.clone(), None, 2);

        let (matrix, result) = embedder
            .embed_documents(&texts(&["a", "bbb", "cc", "dddd", "e"]))
            .unwrap();
        assert_eq!(matrix.dim(), (5, 2));
        assert_eq!(matrix.column(0).to_vec(), vec![1.0, 3.0, 2.0, 4.0, 1.0]);
        assert_eq!(result.embedded, 5);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_cache_skips_known_texts() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(&dir.path().join("db.sqlite")).unwrap();
        let provider = Arc::new(CountingProvider::new());
        let embedder = BatchEmbedder::new(
            provider.clone(),
            Some(EmbeddingCache::new(db, "counting")),
            8,
        );

        embedder.embed_documents(&texts(&["one", "two"])).unwrap();
        assert_eq!(provider.texts_seen.load(Ordering::SeqCst), 2);

        let (matrix, result) = embedder
            .embed_documents(&texts(&["two", "three", "one"]))
            .unwrap();
        assert_eq!(result.cache_hits, 2);
        assert_eq!(result.embedded, 1);
        assert_eq!(provider.texts_seen.load(Ordering::SeqCst), 3);
        assert_eq!(matrix.column(0).to_vec(), vec![3.0, 5.0, 3.0]);
    }

    #[test]
    fn test_empty_input() {
        let provider = Arc::new(CountingProvider::new());
        let embedder = BatchEmbedder::new(provider.clone(), None, 4);
        let (matrix, result) = embedder.embed_documents(&[]).unwrap();
        assert_eq!(matrix.dim(), (0, 2));
        assert_eq!(result.embedded, 0);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }
}
