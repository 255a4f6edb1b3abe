/// Embedding provider trait and FastEmbed implementation
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitializationError(String),

    #[error("Embedding generation failed: {0}")]
    GenerationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding cache error: {0}")]
    Cache(String),
}

/// Dense embedding backend
///
/// Implementations return unit-length vectors of a fixed dimension so inner
/// product can stand in for cosine similarity.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a query
    fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed documents; output rows align with `texts`
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    fn dimension(&self) -> usize;

    /// Identifies the model; salts cache keys so switching models never
    /// serves stale vectors
    fn model_name(&self) -> &str;
}

/// Scale `vector` to unit length in place. Zero vectors are left alone.
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Local ONNX embedding via fastembed
///
/// Models are downloaded to the fastembed cache on first use.
pub struct FastEmbedProvider {
    model: TextEmbedding,
    model_name: String,
    dimension: usize,
}

impl FastEmbedProvider {
    /// Load `model_name`. Failure here is fatal for the pipeline.
    pub fn new(model_name: &str) -> Result<Self, EmbeddingError> {
        let (embedding_model, dimension) = match model_name {
            "all-MiniLM-L6-v2" | "all-minilm-l6-v2" => (EmbeddingModel::AllMiniLML6V2, 384),
            "bge-small-en-v1.5" => (EmbeddingModel::BGESmallENV15, 384),
            "bge-base-en-v1.5" => (EmbeddingModel::BGEBaseENV15, 768),
            "multilingual-e5-small" => (EmbeddingModel::MultilingualE5Small, 384),
            "paraphrase-multilingual-MiniLM-L12-v2" => {
                (EmbeddingModel::ParaphraseMLMiniLML12V2, 384)
            }
            _ => {
                return Err(EmbeddingError::InitializationError(format!(
                    "Unsupported model: {}. Supported: all-MiniLM-L6-v2, bge-small-en-v1.5, \
                     bge-base-en-v1.5, multilingual-e5-small, paraphrase-multilingual-MiniLM-L12-v2",
                    model_name
                )));
            }
        };

        tracing::info!("Loading embedding model {} ({}D)", model_name, dimension);

        let init_options = InitOptions::new(embedding_model).with_show_download_progress(true);
        let model = TextEmbedding::try_new(init_options)
            .map_err(|e| EmbeddingError::InitializationError(e.to_string()))?;

        Ok(Self {
            model,
            model_name: model_name.to_string(),
            dimension,
        })
    }

    fn check(&self, mut embeddings: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        for embedding in embeddings.iter_mut() {
            if embedding.len() != self.dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.dimension,
                    actual: embedding.len(),
                });
            }
            normalize(embedding);
        }
        Ok(embeddings)
    }
}

impl EmbeddingProvider for FastEmbedProvider {
    fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("Empty text".to_string()));
        }

        let embeddings = self
            .model
            .embed(vec![text], None)
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?;

        self.check(embeddings)?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::GenerationError("No embedding generated".to_string()))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        // Dropping blanks would shift rows out of alignment with the input
        if let Some(pos) = texts.iter().position(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::InvalidInput(format!(
                "Text at position {} is empty",
                pos
            )));
        }

        let embeddings = self
            .model
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?;

        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::GenerationError(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            )));
        }
        self.check(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[test]
    fn test_unsupported_model() {
        assert!(matches!(
            FastEmbedProvider::new("no-such-model"),
            Err(EmbeddingError::InitializationError(_))
        ));
    }

    #[test]
    #[ignore] // Requires model download (~90MB) - run with: cargo test -- --ignored
    fn test_batch_rows_align_with_input() {
        let provider = FastEmbedProvider::new("all-MiniLM-L6-v2").unwrap();
        let texts = vec![
            "Cats are great pets.".to_string(),
            "The lazy dog sleeps all day.".to_string(),
        ];
        let embeddings = provider.embed_batch(&texts).unwrap();
        assert_eq!(embeddings.len(), 2);

        let single = provider.embed_one(&texts[1]).unwrap();
        let dot: f32 = single.iter().zip(&embeddings[1]).map(|(a, b)| a * b).sum();
        assert!(dot > 0.99);
    }

    #[test]
    #[ignore] // Requires model download (~90MB) - run with: cargo test -- --ignored
    fn test_semantic_similarity() {
        let provider = FastEmbedProvider::new("all-MiniLM-L6-v2").unwrap();

        let cat = provider.embed_one("The cat sits on the mat.").unwrap();
        let feline = provider.embed_one("A feline rests on the rug.").unwrap();
        let code = provider.embed_one("Python programming language.").unwrap();

        let sim = |a: &[f32], b: &[f32]| a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
        assert!(sim(&cat, &feline) > sim(&cat, &code));
    }

    #[test]
    #[ignore] // Requires model download (~90MB) - run with: cargo test -- --ignored
    fn test_empty_text_rejected() {
        let provider = FastEmbedProvider::new("all-MiniLM-L6-v2").unwrap();
        assert!(provider.embed_one("  ").is_err());
        assert!(provider
            .embed_batch(&["ok".to_string(), String::new()])
            .is_err());
    }
}
