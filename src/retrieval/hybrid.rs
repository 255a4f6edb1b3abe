//! Hybrid search combining dense and lexical retrieval

use crate::config::RetrievalConfig;
use crate::embedding::{
    EmbeddingError, EmbeddingProvider, KeywordIndex, LexicalWeights, VectorIndexError,
    VectorIndexManager,
};
use crate::llm::KeywordExtractor;
use crate::retrieval::{weighted_fusion, FusionConfig, FusionError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Query embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Vector search failed: {0}")]
    VectorSearch(#[from] VectorIndexError),

    #[error("Fusion configuration invalid: {0}")]
    Fusion(#[from] FusionError),
}

/// Runs both retrieval legs and fuses them into corpus-position candidates
pub struct HybridSearcher {
    provider: Arc<dyn EmbeddingProvider>,
    keyword_extractor: Option<Arc<dyn KeywordExtractor>>,
    fusion: FusionConfig,
    weights: LexicalWeights,
    candidate_multiplier: usize,
}

impl HybridSearcher {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        config: &RetrievalConfig,
    ) -> Result<Self, SearchError> {
        Ok(Self {
            provider,
            keyword_extractor: None,
            fusion: FusionConfig::new(config.dense_weight, config.lexical_weight)?,
            weights: LexicalWeights {
                verbatim_boost: config.verbatim_boost,
                path_bonus: config.path_bonus,
            },
            candidate_multiplier: config.candidate_multiplier.max(1),
        })
    }

    /// Use an LLM for query keywords; tokenization remains the fallback
    pub fn with_keyword_extractor(mut self, extractor: Arc<dyn KeywordExtractor>) -> Self {
        self.keyword_extractor = Some(extractor);
        self
    }

    /// Keywords for the lexical leg
    pub fn keywords(&self, query: &str, lexical: &KeywordIndex) -> Vec<String> {
        if let Some(extractor) = &self.keyword_extractor {
            match extractor.extract_keywords(query) {
                Ok(keywords) if !keywords.is_empty() => return keywords,
                Ok(_) => debug!("Keyword extractor returned nothing, tokenizing query"),
                Err(e) => warn!("Keyword extraction failed, tokenizing query: {}", e),
            }
        }
        lexical.extract_keywords(query)
    }

    /// Fused `(corpus_id, score)` candidates, at most
    /// `candidate_multiplier * top_k` of them, best first
    pub fn search(
        &self,
        query: &str,
        top_k: usize,
        vectors: &VectorIndexManager,
        lexical: &KeywordIndex,
    ) -> Result<Vec<(usize, f32)>, SearchError> {
        if query.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let limit = top_k.saturating_mul(self.candidate_multiplier);

        let dense: Vec<(usize, f32)> = if vectors.is_empty() {
            Vec::new()
        } else {
            let embedding = self.provider.embed_one(query)?;
            // Anti-correlated vectors contribute nothing rather than a penalty
            vectors
                .search(&embedding, limit)?
                .into_iter()
                .map(|r| (r.id, r.score.max(0.0)))
                .collect()
        };

        let keywords = self.keywords(query, lexical);
        let sparse: Vec<(usize, f32)> = lexical
            .search(query, &keywords, self.weights)
            .into_iter()
            .take(limit)
            .map(|r| (r.id, r.score))
            .collect();

        debug!(
            "Hybrid search: {} dense, {} lexical hits for keywords {:?}",
            dense.len(),
            sparse.len(),
            keywords
        );

        let mut fused = weighted_fusion(&dense, &sparse, &self.fusion);
        fused.truncate(limit);
        Ok(fused)
    }
}
