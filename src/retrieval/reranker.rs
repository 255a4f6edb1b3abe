//! Cross-encoder reranking with GPU to CPU fallback

use crate::config::{ExecutionTarget, RerankingConfig};
use crate::retrieval::ScoredChunk;
use fastembed::{ExecutionProviderDispatch, RerankInitOptions, RerankerModel, TextRerank};
use ort::execution_providers::CUDAExecutionProvider;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum RerankError {
    #[error("Reranker initialization failed: {0}")]
    InitializationError(String),

    #[error("Reranking failed: {0}")]
    RerankingError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Scores (query, document) pairs jointly
pub trait CrossEncoder: Send + Sync {
    fn name(&self) -> &str;

    /// One relevance score per document, in input order
    fn score_batch(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, RerankError>;
}

/// fastembed cross-encoder on a chosen set of ONNX execution providers
pub struct FastEmbedCrossEncoder {
    model: TextRerank,
    model_name: String,
}

impl FastEmbedCrossEncoder {
    /// Load `model_name` on the default (CPU) execution provider; models are
    /// downloaded on first use
    pub fn new(model_name: &str) -> Result<Self, RerankError> {
        Self::with_execution_providers(model_name, Vec::new())
    }

    /// Load `model_name` registered on `providers`, in order
    pub fn with_execution_providers(
        model_name: &str,
        providers: Vec<ExecutionProviderDispatch>,
    ) -> Result<Self, RerankError> {
        let model = match model_name {
            "BAAI/bge-reranker-base" | "bge-reranker-base" => RerankerModel::BGERerankerBase,
            "BAAI/bge-reranker-v2-m3" | "bge-reranker-v2-m3" => RerankerModel::BGERerankerV2M3,
            _ => {
                return Err(RerankError::InitializationError(format!(
                    "Unsupported reranker model: {}. Supported: BAAI/bge-reranker-base, \
                     BAAI/bge-reranker-v2-m3",
                    model_name
                )));
            }
        };

        info!("Loading reranker model {} ({:?})", model_name, providers);
        let mut init_options = RerankInitOptions::new(model).with_show_download_progress(true);
        if !providers.is_empty() {
            init_options = init_options.with_execution_providers(providers);
        }
        let model = TextRerank::try_new(init_options)
            .map_err(|e| RerankError::InitializationError(e.to_string()))?;

        Ok(Self {
            model,
            model_name: model_name.to_string(),
        })
    }
}

/// Execution providers for the GPU encoder slot, `None` when `device`
/// rules the GPU out
///
/// Registration errors are surfaced instead of silently landing on the CPU,
/// so a failed GPU load leaves the slot empty.
pub fn gpu_execution_providers(device: ExecutionTarget) -> Option<Vec<ExecutionProviderDispatch>> {
    match device {
        ExecutionTarget::Cpu => None,
        ExecutionTarget::Auto | ExecutionTarget::Gpu => Some(vec![CUDAExecutionProvider::default()
            .build()
            .error_on_failure()]),
    }
}

impl CrossEncoder for FastEmbedCrossEncoder {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn score_batch(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, RerankError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let docs: Vec<&str> = documents.iter().map(|s| s.as_str()).collect();
        let results = self
            .model
            .rerank(query, docs, false, Some(documents.len()))
            .map_err(|e| RerankError::RerankingError(e.to_string()))?;

        // fastembed returns results sorted by score; restore input order
        let mut scores = vec![f32::NAN; documents.len()];
        for result in results {
            if let Some(slot) = scores.get_mut(result.index) {
                *slot = result.score;
            }
        }
        if scores.iter().any(|s| s.is_nan()) {
            return Err(RerankError::RerankingError(
                "Cross-encoder returned an incomplete score set".to_string(),
            ));
        }
        Ok(scores)
    }
}

/// Reorders fused candidates with a cross-encoder
///
/// The GPU encoder, when present, is tried first. Any failure reruns the
/// whole candidate set on the CPU encoder; if that fails too, or no encoder
/// is configured, the incoming order is kept. Reranking never fails.
pub struct Reranker {
    gpu: Option<Box<dyn CrossEncoder>>,
    cpu: Option<Box<dyn CrossEncoder>>,
    batch_size: usize,
}

impl Reranker {
    pub fn new(
        gpu: Option<Box<dyn CrossEncoder>>,
        cpu: Option<Box<dyn CrossEncoder>>,
        batch_size: usize,
    ) -> Self {
        Self {
            gpu,
            cpu,
            batch_size: batch_size.max(1),
        }
    }

    /// Pass-through reranker that only truncates
    pub fn disabled() -> Self {
        Self::new(None, None, 1)
    }

    /// Build from configuration
    ///
    /// The CPU encoder is always loaded. With `device = auto` or `gpu` a
    /// second, CUDA-backed encoder fills the GPU slot; if it cannot be
    /// loaded the reranker runs on the CPU alone.
    pub fn from_config(config: &RerankingConfig) -> Result<Self, RerankError> {
        if !config.enabled {
            return Ok(Self::disabled());
        }

        let gpu = match gpu_execution_providers(config.device) {
            Some(providers) => {
                match FastEmbedCrossEncoder::with_execution_providers(&config.model, providers) {
                    Ok(encoder) => {
                        info!("Reranker GPU execution enabled");
                        Some(Box::new(encoder) as Box<dyn CrossEncoder>)
                    }
                    Err(e) if config.device == ExecutionTarget::Gpu => {
                        warn!("GPU reranking requested but unavailable, using CPU: {}", e);
                        None
                    }
                    Err(e) => {
                        debug!("No GPU for reranking, using CPU: {}", e);
                        None
                    }
                }
            }
            None => None,
        };

        let cpu = FastEmbedCrossEncoder::new(&config.model)?;
        Ok(Self::new(gpu, Some(Box::new(cpu)), config.batch_size))
    }

    pub fn with_gpu(mut self, encoder: Box<dyn CrossEncoder>) -> Self {
        self.gpu = Some(encoder);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.gpu.is_some() || self.cpu.is_some()
    }

    /// Score `candidates` against `query` and keep the best `top_n`
    ///
    /// Each candidate's score becomes its cross-encoder score; on fallback
    /// the incoming scores are left untouched.
    pub fn rerank(
        &self,
        query: &str,
        mut candidates: Vec<ScoredChunk>,
        top_n: usize,
    ) -> Vec<ScoredChunk> {
        if candidates.is_empty() || !self.is_enabled() {
            candidates.truncate(top_n);
            return candidates;
        }

        let texts: Vec<String> = candidates
            .iter()
            .map(|c| c.chunk.embedding_text())
            .collect();

        let mut scores = None;
        if let Some(gpu) = &self.gpu {
            match self.score_all(gpu.as_ref(), query, &texts) {
                Ok(s) => scores = Some(s),
                Err(e) => warn!("GPU reranking with {} failed, retrying on CPU: {}", gpu.name(), e),
            }
        }
        if scores.is_none() {
            if let Some(cpu) = &self.cpu {
                match self.score_all(cpu.as_ref(), query, &texts) {
                    Ok(s) => scores = Some(s),
                    Err(e) => warn!("CPU reranking with {} failed: {}", cpu.name(), e),
                }
            }
        }

        let Some(scores) = scores else {
            warn!("Reranking unavailable, keeping fused order");
            candidates.truncate(top_n);
            return candidates;
        };

        for (candidate, score) in candidates.iter_mut().zip(scores) {
            candidate.score = score;
        }
        // Stable: equal scores keep the fused order
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(top_n);
        debug!("Reranked to {} results", candidates.len());
        candidates
    }

    /// Score every text in `batch_size` slices; any error aborts the pass
    fn score_all(
        &self,
        encoder: &dyn CrossEncoder,
        query: &str,
        texts: &[String],
    ) -> Result<Vec<f32>, RerankError> {
        let mut scores = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let batch_scores = encoder.score_batch(query, batch)?;
            if batch_scores.len() != batch.len() {
                return Err(RerankError::RerankingError(format!(
                    "Expected {} scores, got {}",
                    batch.len(),
                    batch_scores.len()
                )));
            }
            scores.extend(batch_scores);
        }
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::Chunk;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Scores a document by how many times it contains "match"
    struct CountingEncoder {
        calls: Arc<AtomicUsize>,
    }

    impl CrossEncoder for CountingEncoder {
        fn name(&self) -> &str {
            "counting"
        }

        fn score_batch(&self, _query: &str, documents: &[String]) -> Result<Vec<f32>, RerankError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(documents
                .iter()
                .map(|d| d.matches("match").count() as f32)
                .collect())
        }
    }

    /// Fails on the batch with the given index
    struct FailingEncoder {
        fail_on: usize,
        calls: AtomicUsize,
    }

    impl CrossEncoder for FailingEncoder {
        fn name(&self) -> &str {
            "failing"
        }

        fn score_batch(&self, _query: &str, documents: &[String]) -> Result<Vec<f32>, RerankError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == self.fail_on {
                return Err(RerankError::RerankingError("out of memory".to_string()));
            }
            Ok(vec![100.0; documents.len()])
        }
    }

    fn candidates(texts: &[&str]) -> Vec<ScoredChunk> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let chunk = Chunk::from_parts(vec![t.to_string()], &format!("f{}.md", i), "text", "h")
                    .remove(0);
                ScoredChunk::new(chunk, 1.0 - i as f32 * 0.1)
            })
            .collect()
    }

    fn paths(results: &[ScoredChunk]) -> Vec<&str> {
        results.iter().map(|r| r.chunk.file_path.as_str()).collect()
    }

    #[test]
    fn test_rerank_reorders_and_truncates() {
        let calls = Arc::new(AtomicUsize::new(0));
        let reranker = Reranker::new(
            None,
            Some(Box::new(CountingEncoder { calls: calls.clone() })),
            2,
        );

        let results = reranker.rerank(
            "q",
            candidates(&["none", "match match", "match", "match match match"]),
            3,
        );
        assert_eq!(paths(&results), vec!["f3.md", "f1.md", "f2.md"]);
        assert_eq!(results[0].score, 3.0);
        // Four candidates in batches of two
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_gpu_failure_reruns_everything_on_cpu() {
        let calls = Arc::new(AtomicUsize::new(0));
        let reranker = Reranker::new(
            None,
            Some(Box::new(CountingEncoder { calls: calls.clone() })),
            1,
        )
        .with_gpu(Box::new(FailingEncoder {
            fail_on: 1,
            calls: AtomicUsize::new(0),
        }));

        let results = reranker.rerank("q", candidates(&["none", "match", "match match"]), 3);
        // No GPU scores (100.0) leak into the result
        assert_eq!(paths(&results), vec!["f2.md", "f1.md", "f0.md"]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_total_failure_keeps_original_order() {
        let reranker = Reranker::new(
            Some(Box::new(FailingEncoder {
                fail_on: 0,
                calls: AtomicUsize::new(0),
            })),
            Some(Box::new(FailingEncoder {
                fail_on: 0,
                calls: AtomicUsize::new(0),
            })),
            10,
        );

        let results = reranker.rerank("q", candidates(&["a", "b", "c"]), 2);
        assert_eq!(paths(&results), vec!["f0.md", "f1.md"]);
        assert_eq!(results[0].score, 1.0);
    }

    #[test]
    fn test_disabled_and_empty() {
        let reranker = Reranker::disabled();
        assert!(!reranker.is_enabled());
        assert_eq!(reranker.rerank("q", candidates(&["a", "b"]), 1).len(), 1);
        assert!(reranker.rerank("q", Vec::new(), 5).is_empty());
    }

    #[test]
    fn test_device_selects_gpu_providers() {
        assert!(gpu_execution_providers(ExecutionTarget::Cpu).is_none());
        assert_eq!(gpu_execution_providers(ExecutionTarget::Auto).map(|p| p.len()), Some(1));
        assert_eq!(gpu_execution_providers(ExecutionTarget::Gpu).map(|p| p.len()), Some(1));
    }

    #[test]
    #[ignore] // Requires model download
    fn test_auto_device_always_has_cpu_encoder() {
        let config = RerankingConfig {
            device: ExecutionTarget::Auto,
            ..Default::default()
        };
        // Without a usable GPU the CUDA load fails and only the CPU slot is filled
        let reranker = Reranker::from_config(&config).unwrap();
        assert!(reranker.cpu.is_some());
        let results = reranker.rerank("q", candidates(&["a", "b"]), 1);
        assert_eq!(results.len(), 1);
    }

    #[test]
    #[ignore] // Requires model download
    fn test_fastembed_cross_encoder() {
        let encoder = FastEmbedCrossEncoder::new("BAAI/bge-reranker-base").unwrap();
        let docs = vec![
            "Paris is the capital of France.".to_string(),
            "The weather is nice today.".to_string(),
        ];
        let scores = encoder
            .score_batch("What is the capital of France?", &docs)
            .unwrap();
        assert_eq!(scores.len(), 2);
        assert!(scores[0] > scores[1]);
    }
}
