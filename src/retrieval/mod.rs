//! Hybrid retrieval and reranking
//!
//! Dense (vector) and lexical (TF-IDF) candidates are fused by weighted
//! score, then optionally reordered by a cross-encoder.

mod deduplication;
mod fusion;
mod hybrid;
mod reranker;
mod scored;

pub use deduplication::deduplicate_chunks;
pub use fusion::{weighted_fusion, FusionConfig, FusionError};
pub use hybrid::{HybridSearcher, SearchError};
pub use reranker::{
    gpu_execution_providers, CrossEncoder, FastEmbedCrossEncoder, RerankError, Reranker,
};
pub use scored::ScoredChunk;
